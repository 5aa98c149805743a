//! Driver errors

use crate::container::RuntimeError;
use crate::task::ConfigError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Malformed or incomplete request; nothing was changed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("failed to pull image {image} after {attempts} attempts: {source}")]
    ImagePull {
        image: String,
        attempts: u32,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to start container: {0}")]
    Launch(#[source] RuntimeError),

    #[error("failed to recover container {container_id}: {reason}")]
    Recovery {
        container_id: String,
        reason: String,
    },

    #[error("failed to prepare volume {name}: {source}")]
    Volume {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("task state: {0}")]
    State(String),

    #[error("handle version {found} is not supported (expected {expected})")]
    IncompatibleHandle { found: u32, expected: u32 },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<ConfigError> for DriverError {
    fn from(e: ConfigError) -> Self {
        DriverError::InvalidRequest(e.to_string())
    }
}

impl DriverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = DriverError::NotFound("web-1".to_string());
        assert_eq!(err.to_string(), "task web-1 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_config_error_is_invalid_request() {
        let err: DriverError = ConfigError::MissingImage.into();
        assert!(matches!(err, DriverError::InvalidRequest(_)));
    }
}
