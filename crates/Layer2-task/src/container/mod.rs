//! Runtime executor
//!
//! Thin, stateless wrapper around the external container tool. Every call
//! spawns the tool once and turns its text/JSON output into typed results;
//! nothing is cached between calls.
//!
//! - `ContainerRuntime` - the seam the driver works against
//! - `CliRuntime` - production implementation over `tokio::process`
//!
//! Calls are cancelled by dropping their future (the child process is killed
//! on drop); deadlines are applied by callers with `tokio::time::timeout`.

mod cli;
mod types;

use parking_lot::RwLock;
use std::sync::Arc;

pub use cli::{parse_network_list, CliRuntime};
pub use types::{
    Configuration, ContainerInfo, ContainerStats, DiskUsage, ExecIo, ImageDescriptor, ImageInfo,
    InitProcess, Mount, NetworkAttachment, NetworkInfo, Platform, PublishedPort, Resources,
    RunOptions, UsageEntry, VolumeInfo,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors raised by the runtime executor
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The tool exited non-zero. Carries its captured error output.
    #[error("container {operation} failed: {output}")]
    Execution {
        operation: &'static str,
        output: String,
    },

    /// The tool's output did not have the expected shape
    #[error("failed to parse {operation} output: {message}")]
    Parse {
        operation: &'static str,
        message: String,
    },

    /// The tool returned no record where one was expected
    #[error("container not found: {0}")]
    NotFound(String),

    /// The tool could not be launched or its pipes failed
    #[error("container {operation} could not run: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    /// Output captured from a failed invocation
    pub fn output(&self) -> Option<&str> {
        match self {
            RuntimeError::Execution { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Container runtime executor trait - implement to back the driver with a
/// different tool (or an in-memory fake in tests)
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the tool binary can be found. Never fails.
    fn is_available(&self) -> bool;

    /// Tool version string
    async fn version(&self) -> RuntimeResult<String>;

    /// Start a container, returning its identifier
    async fn run(&self, opts: &RunOptions) -> RuntimeResult<String>;

    async fn stop(&self, id: &str) -> RuntimeResult<()>;

    async fn remove(&self, id: &str) -> RuntimeResult<()>;

    /// Send a signal; `None` leaves the choice to the tool
    async fn kill(&self, id: &str, signal: Option<&str>) -> RuntimeResult<()>;

    /// Fails with `NotFound` when the tool reports no record
    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerInfo>;

    async fn list(&self, all: bool) -> RuntimeResult<Vec<ContainerInfo>>;

    /// Output lines of the container's log
    async fn logs(&self, id: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<String>>>;

    /// Run a command in the container and return its combined output
    async fn exec(&self, id: &str, command: &[String]) -> RuntimeResult<Vec<u8>>;

    /// Run a command in the container wired to the caller's streams
    async fn exec_interactive(&self, id: &str, command: &[String], io: ExecIo)
        -> RuntimeResult<()>;

    async fn stats(&self, id: &str) -> RuntimeResult<ContainerStats>;

    async fn pull(&self, image: &str) -> RuntimeResult<()>;

    async fn disk_usage(&self) -> RuntimeResult<DiskUsage>;

    /// Remove unused images
    async fn prune(&self) -> RuntimeResult<()>;

    async fn volume_list(&self) -> RuntimeResult<Vec<VolumeInfo>>;

    async fn volume_create(&self, name: &str) -> RuntimeResult<()>;

    async fn volume_remove(&self, name: &str) -> RuntimeResult<()>;

    /// Names of the configured networks
    async fn network_list(&self) -> RuntimeResult<Vec<String>>;

    async fn network_create(&self, name: &str, subnet: &str) -> RuntimeResult<()>;

    async fn network_delete(&self, name: &str) -> RuntimeResult<()>;

    // ========================================================================
    // Derived operations
    // ========================================================================

    async fn volume_exists(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.volume_list().await?.iter().any(|v| v.name == name))
    }

    async fn network_exists(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.network_list().await?.iter().any(|n| n == name))
    }

    /// Create the network unless it already exists
    async fn ensure_network(&self, name: &str, subnet: &str) -> RuntimeResult<()> {
        if self.network_exists(name).await? {
            return Ok(());
        }
        self.network_create(name, subnet).await
    }

    async fn exists(&self, id: &str) -> RuntimeResult<bool> {
        match self.inspect(id).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// A missing container counts as not running
    async fn is_running(&self, id: &str) -> RuntimeResult<bool> {
        match self.inspect(id).await {
            Ok(info) => Ok(info.is_running()),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Executor handle shared by the driver and its task monitors; replacing the
/// inner runtime re-points every holder at once
pub type SharedRuntime = Arc<RwLock<Arc<dyn ContainerRuntime>>>;

pub fn shared_runtime(runtime: Arc<dyn ContainerRuntime>) -> SharedRuntime {
    Arc::new(RwLock::new(runtime))
}
