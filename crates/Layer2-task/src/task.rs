//! Task configuration and persisted task state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;

/// Validation failure of a task configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("image must not be empty")]
    MissingImage,

    #[error("invalid memory size '{0}'")]
    InvalidMemory(String),

    #[error("invalid volume '{0}': expected source:dest[:options] with an absolute destination")]
    InvalidVolume(String),

    #[error("invalid port '{0}': expected [[host-ip:]host:]container[/proto]")]
    InvalidPort(String),

    #[error("environment variable name must not be empty")]
    EmptyEnvKey,
}

// ============================================================================
// Task Config
// ============================================================================

/// What a task author may specify for one container-backed task.
/// Supplied once at start and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub image: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    pub args: Vec<String>,

    pub env: BTreeMap<String, String>,

    /// `[host:]container[/proto]`
    pub ports: Vec<String>,

    /// `source:dest[:options]`; a relative source names a volume
    pub volumes: Vec<String>,

    /// Size string such as `512m` or `2g`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    /// Zero leaves the runtime default
    pub cpus: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl TaskConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.trim().is_empty() {
            return Err(ConfigError::MissingImage);
        }

        if let Some(memory) = &self.memory {
            parse_memory_string(memory).ok_or_else(|| ConfigError::InvalidMemory(memory.clone()))?;
        }

        for volume in &self.volumes {
            VolumeSpec::parse(volume)?;
        }

        for port in &self.ports {
            validate_port(port)?;
        }

        if self.env.keys().any(|k| k.is_empty()) {
            return Err(ConfigError::EmptyEnvKey);
        }

        Ok(())
    }

    /// User volumes parsed into specs, in declaration order
    pub fn volume_specs(&self) -> Result<Vec<VolumeSpec>, ConfigError> {
        self.volumes.iter().map(|v| VolumeSpec::parse(v)).collect()
    }

    /// Memory limit in bytes, if one was given
    pub fn memory_bytes(&self) -> Option<u64> {
        self.memory.as_deref().and_then(parse_memory_string)
    }
}

// ============================================================================
// Volumes
// ============================================================================

/// One `source:dest[:options]` mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub source: String,
    pub destination: String,
    pub options: Option<String>,
}

impl VolumeSpec {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidVolume(raw.to_string());

        let mut parts = raw.splitn(3, ':');
        let source = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let destination = parts
            .next()
            .filter(|d| d.starts_with('/'))
            .ok_or_else(invalid)?;
        let options = parts.next().map(str::to_string);
        if options.as_deref() == Some("") {
            return Err(invalid());
        }

        Ok(Self {
            source: source.to_string(),
            destination: destination.to_string(),
            options,
        })
    }

    /// A source that is not an absolute path names a runtime-managed volume
    pub fn is_named(&self) -> bool {
        !self.source.starts_with('/')
    }

    /// Bind mount attached read-write
    pub fn bind(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            options: None,
        }
    }
}

impl std::fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.destination)?;
        if let Some(options) = &self.options {
            write!(f, ":{}", options)?;
        }
        Ok(())
    }
}

/// `[[host-ip:]host-port:]container-port[/proto]`
fn validate_port(raw: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidPort(raw.to_string());

    let (mapping, proto) = match raw.split_once('/') {
        Some((mapping, proto)) => (mapping, Some(proto)),
        None => (raw, None),
    };
    if let Some(proto) = proto {
        if !matches!(proto, "tcp" | "udp") {
            return Err(invalid());
        }
    }

    let valid_port = |p: &str| matches!(p.parse::<u16>(), Ok(p) if p > 0);

    // The host address may itself contain colons (IPv6), so split from the right.
    let mut parts = mapping.rsplitn(3, ':');
    let container = parts.next().ok_or_else(invalid)?;
    let host = parts.next();
    let address = parts.next();

    if !valid_port(container) || host.is_some_and(|h| !valid_port(h)) {
        return Err(invalid());
    }
    if let Some(address) = address {
        let address = address.trim_start_matches('[').trim_end_matches(']');
        address.parse::<IpAddr>().map_err(|_| invalid())?;
    }
    Ok(())
}

/// Parse a memory size such as `512m`, `2g`, `1024k` or plain bytes
pub fn parse_memory_string(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return None;
    }

    let (num_str, unit) = if s.ends_with("gb") || s.ends_with('g') {
        (s.trim_end_matches("gb").trim_end_matches('g'), 1024 * 1024 * 1024u64)
    } else if s.ends_with("mb") || s.ends_with('m') {
        (s.trim_end_matches("mb").trim_end_matches('m'), 1024 * 1024u64)
    } else if s.ends_with("kb") || s.ends_with('k') {
        (s.trim_end_matches("kb").trim_end_matches('k'), 1024u64)
    } else if s.ends_with('b') {
        (s.trim_end_matches('b'), 1u64)
    } else {
        (s.as_str(), 1u64)
    };

    let n = num_str.parse::<f64>().ok()?;
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    Some((n * unit as f64) as u64)
}

// ============================================================================
// Task State
// ============================================================================

/// Facts persisted at start so a monitor can be rebuilt after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_config: TaskConfig,
    pub container_id: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_string() {
        assert_eq!(parse_memory_string("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_string("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_string("1024k"), Some(1024 * 1024));
        assert_eq!(parse_memory_string("1024"), Some(1024));
        assert_eq!(
            parse_memory_string("2.5g"),
            Some((2.5 * 1024.0 * 1024.0 * 1024.0) as u64)
        );
        assert_eq!(parse_memory_string("lots"), None);
        assert_eq!(parse_memory_string("-1m"), None);
        assert_eq!(parse_memory_string(""), None);
    }

    #[test]
    fn test_deserialize_host_config() {
        let raw = r#"{
            "image": "nginx:latest",
            "args": ["-g", "daemon off;"],
            "env": {"MODE": "prod"},
            "volumes": ["mydata:/data"],
            "memory": "256m",
            "cpus": 2
        }"#;
        let config: TaskConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.image, "nginx:latest");
        assert_eq!(config.cpus, 2);
        assert_eq!(config.memory_bytes(), Some(256 * 1024 * 1024));
        assert!(config.network.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert_eq!(TaskConfig::default().validate(), Err(ConfigError::MissingImage));

        let mut config = TaskConfig::new("alpine");
        config.memory = Some("huge".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMemory(_))));

        let config = TaskConfig::new("alpine").with_volume("data:relative");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidVolume(_))));

        let mut config = TaskConfig::new("alpine");
        config.ports = vec!["80:http".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort(_))));

        let config = TaskConfig::new("alpine").with_env("", "x");
        assert_eq!(config.validate(), Err(ConfigError::EmptyEnvKey));
    }

    #[test]
    fn test_port_forms() {
        for ok in [
            "80",
            "8080:80",
            "53:53/udp",
            "443/tcp",
            "127.0.0.1:8080:80",
            "0.0.0.0:5353:53/udp",
            "[::1]:8080:80",
        ] {
            assert!(validate_port(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "0", "1:2:3", "80/sctp", "70000", "localhost:8080:80", "127.0.0.1::80"] {
            assert!(validate_port(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_host_ip_port_validates() {
        let mut config = TaskConfig::new("nginx");
        config.ports = vec!["127.0.0.1:8080:80".to_string()];
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_volume_spec() {
        let named = VolumeSpec::parse("mydata:/data").unwrap();
        assert!(named.is_named());
        assert_eq!(named.destination, "/data");

        let bind = VolumeSpec::parse("/srv/www:/var/www:ro").unwrap();
        assert!(!bind.is_named());
        assert_eq!(bind.options.as_deref(), Some("ro"));
        assert_eq!(bind.to_string(), "/srv/www:/var/www:ro");

        assert!(VolumeSpec::parse("/only-source").is_err());
        assert!(VolumeSpec::parse(":/data").is_err());
        assert!(VolumeSpec::parse("a:/b:").is_err());
    }

    #[test]
    fn test_task_state_serde() {
        let state = TaskState {
            task_config: TaskConfig::new("redis:7"),
            container_id: "cache-1".to_string(),
            started_at: Utc::now(),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
