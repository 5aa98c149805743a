//! Host-facing data types of the plugin contract

use crate::state::{ExitResult, TaskLifecycle};
use crate::task::{TaskConfig, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Plugin metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub plugin_api_versions: Vec<String>,
    pub plugin_version: String,
}

/// Filesystem isolation offered to tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsIsolation {
    None,
    Chroot,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub send_signals: bool,
    pub exec: bool,
    pub fs_isolation: FsIsolation,
}

// ============================================================================
// Start request
// ============================================================================

/// Host-provided per-task directories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDir {
    pub local_dir: PathBuf,
    pub secrets_dir: PathBuf,
    pub shared_alloc_dir: PathBuf,
}

impl TaskDir {
    /// Conventional layout: `<alloc>/<task>/local`, `<alloc>/<task>/secrets`,
    /// `<alloc>/alloc`
    pub fn new(alloc_dir: &Path, task_name: &str) -> Self {
        let task_dir = alloc_dir.join(task_name);
        Self {
            local_dir: task_dir.join("local"),
            secrets_dir: task_dir.join("secrets"),
            shared_alloc_dir: alloc_dir.join("alloc"),
        }
    }

    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in [&self.local_dir, &self.secrets_dir, &self.shared_alloc_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedPort {
    pub label: String,
    pub value: u16,
    #[serde(default)]
    pub to: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedResources {
    pub ports: Vec<AllocatedPort>,
    pub cpu_shares: i64,
    pub memory_mb: i64,
}

impl AllocatedResources {
    /// Port label to allocated host port
    pub fn port_map(&self) -> BTreeMap<String, u16> {
        self.ports
            .iter()
            .map(|p| (p.label.clone(), p.value))
            .collect()
    }
}

/// A start request as delivered by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostTaskConfig {
    pub id: String,
    pub name: String,
    pub alloc_id: String,
    pub task_dir: TaskDir,
    pub resources: Option<AllocatedResources>,
    /// Task author's driver block, decoded into `TaskConfig`
    pub driver_config: serde_json::Value,
}

impl HostTaskConfig {
    pub fn decode_driver_config(&self) -> serde_json::Result<TaskConfig> {
        if self.driver_config.is_null() {
            return Ok(TaskConfig::default());
        }
        serde_json::from_value(self.driver_config.clone())
    }
}

// ============================================================================
// Recovery payload
// ============================================================================

/// Opaque-to-the-host recovery payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Format version of `state`
    pub version: u32,
    pub config: HostTaskConfig,
    pub state: Vec<u8>,
}

pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

/// Serializes task state into a handle's payload
pub trait StateCodec: Send + Sync {
    fn encode(&self, state: &TaskState) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, raw: &[u8]) -> Result<TaskState, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStateCodec;

impl StateCodec for JsonStateCodec {
    fn encode(&self, state: &TaskState) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(state)?)
    }

    fn decode(&self, raw: &[u8]) -> Result<TaskState, CodecError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

// ============================================================================
// Status, network, stats
// ============================================================================

/// Address and port map advertised for service registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverNetwork {
    pub ip: String,
    pub auto_advertise: bool,
    pub port_map: BTreeMap<String, u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub name: String,
    pub state: TaskLifecycle,
    pub started_at: DateTime<Utc>,
    /// Set only once exited
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_result: Option<ExitResult>,
    pub driver_attributes: BTreeMap<String, String>,
}

/// One resource usage sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResourceUsage {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_max_bytes: u64,
}

impl TaskResourceUsage {
    /// Sample emitted when stats are unavailable
    pub fn zero() -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: 0.0,
            memory_rss_bytes: 0,
            memory_max_bytes: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_percent == 0.0 && self.memory_rss_bytes == 0 && self.memory_max_bytes == 0
    }
}

impl From<crate::container::ContainerStats> for TaskResourceUsage {
    fn from(stats: crate::container::ContainerStats) -> Self {
        Self {
            timestamp: Utc::now(),
            cpu_percent: stats.cpu_percent,
            memory_rss_bytes: stats.memory_usage_bytes,
            memory_max_bytes: stats.memory_limit_bytes,
        }
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Undetected,
    Unhealthy,
    Healthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    String(String),
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attribute::Bool(b) => write!(f, "{}", b),
            Attribute::Int(i) => write!(f, "{}", i),
            Attribute::String(s) => f.write_str(s),
        }
    }
}

/// A periodic health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub health: HealthState,
    pub description: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Fingerprint {
    pub fn new(health: HealthState, description: impl Into<String>) -> Self {
        Self {
            health,
            description: description.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Exec and events
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecTaskResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_result: ExitResult,
}

/// Lifecycle notice published to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub alloc_id: String,
    pub task_name: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub annotations: BTreeMap<String, String>,
}

impl TaskEvent {
    pub fn new(config: &HostTaskConfig, message: impl Into<String>) -> Self {
        Self {
            task_id: config.id.clone(),
            alloc_id: config.alloc_id.clone(),
            task_name: config.name.clone(),
            timestamp: Utc::now(),
            message: message.into(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_dir_layout() {
        let dirs = TaskDir::new(Path::new("/var/alloc/a1"), "web");
        assert_eq!(dirs.local_dir, Path::new("/var/alloc/a1/web/local"));
        assert_eq!(dirs.secrets_dir, Path::new("/var/alloc/a1/web/secrets"));
        assert_eq!(dirs.shared_alloc_dir, Path::new("/var/alloc/a1/alloc"));
    }

    #[test]
    fn test_decode_driver_config() {
        let config = HostTaskConfig {
            driver_config: serde_json::json!({"image": "nginx", "ports": ["8080:80"]}),
            ..Default::default()
        };
        let task = config.decode_driver_config().unwrap();
        assert_eq!(task.image, "nginx");
        assert_eq!(task.ports, vec!["8080:80"]);

        let bad = HostTaskConfig {
            driver_config: serde_json::json!({"image": 7}),
            ..Default::default()
        };
        assert!(bad.decode_driver_config().is_err());
    }

    #[test]
    fn test_port_map() {
        let resources = AllocatedResources {
            ports: vec![
                AllocatedPort {
                    label: "http".to_string(),
                    value: 24000,
                    to: 80,
                },
                AllocatedPort {
                    label: "admin".to_string(),
                    value: 24001,
                    to: 0,
                },
            ],
            ..Default::default()
        };
        let map = resources.port_map();
        assert_eq!(map["http"], 24000);
        assert_eq!(map["admin"], 24001);
    }

    #[test]
    fn test_json_codec() {
        let state = TaskState {
            task_config: TaskConfig::new("alpine"),
            container_id: "c-9".to_string(),
            started_at: Utc::now(),
        };
        let codec = JsonStateCodec;
        let raw = codec.encode(&state).unwrap();
        assert_eq!(codec.decode(&raw).unwrap(), state);
        assert!(codec.decode(b"not json").is_err());
    }

    #[test]
    fn test_attribute_serializes_bare() {
        let fp = Fingerprint::new(HealthState::Healthy, "Healthy")
            .with_attribute("driver.apple-container", Attribute::Bool(true));
        let json = serde_json::to_value(&fp).unwrap();
        assert_eq!(json["attributes"]["driver.apple-container"], true);
        assert_eq!(json["health"], "healthy");
    }
}
