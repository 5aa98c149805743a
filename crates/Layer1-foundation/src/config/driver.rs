//! Driver configuration
//!
//! Plugin-level settings delivered by the host (or loaded by the CLI):
//! where the container tool lives, which network tasks join by default,
//! and the timing of the background loops.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Config file name inside the global store
pub const DRIVER_CONFIG_FILE: &str = "driver.json";

/// Well-known location of the container tool
pub const DEFAULT_CONTAINER_BIN: &str = "/usr/local/bin/container";

/// Environment variable overriding `container_bin_path`
pub const CONTAINER_BIN_ENV: &str = "STYX_CONTAINER_BIN";

/// Shared network every task joins unless it names its own
pub const DEFAULT_NETWORK_NAME: &str = "styx";

/// Subnet of the shared network
pub const DEFAULT_NETWORK_SUBNET: &str = "192.168.200.0/24";

// ============================================================================
// Driver Config
// ============================================================================

/// Plugin-level configuration of the container driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Path to the container tool binary. Empty means the default location.
    pub container_bin_path: String,

    /// Default network attachment
    pub network: NetworkSettings,

    /// Period of the health fingerprint stream
    pub fingerprint_period_secs: u64,

    /// Poll interval of each task's watch loop
    pub watch_interval_ms: u64,

    /// Image pull retry policy
    pub pull: PullSettings,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            container_bin_path: DEFAULT_CONTAINER_BIN.to_string(),
            network: NetworkSettings::default(),
            fingerprint_period_secs: 30,
            watch_interval_ms: 2000,
            pull: PullSettings::default(),
        }
    }
}

/// Network the driver attaches tasks to by default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub name: String,
    pub subnet: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_NETWORK_NAME.to_string(),
            subnet: DEFAULT_NETWORK_SUBNET.to_string(),
        }
    }
}

/// Image pull retry policy: `attempts` tries, waiting `n * backoff_secs`
/// after the n-th failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullSettings {
    pub attempts: u32,
    pub backoff_secs: u64,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_secs: 5,
        }
    }
}

impl PullSettings {
    /// Wait after the given 1-based failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_secs * u64::from(attempt))
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Layered load: global store, then an explicit file, then the environment.
    /// Each layer overrides exactly the keys it sets.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(layer) = global.load_optional::<Value>(DRIVER_CONFIG_FILE)? {
                debug!(path = %global.file_path(DRIVER_CONFIG_FILE).display(), "loaded global driver config");
                config.merge(&layer)?;
            }
        }

        if let Some(path) = explicit {
            config.merge_file(path)?;
        }

        if let Ok(bin) = std::env::var(CONTAINER_BIN_ENV) {
            if !bin.is_empty() {
                config.container_bin_path = bin;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a single file over the defaults
    pub fn load_file(path: &Path) -> Result<Self> {
        let mut config = Self::new();
        config.merge_file(path)?;
        Ok(config)
    }

    /// Merge a `.json` or `.toml` file on top of this config
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let layer = read_layer(path)?;
        self.merge(&layer)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Apply a partial config on top of this one. Keys present in `layer`
    /// win, even when they equal the built-in default; absent keys keep
    /// their current value.
    pub fn merge(&mut self, layer: &Value) -> Result<()> {
        if !layer.is_object() {
            return Err(Error::Config("driver config must be a table".to_string()));
        }

        let mut merged = serde_json::to_value(&*self)?;
        merge_values(&mut merged, layer);
        *self = serde_json::from_value(merged)?;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Binary path with the empty string mapped to the default location
    pub fn container_bin(&self) -> &str {
        if self.container_bin_path.is_empty() {
            DEFAULT_CONTAINER_BIN
        } else {
            &self.container_bin_path
        }
    }

    pub fn fingerprint_period(&self) -> Duration {
        Duration::from_secs(self.fingerprint_period_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pull.attempts == 0 {
            return Err(Error::Config("pull.attempts must be at least 1".to_string()));
        }
        if self.fingerprint_period_secs == 0 {
            return Err(Error::Config(
                "fingerprint_period_secs must be greater than zero".to_string(),
            ));
        }
        if self.watch_interval_ms == 0 {
            return Err(Error::Config(
                "watch_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.network.name.is_empty() {
            return Err(Error::Config("network.name must not be empty".to_string()));
        }
        validate_subnet(&self.network.subnet)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn container_bin_path(mut self, path: impl Into<String>) -> Self {
        self.container_bin_path = path.into();
        self
    }

    pub fn fingerprint_period_secs(mut self, secs: u64) -> Self {
        self.fingerprint_period_secs = secs;
        self
    }

    pub fn watch_interval_ms(mut self, ms: u64) -> Self {
        self.watch_interval_ms = ms;
        self
    }
}

fn validate_subnet(subnet: &str) -> Result<()> {
    let invalid = || Error::Config(format!("Invalid subnet '{}'", subnet));

    let (addr, prefix) = subnet.split_once('/').ok_or_else(invalid)?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok(())
}

/// Read one config layer, choosing the format by extension
fn read_layer(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => {
            let table: toml::Table = toml::from_str(&content)?;
            Ok(serde_json::to_value(table)?)
        }
        Some("json") | None => Ok(serde_json::from_str(&content)?),
        Some(other) => Err(Error::Config(format!(
            "Unsupported config format '{}' for {}",
            other,
            path.display()
        ))),
    }
}

/// Recursive key-wise overlay of JSON objects
fn merge_values(base: &mut Value, layer: &Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, layer) => *base = layer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.container_bin(), "/usr/local/bin/container");
        assert_eq!(config.network.name, "styx");
        assert_eq!(config.network.subnet, "192.168.200.0/24");
        assert_eq!(config.fingerprint_period(), Duration::from_secs(30));
        assert_eq!(config.watch_interval(), Duration::from_secs(2));
        assert_eq!(config.pull.attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_bin_path_means_default() {
        let config: DriverConfig = serde_json::from_str(r#"{"container_bin_path": ""}"#).unwrap();
        assert_eq!(config.container_bin(), DEFAULT_CONTAINER_BIN);
    }

    #[test]
    fn test_pull_backoff_is_linear() {
        let pull = PullSettings::default();
        assert_eq!(pull.backoff(1), Duration::from_secs(5));
        assert_eq!(pull.backoff(2), Duration::from_secs(10));
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut base = DriverConfig::default().watch_interval_ms(500);

        base.merge(&serde_json::json!({ "container_bin_path": "/opt/bin/container" }))
            .unwrap();
        assert_eq!(base.container_bin_path, "/opt/bin/container");
        assert_eq!(base.watch_interval_ms, 500);
    }

    #[test]
    fn test_explicit_default_overrides_global() {
        let mut config = DriverConfig::default();
        config
            .merge(&serde_json::json!({
                "container_bin_path": "/opt/old/container",
                "pull": { "attempts": 7, "backoff_secs": 9 }
            }))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.json");
        std::fs::write(
            &path,
            r#"{"container_bin_path": "/usr/local/bin/container", "pull": {"attempts": 3}}"#,
        )
        .unwrap();
        config.merge_file(&path).unwrap();

        assert_eq!(config.container_bin_path, DEFAULT_CONTAINER_BIN);
        assert_eq!(config.pull.attempts, 3);
        assert_eq!(config.pull.backoff_secs, 9);
    }

    #[test]
    fn test_merge_rejects_non_table() {
        let mut config = DriverConfig::default();
        assert!(matches!(
            config.merge(&serde_json::json!(["styx"])),
            Err(Error::Config(_))
        ));
        assert!(config.merge(&serde_json::json!({ "pull": { "attempts": "many" } })).is_err());
        assert_eq!(config, DriverConfig::default());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        std::fs::write(
            &path,
            "container_bin_path = \"/tmp/container\"\n[network]\nname = \"lab\"\n",
        )
        .unwrap();

        let config = DriverConfig::load_file(&path).unwrap();
        assert_eq!(config.container_bin_path, "/tmp/container");
        assert_eq!(config.network.name, "lab");
        assert_eq!(config.network.subnet, DEFAULT_NETWORK_SUBNET);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.yaml");
        std::fs::write(&path, "a: b").unwrap();

        assert!(matches!(DriverConfig::load_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = DriverConfig::default();
        config.pull.attempts = 0;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.network.subnet = "192.168.200.0".to_string();
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.network.subnet = "192.168.200.0/40".to_string();
        assert!(config.validate().is_err());

        assert!(DriverConfig::default().fingerprint_period_secs(0).validate().is_err());
    }
}
