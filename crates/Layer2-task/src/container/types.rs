//! Typed views of the container tool's JSON output, plus run options

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

// ============================================================================
// Inspect / List
// ============================================================================

/// A record from `container list` or `container inspect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerInfo {
    pub status: String,
    pub configuration: Configuration,
    pub networks: Vec<NetworkInfo>,
}

impl ContainerInfo {
    pub fn id(&self) -> &str {
        &self.configuration.id
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// Usable address of the first attached network
    pub fn primary_ip(&self) -> Option<&str> {
        self.networks.first().and_then(NetworkInfo::ip)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    pub id: String,
    pub image: ImageInfo,
    pub resources: Resources,
    pub platform: Platform,
    pub init_process: InitProcess,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub published_ports: Vec<PublishedPort>,
    pub networks: Vec<NetworkAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageInfo {
    pub reference: String,
    pub descriptor: ImageDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub size: i64,
    pub media_type: String,
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Resources {
    pub memory_in_bytes: i64,
    pub cpus: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InitProcess {
    pub working_directory: String,
    pub executable: String,
    pub arguments: Vec<String>,
    pub environment: Vec<String>,
    pub terminal: bool,
}

/// A mount of the container. `type` is an object such as `{"virtiofs":{}}`
/// for bind mounts, so it is kept as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: serde_json::Value,
    pub source: String,
    pub destination: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublishedPort {
    #[serde(rename = "hostIP", skip_serializing_if = "String::is_empty")]
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAttachment {
    pub network: String,
}

/// Runtime network state of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    pub network: String,
    /// CIDR form, e.g. `192.168.64.4/24`
    pub address: String,
    pub gateway: String,
    pub hostname: String,
}

impl NetworkInfo {
    /// The address portion before the prefix length
    pub fn ip(&self) -> Option<&str> {
        let ip = match self.address.split_once('/') {
            Some((ip, _)) => ip,
            None => self.address.as_str(),
        };
        (!ip.is_empty()).then_some(ip)
    }
}

// ============================================================================
// Stats / Disk usage / Volumes
// ============================================================================

/// One sample from `container stats --no-stream`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerStats {
    pub id: String,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

/// Output of `container system df`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskUsage {
    pub images: UsageEntry,
    pub containers: UsageEntry,
    pub volumes: UsageEntry,
}

impl DiskUsage {
    pub fn total_reclaimable(&self) -> u64 {
        self.images.reclaimable + self.containers.reclaimable + self.volumes.reclaimable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageEntry {
    pub total: u64,
    pub active: u64,
    pub size_in_bytes: u64,
    pub reclaimable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeInfo {
    pub name: String,
    pub driver: String,
    pub source: String,
}

// ============================================================================
// Run options
// ============================================================================

/// Arguments for `container run`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    pub name: Option<String>,
    pub image: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `host:container` or `container`
    pub ports: Vec<String>,
    /// `source:dest[:options]`
    pub volumes: Vec<String>,
    pub memory: Option<String>,
    pub cpus: Option<u32>,
    pub working_dir: Option<String>,
    pub network: Option<String>,
    pub detach: bool,
    pub remove: bool,
}

impl RunOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }

    /// Arguments following the `run` subcommand
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![];

        if let Some(name) = &self.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }

        if self.detach {
            args.push("-d".to_string());
        }

        if self.remove {
            args.push("--rm".to_string());
        }

        // Resource limits
        if let Some(memory) = &self.memory {
            args.push("-m".to_string());
            args.push(memory.clone());
        }
        if let Some(cpus) = self.cpus.filter(|c| *c > 0) {
            args.push("-c".to_string());
            args.push(cpus.to_string());
        }

        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }

        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        for port in &self.ports {
            args.push("-p".to_string());
            args.push(port.clone());
        }

        for volume in &self.volumes {
            args.push("-v".to_string());
            args.push(volume.clone());
        }

        args.push(self.image.clone());

        if let Some(command) = &self.command {
            args.push(command.clone());
        }

        args.extend(self.args.iter().cloned());

        args
    }
}

// ============================================================================
// Interactive exec
// ============================================================================

/// Caller-owned streams wired to an interactive exec session
pub struct ExecIo {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ExecIo {
    pub fn new(
        stdin: impl AsyncRead + Send + Unpin + 'static,
        stdout: impl AsyncWrite + Send + Unpin + 'static,
        stderr: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }
}

impl std::fmt::Debug for ExecIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecIo").finish_non_exhaustive()
    }
}
