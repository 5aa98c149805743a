use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use styx_task::container::{
    Configuration, ContainerInfo, ContainerStats, DiskUsage, ExecIo, ImageInfo, Mount,
    NetworkAttachment, NetworkInfo, PublishedPort, UsageEntry, VolumeInfo,
};
use styx_task::{ContainerRuntime, RunOptions, RuntimeError, RuntimeResult};

#[derive(Default)]
struct State {
    containers: BTreeMap<String, ContainerInfo>,
    volumes: BTreeSet<String>,
    networks: BTreeMap<String, String>,
    images: BTreeSet<String>,
    calls: Vec<String>,
    next_host: u8,

    pull_failures: u32,
    run_failure: Option<String>,
    version_failure: bool,
    stats_failure: bool,
    inspect_failure: bool,
    exec_failure: Option<String>,
}

/// In-memory container runtime.
///
/// - containers are "running" from `run` until stopped, killed or
///   `kill_container` simulates an external kill
/// - removing a running container fails, like the real tool
/// - every call is recorded as `"<op> <arg>"`
pub struct FakeRuntime {
    state: Mutex<State>,
    available: AtomicBool,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_host: 2,
                ..Default::default()
            }),
            available: AtomicBool::new(true),
        }
    }

    // ------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// The next `n` pulls fail
    pub fn fail_pulls(&self, n: u32) {
        self.state.lock().pull_failures = n;
    }

    pub fn fail_runs(&self, message: &str) {
        self.state.lock().run_failure = Some(message.to_string());
    }

    pub fn fail_version(&self, fail: bool) {
        self.state.lock().version_failure = fail;
    }

    pub fn fail_stats(&self, fail: bool) {
        self.state.lock().stats_failure = fail;
    }

    /// Inspect fails with a non-NotFound error
    pub fn fail_inspect(&self, fail: bool) {
        self.state.lock().inspect_failure = fail;
    }

    pub fn fail_exec(&self, output: &str) {
        self.state.lock().exec_failure = Some(output.to_string());
    }

    /// The container stops without the driver asking
    pub fn kill_container(&self, id: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(id) {
            c.status = "stopped".to_string();
        }
    }

    /// The container disappears entirely
    pub fn delete_container(&self, id: &str) {
        self.state.lock().containers.remove(id);
    }

    /// Seed a running container, as if left by an earlier driver process
    pub fn add_container(&self, id: &str, image: &str) {
        let info = ContainerInfo {
            status: "running".to_string(),
            configuration: Configuration {
                id: id.to_string(),
                image: ImageInfo {
                    reference: image.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            networks: Vec::new(),
        };
        self.state.lock().containers.insert(id.to_string(), info);
    }

    pub fn add_network(&self, name: &str, subnet: &str) {
        self.state
            .lock()
            .networks
            .insert(name.to_string(), subnet.to_string());
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.state.lock().containers.get(id).cloned()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().volumes.contains(name)
    }

    pub fn network_subnet(&self, name: &str) -> Option<String> {
        self.state.lock().networks.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls of one operation
    pub fn call_count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Position of the first recorded call starting with `prefix`
    pub fn call_index(&self, prefix: &str) -> Option<usize> {
        self.state
            .lock()
            .calls
            .iter()
            .position(|c| c.starts_with(prefix))
    }

    fn record(&self, op: &str, arg: &str) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.calls.push(format!("{} {}", op, arg));
        state
    }
}

fn failed(operation: &'static str, output: impl Into<String>) -> RuntimeError {
    RuntimeError::Execution {
        operation,
        output: output.into(),
    }
}

/// `a.b.c.0/24` -> `a.b.c.<host>/24`
fn address_in(subnet: &str, host: u8) -> String {
    let (base, prefix) = subnet.split_once('/').unwrap_or((subnet, "24"));
    let octets: Vec<&str> = base.split('.').collect();
    if octets.len() == 4 {
        format!("{}.{}.{}.{}/{}", octets[0], octets[1], octets[2], host, prefix)
    } else {
        format!("192.168.64.{}/24", host)
    }
}

/// `[[ip:]host:]container[/proto]`; the container port doubles as host port
fn published_port(raw: &str) -> Option<PublishedPort> {
    let (mapping, protocol) = raw.split_once('/').unwrap_or((raw, "tcp"));
    let mut parts = mapping.rsplitn(3, ':');
    let container_port = parts.next()?.parse().ok()?;
    let host_port = match parts.next() {
        Some(host) => host.parse().ok()?,
        None => container_port,
    };
    Some(PublishedPort {
        host_ip: parts.next().unwrap_or("0.0.0.0").to_string(),
        host_port,
        container_port,
        protocol: protocol.to_string(),
    })
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn version(&self) -> RuntimeResult<String> {
        let state = self.record("version", "");
        if state.version_failure {
            return Err(failed("version", "XPC connection error"));
        }
        Ok("container CLI version 0.5.0".to_string())
    }

    async fn run(&self, opts: &RunOptions) -> RuntimeResult<String> {
        let mut state = self.record("run", opts.name.as_deref().unwrap_or(""));
        if let Some(message) = &state.run_failure {
            return Err(failed("run", message.clone()));
        }

        let id = match &opts.name {
            Some(name) => name.clone(),
            None => format!("fake-{}", state.containers.len() + 1),
        };
        if state.containers.contains_key(&id) {
            return Err(failed("run", format!("container {} already exists", id)));
        }

        let host = state.next_host;
        state.next_host = state.next_host.wrapping_add(1).max(2);

        let networks = match &opts.network {
            Some(network) => {
                let subnet = state
                    .networks
                    .get(network)
                    .cloned()
                    .unwrap_or_else(|| "192.168.64.0/24".to_string());
                vec![NetworkInfo {
                    network: network.clone(),
                    address: address_in(&subnet, host),
                    gateway: address_in(&subnet, 1),
                    hostname: id.clone(),
                }]
            }
            None => Vec::new(),
        };

        let mounts = opts
            .volumes
            .iter()
            .filter_map(|v| {
                let mut parts = v.splitn(3, ':');
                let source = parts.next()?;
                let destination = parts.next()?;
                Some(Mount {
                    kind: serde_json::json!({ "virtiofs": {} }),
                    source: source.to_string(),
                    destination: destination.to_string(),
                    options: parts.next().map(|o| vec![o.to_string()]).unwrap_or_default(),
                })
            })
            .collect();

        let info = ContainerInfo {
            status: "running".to_string(),
            configuration: Configuration {
                id: id.clone(),
                image: ImageInfo {
                    reference: opts.image.clone(),
                    ..Default::default()
                },
                mounts,
                published_ports: opts.ports.iter().filter_map(|p| published_port(p)).collect(),
                networks: opts
                    .network
                    .iter()
                    .map(|n| NetworkAttachment { network: n.clone() })
                    .collect(),
                ..Default::default()
            },
            networks,
        };
        state.containers.insert(id.clone(), info);
        Ok(id)
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.record("stop", id);
        match state.containers.get_mut(id) {
            Some(c) => {
                c.status = "stopped".to_string();
                Ok(())
            }
            None => Err(failed("stop", format!("container {} not found", id))),
        }
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.record("rm", id);
        match state.containers.get(id) {
            Some(c) if c.is_running() => Err(failed("rm", format!("container {} is running", id))),
            Some(_) => {
                state.containers.remove(id);
                Ok(())
            }
            None => Err(failed("rm", format!("container {} not found", id))),
        }
    }

    async fn kill(&self, id: &str, signal: Option<&str>) -> RuntimeResult<()> {
        let mut state = self.record("kill", &format!("{} {}", id, signal.unwrap_or("")));
        match state.containers.get_mut(id) {
            Some(c) if c.is_running() => {
                c.status = "stopped".to_string();
                Ok(())
            }
            Some(_) => Err(failed("kill", format!("container {} is not running", id))),
            None => Err(failed("kill", format!("container {} not found", id))),
        }
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerInfo> {
        let state = self.record("inspect", id);
        if state.inspect_failure {
            return Err(failed("inspect", "XPC connection error"));
        }
        state
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn list(&self, all: bool) -> RuntimeResult<Vec<ContainerInfo>> {
        let state = self.record("list", if all { "-a" } else { "" });
        Ok(state
            .containers
            .values()
            .filter(|c| all || c.is_running())
            .cloned()
            .collect())
    }

    async fn logs(&self, id: &str) -> RuntimeResult<BoxStream<'static, RuntimeResult<String>>> {
        let state = self.record("logs", id);
        if !state.containers.contains_key(id) {
            return Err(failed("logs", format!("container {} not found", id)));
        }
        Ok(Box::pin(stream::iter(vec![Ok(format!("{} started", id))])))
    }

    async fn exec(&self, id: &str, command: &[String]) -> RuntimeResult<Vec<u8>> {
        let state = self.record("exec", id);
        if let Some(output) = &state.exec_failure {
            return Err(failed("exec", output.clone()));
        }
        match state.containers.get(id) {
            Some(c) if c.is_running() => Ok(format!("{}\n", command.join(" ")).into_bytes()),
            _ => Err(failed("exec", format!("container {} is not running", id))),
        }
    }

    async fn exec_interactive(
        &self,
        id: &str,
        _command: &[String],
        mut io: ExecIo,
    ) -> RuntimeResult<()> {
        {
            let state = self.record("exec", id);
            if !state.containers.get(id).map(|c| c.is_running()).unwrap_or(false) {
                return Err(failed("exec", format!("container {} is not running", id)));
            }
        }

        // Behaves like `cat`
        tokio::io::copy(&mut io.stdin, &mut io.stdout)
            .await
            .map_err(|source| RuntimeError::Io {
                operation: "exec",
                source,
            })?;
        Ok(())
    }

    async fn stats(&self, id: &str) -> RuntimeResult<ContainerStats> {
        let state = self.record("stats", id);
        if state.stats_failure {
            return Err(failed("stats", "stats unavailable"));
        }
        match state.containers.get(id) {
            Some(c) if c.is_running() => Ok(ContainerStats {
                id: id.to_string(),
                cpu_percent: 12.5,
                memory_usage_bytes: 64 * 1024 * 1024,
                memory_limit_bytes: 512 * 1024 * 1024,
                ..Default::default()
            }),
            _ => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn pull(&self, image: &str) -> RuntimeResult<()> {
        let mut state = self.record("pull", image);
        if state.pull_failures > 0 {
            state.pull_failures -= 1;
            return Err(failed("image pull", format!("failed to fetch {}", image)));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn disk_usage(&self) -> RuntimeResult<DiskUsage> {
        let state = self.record("df", "");
        Ok(DiskUsage {
            images: UsageEntry {
                total: state.images.len() as u64,
                ..Default::default()
            },
            containers: UsageEntry {
                total: state.containers.len() as u64,
                active: state.containers.values().filter(|c| c.is_running()).count() as u64,
                ..Default::default()
            },
            volumes: UsageEntry {
                total: state.volumes.len() as u64,
                ..Default::default()
            },
        })
    }

    async fn prune(&self) -> RuntimeResult<()> {
        let mut state = self.record("prune", "");
        state.images.clear();
        Ok(())
    }

    async fn volume_list(&self) -> RuntimeResult<Vec<VolumeInfo>> {
        let state = self.record("volume-list", "");
        Ok(state
            .volumes
            .iter()
            .map(|name| VolumeInfo {
                name: name.clone(),
                driver: "local".to_string(),
                source: String::new(),
            })
            .collect())
    }

    async fn volume_create(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.record("volume-create", name);
        if !state.volumes.insert(name.to_string()) {
            return Err(failed("volume create", format!("volume {} already exists", name)));
        }
        Ok(())
    }

    async fn volume_remove(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.record("volume-rm", name);
        if !state.volumes.remove(name) {
            return Err(failed("volume remove", format!("volume {} not found", name)));
        }
        Ok(())
    }

    async fn network_list(&self) -> RuntimeResult<Vec<String>> {
        let state = self.record("network-list", "");
        Ok(state.networks.keys().cloned().collect())
    }

    async fn network_create(&self, name: &str, subnet: &str) -> RuntimeResult<()> {
        let mut state = self.record("network-create", name);
        if state.networks.contains_key(name) {
            return Err(failed("network create", format!("network {} already exists", name)));
        }
        state.networks.insert(name.to_string(), subnet.to_string());
        Ok(())
    }

    async fn network_delete(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.record("network-delete", name);
        if state.networks.remove(name).is_none() {
            return Err(failed("network delete", format!("network {} not found", name)));
        }
        Ok(())
    }
}
