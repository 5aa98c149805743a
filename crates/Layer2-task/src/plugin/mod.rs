//! Host plugin contract
//!
//! The interface the host orchestrator drives. `Driver` implements it; all
//! host-protocol marshalling stays on the host side of this trait.

mod schema;
mod types;

pub use schema::{config_spec, task_config_spec, AttrSpec, AttrType, ObjectSpec};
pub use types::{
    AllocatedPort, AllocatedResources, Attribute, Capabilities, CodecError, DriverNetwork,
    ExecTaskResult, Fingerprint, FsIsolation, HealthState, HostTaskConfig, JsonStateCodec,
    PluginInfo, StateCodec, TaskDir, TaskEvent, TaskHandle, TaskResourceUsage, TaskStatus,
};

use crate::container::ExecIo;
use crate::driver::DriverResult;
use crate::state::ExitResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use styx_foundation::DriverConfig;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Name the plugin registers under
pub const PLUGIN_NAME: &str = "apple-container";

pub const PLUGIN_VERSION: &str = "v0.1.0";

pub const API_VERSION: &str = "0.1.0";

/// Format version of persisted task handles
pub const TASK_HANDLE_VERSION: u32 = 1;

pub fn plugin_info() -> PluginInfo {
    PluginInfo {
        name: PLUGIN_NAME.to_string(),
        plugin_type: "driver".to_string(),
        plugin_api_versions: vec![API_VERSION.to_string()],
        plugin_version: PLUGIN_VERSION.to_string(),
    }
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        send_signals: true,
        exec: true,
        fs_isolation: FsIsolation::Image,
    }
}

/// Task driver contract
#[async_trait]
pub trait DriverPlugin: Send + Sync {
    fn plugin_info(&self) -> PluginInfo {
        plugin_info()
    }

    fn config_schema(&self) -> ObjectSpec {
        config_spec()
    }

    fn task_config_schema(&self) -> ObjectSpec {
        task_config_spec()
    }

    fn capabilities(&self) -> Capabilities {
        capabilities()
    }

    /// Apply plugin-level configuration from the host
    fn set_config(&self, config: DriverConfig) -> DriverResult<()>;

    /// Periodic health reports until `ctx` or the driver is cancelled
    fn fingerprint(&self, ctx: CancellationToken) -> BoxStream<'static, Fingerprint>;

    async fn start_task(
        &self,
        config: HostTaskConfig,
    ) -> DriverResult<(TaskHandle, Option<DriverNetwork>)>;

    async fn recover_task(&self, handle: &TaskHandle) -> DriverResult<()>;

    /// Fires once with the exit result. Dropped without a value if `ctx` is
    /// cancelled or the task is destroyed first.
    async fn wait_task(
        &self,
        ctx: CancellationToken,
        task_id: &str,
    ) -> DriverResult<oneshot::Receiver<ExitResult>>;

    async fn stop_task(
        &self,
        task_id: &str,
        timeout: Duration,
        signal: Option<&str>,
    ) -> DriverResult<()>;

    /// Idempotent; unknown identifiers are not an error
    async fn destroy_task(&self, task_id: &str, force: bool) -> DriverResult<()>;

    async fn inspect_task(&self, task_id: &str) -> DriverResult<TaskStatus>;

    async fn task_stats(
        &self,
        ctx: CancellationToken,
        task_id: &str,
        interval: Duration,
    ) -> DriverResult<BoxStream<'static, TaskResourceUsage>>;

    fn task_events(&self, ctx: CancellationToken) -> BoxStream<'static, TaskEvent>;

    async fn signal_task(&self, task_id: &str, signal: &str) -> DriverResult<()>;

    async fn exec_task(
        &self,
        task_id: &str,
        command: &[String],
        timeout: Duration,
    ) -> DriverResult<ExecTaskResult>;

    async fn exec_task_streaming(
        &self,
        task_id: &str,
        command: &[String],
        io: ExecIo,
    ) -> DriverResult<ExitResult>;

    fn shutdown(&self);
}
