//! Container task driver
//!
//! Top-level controller behind the host plugin contract. Owns the task table,
//! runs the start/recover pipelines, and serves the fingerprint, stats and
//! event streams.
//!
//! Cancellation tiers:
//! - the driver token stops fingerprint and event streams (`shutdown`)
//! - each monitor has its own token, cancelled only by `destroy_task`
//! - callers pass a `CancellationToken` for wait/stats/fingerprint streams

mod error;
mod events;
mod fingerprint;
mod start;

pub use error::{DriverError, DriverResult};
pub use fingerprint::build_fingerprint;
pub use start::container_name;

use crate::container::{shared_runtime, CliRuntime, ContainerRuntime, ExecIo, SharedRuntime};
use crate::monitor::TaskMonitor;
use crate::plugin::{
    DriverNetwork, DriverPlugin, ExecTaskResult, Fingerprint, HostTaskConfig, JsonStateCodec,
    StateCodec, TaskEvent, TaskHandle, TaskResourceUsage, TaskStatus,
};
use crate::state::{ExitResult, TaskLifecycle};
use crate::table::TaskTable;
use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use styx_foundation::DriverConfig;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the task event channel
const EVENT_BUFFER: usize = 64;

/// Apple container task driver
pub struct Driver {
    /// Swapped by `set_config`; monitors and streams read it on every poll
    runtime: SharedRuntime,
    config: Arc<RwLock<DriverConfig>>,
    tasks: Arc<TaskTable>,
    codec: Arc<dyn StateCodec>,
    events: broadcast::Sender<TaskEvent>,
    cancel: CancellationToken,
}

impl Driver {
    /// Driver backed by the container tool named in `config`
    pub fn new(config: DriverConfig) -> Self {
        let runtime = Arc::new(CliRuntime::from_config(&config));
        Self::with_runtime(runtime, config)
    }

    pub fn with_runtime(runtime: Arc<dyn ContainerRuntime>, config: DriverConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            runtime: shared_runtime(runtime),
            config: Arc::new(RwLock::new(config)),
            tasks: Arc::new(TaskTable::new()),
            codec: Arc::new(JsonStateCodec),
            events,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn StateCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Use an externally owned task table
    pub fn with_table(mut self, tasks: Arc<TaskTable>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&*self.runtime.read())
    }

    pub fn config(&self) -> DriverConfig {
        self.config.read().clone()
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    async fn monitor(&self, task_id: &str) -> DriverResult<Arc<TaskMonitor>> {
        self.tasks
            .get(task_id)
            .await
            .ok_or_else(|| DriverError::NotFound(task_id.to_string()))
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &*self.config.read())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DriverPlugin for Driver {
    fn set_config(&self, config: DriverConfig) -> DriverResult<()> {
        config
            .validate()
            .map_err(|e| DriverError::InvalidRequest(e.to_string()))?;

        info!(bin = %config.container_bin(), "applying driver config");
        *self.runtime.write() = Arc::new(CliRuntime::from_config(&config));
        *self.config.write() = config;
        Ok(())
    }

    fn fingerprint(&self, ctx: CancellationToken) -> BoxStream<'static, Fingerprint> {
        self.fingerprint_stream(ctx)
    }

    async fn start_task(
        &self,
        config: HostTaskConfig,
    ) -> DriverResult<(TaskHandle, Option<DriverNetwork>)> {
        self.start(config).await
    }

    async fn recover_task(&self, handle: &TaskHandle) -> DriverResult<()> {
        self.recover(handle).await
    }

    async fn wait_task(
        &self,
        ctx: CancellationToken,
        task_id: &str,
    ) -> DriverResult<oneshot::Receiver<ExitResult>> {
        let monitor = self.monitor(task_id).await?;
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            tokio::select! {
                _ = ctx.cancelled() => {}
                exit = monitor.wait() => {
                    if let Some(exit) = exit {
                        let _ = tx.send(exit);
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn stop_task(
        &self,
        task_id: &str,
        timeout: Duration,
        signal: Option<&str>,
    ) -> DriverResult<()> {
        let monitor = self.monitor(task_id).await?;
        let runtime = self.runtime();
        let container_id = monitor.container_id();

        info!(task_id, container_id, "stopping task");

        if let Some(signal) = signal.filter(|s| !s.is_empty()) {
            if let Err(e) = runtime.kill(container_id, Some(signal)).await {
                warn!(task_id, signal, error = %e, "failed to send signal");
            }
        }

        match tokio::time::timeout(timeout, runtime.stop(container_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DriverError::Timeout {
                operation: "stop",
                timeout,
            }),
        }
    }

    async fn destroy_task(&self, task_id: &str, force: bool) -> DriverResult<()> {
        // Removal comes first so no lookup sees a half-destroyed task.
        let Some(monitor) = self.tasks.remove(task_id).await else {
            debug!(task_id, "destroy of unknown task ignored");
            return Ok(());
        };

        let container_id = monitor.container_id();
        info!(task_id, container_id, force, "destroying task");
        monitor.shutdown();

        let runtime = self.runtime();
        if force || monitor.lifecycle() == TaskLifecycle::Running {
            if let Err(e) = runtime.stop(container_id).await {
                debug!(task_id, container_id, error = %e, "stop before remove failed");
            }
        }
        if let Err(e) = runtime.remove(container_id).await {
            warn!(task_id, container_id, error = %e, "failed to remove container");
        }

        Ok(())
    }

    async fn inspect_task(&self, task_id: &str) -> DriverResult<TaskStatus> {
        Ok(self.monitor(task_id).await?.task_status())
    }

    async fn task_stats(
        &self,
        ctx: CancellationToken,
        task_id: &str,
        interval: Duration,
    ) -> DriverResult<BoxStream<'static, TaskResourceUsage>> {
        if interval.is_zero() {
            return Err(DriverError::InvalidRequest(
                "stats interval must be greater than zero".to_string(),
            ));
        }
        let monitor = self.monitor(task_id).await?;
        let runtime = self.runtime();
        let container_id = monitor.container_id().to_string();

        Ok(Box::pin(async_stream::stream! {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match runtime.stats(&container_id).await {
                    Ok(stats) => yield TaskResourceUsage::from(stats),
                    Err(e) => {
                        debug!(container_id = %container_id, error = %e, "stats unavailable");
                        yield TaskResourceUsage::zero();
                    }
                }
            }
        }))
    }

    fn task_events(&self, ctx: CancellationToken) -> BoxStream<'static, TaskEvent> {
        self.event_stream(ctx)
    }

    async fn signal_task(&self, task_id: &str, signal: &str) -> DriverResult<()> {
        let monitor = self.monitor(task_id).await?;
        debug!(task_id, signal, "signalling task");
        Ok(self
            .runtime()
            .kill(monitor.container_id(), Some(signal))
            .await?)
    }

    async fn exec_task(
        &self,
        task_id: &str,
        command: &[String],
        timeout: Duration,
    ) -> DriverResult<ExecTaskResult> {
        let monitor = self.monitor(task_id).await?;
        let runtime = self.runtime();

        let result = tokio::time::timeout(timeout, runtime.exec(monitor.container_id(), command))
            .await
            .unwrap_or_else(|_| {
                Err(crate::container::RuntimeError::Execution {
                    operation: "exec",
                    output: format!("timed out after {:?}", timeout),
                })
            });

        Ok(match result {
            Ok(stdout) => ExecTaskResult {
                stdout,
                stderr: Vec::new(),
                exit_result: ExitResult::default(),
            },
            Err(e) => ExecTaskResult {
                stdout: e.output().map(|o| o.as_bytes().to_vec()).unwrap_or_default(),
                stderr: Vec::new(),
                exit_result: ExitResult::failed(e.to_string()),
            },
        })
    }

    async fn exec_task_streaming(
        &self,
        task_id: &str,
        command: &[String],
        io: ExecIo,
    ) -> DriverResult<ExitResult> {
        let monitor = self.monitor(task_id).await?;
        debug!(task_id, ?command, "exec streaming");

        match self
            .runtime()
            .exec_interactive(monitor.container_id(), command, io)
            .await
        {
            Ok(()) => Ok(ExitResult::default()),
            Err(e) => Ok(ExitResult::failed(e.to_string())),
        }
    }

    fn shutdown(&self) {
        info!("driver shutting down");
        self.cancel.cancel();
    }
}
