//! Task monitor
//!
//! Live state of exactly one container-backed task. A background watch loop
//! polls the runtime for liveness; once the container is gone the exit slot
//! is filled (once) and completion is signalled to every waiter.

use crate::container::{ContainerRuntime, SharedRuntime};
use crate::plugin::TaskStatus;
use crate::state::{ExitResult, TaskLifecycle};
use crate::task::{TaskConfig, TaskState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consecutive failed liveness checks after which the container is
/// treated as gone
pub const MAX_LIVENESS_FAILURES: u32 = 3;

#[derive(Debug, Clone)]
struct Exited {
    result: ExitResult,
    completed_at: DateTime<Utc>,
}

/// Runtime object tracking one task's container and exit state
pub struct TaskMonitor {
    task_id: String,
    task_name: String,
    container_id: String,
    config: Arc<TaskConfig>,
    started_at: DateTime<Utc>,
    runtime: SharedRuntime,

    /// Empty while running; written once by the watch loop
    exit: RwLock<Option<Exited>>,

    done: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl TaskMonitor {
    pub fn new(
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        state: TaskState,
        runtime: SharedRuntime,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            container_id: state.container_id,
            config: Arc::new(state.task_config),
            started_at: state.started_at,
            runtime,
            exit: RwLock::new(None),
            done,
            cancel: CancellationToken::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ========================================================================
    // Watch loop
    // ========================================================================

    /// Start the watch loop on the current runtime
    pub fn spawn_watch(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).watch(interval))
    }

    async fn watch(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(task_id = %self.task_id, container_id = %self.container_id, "watch loop started");

        let mut failures = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(task_id = %self.task_id, "watch loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let runtime = Arc::clone(&*self.runtime.read());
                    match runtime.is_running(&self.container_id).await {
                        Ok(true) => failures = 0,
                        Ok(false) => {
                            info!(task_id = %self.task_id, container_id = %self.container_id, "container exited");
                            self.record_exit(ExitResult::synthetic());
                            break;
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(task_id = %self.task_id, failures, error = %e, "liveness check failed");
                            if failures >= MAX_LIVENESS_FAILURES {
                                info!(task_id = %self.task_id, container_id = %self.container_id, "container unreachable, treating as exited");
                                self.record_exit(ExitResult::lost(e.to_string()));
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.done.send_replace(true);
    }

    /// Fill the exit slot unless it is already set
    fn record_exit(&self, result: ExitResult) -> bool {
        let mut exit = self.exit.write();
        if exit.is_some() {
            return false;
        }
        *exit = Some(Exited {
            result,
            completed_at: Utc::now(),
        });
        true
    }

    /// Stop the watch loop at its next poll boundary
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn exit_result(&self) -> Option<ExitResult> {
        self.exit.read().as_ref().map(|e| e.result.clone())
    }

    pub fn lifecycle(&self) -> TaskLifecycle {
        if self.exit.read().is_some() {
            TaskLifecycle::Exited
        } else {
            TaskLifecycle::Running
        }
    }

    pub fn task_status(&self) -> TaskStatus {
        let exit = self.exit.read();

        let mut driver_attributes = BTreeMap::new();
        driver_attributes.insert("container_id".to_string(), self.container_id.clone());
        driver_attributes.insert("image".to_string(), self.config.image.clone());

        TaskStatus {
            id: self.task_id.clone(),
            name: self.task_name.clone(),
            state: if exit.is_some() {
                TaskLifecycle::Exited
            } else {
                TaskLifecycle::Running
            },
            started_at: self.started_at,
            completed_at: exit.as_ref().map(|e| e.completed_at),
            exit_result: exit.as_ref().map(|e| e.result.clone()),
            driver_attributes,
        }
    }

    /// Resolves when the watch loop has ended. `None` if it ended without an
    /// exit (the monitor was shut down).
    pub async fn wait(&self) -> Option<ExitResult> {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = done.wait_for(|finished| *finished).await;
        self.exit_result()
    }
}

impl std::fmt::Debug for TaskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMonitor")
            .field("task_id", &self.task_id)
            .field("container_id", &self.container_id)
            .field("started_at", &self.started_at)
            .field("state", &self.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{shared_runtime, CliRuntime};

    fn monitor() -> TaskMonitor {
        let state = TaskState {
            task_config: TaskConfig::new("alpine"),
            container_id: "c-1".to_string(),
            started_at: Utc::now(),
        };
        let runtime = shared_runtime(Arc::new(CliRuntime::new("/nonexistent/container")));
        TaskMonitor::new("t-1", "web", state, runtime)
    }

    #[test]
    fn test_exit_slot_set_once() {
        let monitor = monitor();
        assert_eq!(monitor.lifecycle(), TaskLifecycle::Running);
        assert!(monitor.exit_result().is_none());

        assert!(monitor.record_exit(ExitResult::synthetic()));
        assert!(!monitor.record_exit(ExitResult::failed("late")));

        assert_eq!(monitor.exit_result(), Some(ExitResult::synthetic()));
        let status = monitor.task_status();
        assert_eq!(status.state, TaskLifecycle::Exited);
        assert!(status.completed_at.is_some());
        assert_eq!(status.driver_attributes["container_id"], "c-1");
    }

    #[tokio::test]
    async fn test_shutdown_ends_wait_without_exit() {
        let monitor = Arc::new(monitor());
        let handle = monitor.spawn_watch(Duration::from_secs(3600));

        monitor.shutdown();
        assert_eq!(monitor.wait().await, None);
        handle.await.unwrap();
        assert_eq!(monitor.lifecycle(), TaskLifecycle::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_container_ends_after_repeated_failures() {
        let monitor = Arc::new(monitor());
        let started = Instant::now();
        monitor.spawn_watch(Duration::from_secs(2));

        let exit = monitor.wait().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(8), "{:?}", elapsed);
        assert_eq!(exit.exit_code, 0);
        assert!(exit.err.is_some());
        assert_eq!(monitor.lifecycle(), TaskLifecycle::Exited);
    }
}
