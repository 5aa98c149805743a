//! Start and recovery pipelines

use super::{Driver, DriverError, DriverResult};
use crate::container::{ContainerRuntime, RunOptions};
use crate::monitor::TaskMonitor;
use crate::plugin::{
    AllocatedResources, DriverNetwork, HostTaskConfig, TaskDir, TaskEvent, TaskHandle,
    TASK_HANDLE_VERSION,
};
use crate::task::{TaskConfig, TaskState};
use chrono::Utc;
use std::sync::Arc;
use styx_foundation::PullSettings;
use tracing::{debug, info, warn};

/// Container name for a task identifier; the tool rejects `/` in names
pub fn container_name(task_id: &str) -> String {
    task_id.replace('/', "-")
}

/// Host directories bound at fixed paths, ahead of the user's volumes so a
/// user entry with the same destination wins
fn auto_mounts(task_dir: &TaskDir) -> Vec<String> {
    vec![
        format!("{}:/local", task_dir.local_dir.display()),
        format!("{}:/secrets", task_dir.secrets_dir.display()),
        format!("{}:/alloc", task_dir.shared_alloc_dir.display()),
    ]
}

impl Driver {
    pub(crate) async fn start(
        &self,
        cfg: HostTaskConfig,
    ) -> DriverResult<(TaskHandle, Option<DriverNetwork>)> {
        let resources = cfg
            .resources
            .as_ref()
            .ok_or_else(|| DriverError::InvalidRequest("task resources are required".to_string()))?;

        if self.tasks.contains(&cfg.id).await {
            return Err(DriverError::InvalidRequest(format!(
                "task {} is already running",
                cfg.id
            )));
        }

        let task_config = cfg.decode_driver_config().map_err(|e| {
            DriverError::InvalidRequest(format!("failed to decode driver config: {}", e))
        })?;
        task_config.validate()?;

        info!(task_id = %cfg.id, image = %task_config.image, "starting task");

        let runtime = self.runtime();
        let settings = self.config();

        let mut volumes = auto_mounts(&cfg.task_dir);
        volumes.extend(task_config.volumes.iter().cloned());
        debug!(task_id = %cfg.id, ?volumes, "volume mounts");

        self.prepare_volumes(runtime.as_ref(), &cfg, &task_config)
            .await?;
        self.pull_image(runtime.as_ref(), &cfg, &task_config.image, &settings.pull)
            .await?;

        let network = task_config
            .network
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| settings.network.name.clone());
        if network == settings.network.name {
            if let Err(e) = runtime
                .ensure_network(&network, &settings.network.subnet)
                .await
            {
                warn!(network = %network, error = %e, "failed to ensure default network");
            }
        }

        let opts = RunOptions {
            name: Some(container_name(&cfg.id)),
            image: task_config.image.clone(),
            command: task_config.command.clone(),
            args: task_config.args.clone(),
            env: task_config.env.clone(),
            ports: task_config.ports.clone(),
            volumes,
            memory: task_config.memory.clone(),
            cpus: Some(task_config.cpus),
            working_dir: task_config.working_dir.clone(),
            network: Some(network),
            detach: true,
            remove: false,
        };

        let container_id = runtime.run(&opts).await.map_err(DriverError::Launch)?;
        info!(task_id = %cfg.id, container_id = %container_id, "container started");

        // From here on, any failure must not leave the container behind.
        let state = TaskState {
            task_config,
            container_id: container_id.clone(),
            started_at: Utc::now(),
        };
        let encoded = match self.codec.encode(&state) {
            Ok(encoded) => encoded,
            Err(e) => {
                let err = DriverError::State(format!("failed to encode task state: {}", e));
                cleanup(runtime.as_ref(), &container_id, &err).await;
                return Err(err);
            }
        };
        let handle = TaskHandle {
            version: TASK_HANDLE_VERSION,
            config: cfg.clone(),
            state: encoded,
        };

        let driver_network = container_network(runtime.as_ref(), &container_id, resources).await;

        let monitor = Arc::new(TaskMonitor::new(
            &cfg.id,
            &cfg.name,
            state,
            Arc::clone(&self.runtime),
        ));
        if !self.tasks.insert_new(&cfg.id, Arc::clone(&monitor)).await {
            let err = DriverError::InvalidRequest(format!("task {} is already running", cfg.id));
            cleanup(runtime.as_ref(), &container_id, &err).await;
            return Err(err);
        }
        monitor.spawn_watch(settings.watch_interval());

        self.emit(TaskEvent::new(&cfg, "Started container").annotate("container_id", &container_id));

        Ok((handle, driver_network))
    }

    /// Create every named volume that does not exist yet
    async fn prepare_volumes(
        &self,
        runtime: &dyn ContainerRuntime,
        cfg: &HostTaskConfig,
        task_config: &TaskConfig,
    ) -> DriverResult<()> {
        for spec in task_config.volume_specs()? {
            if !spec.is_named() {
                continue;
            }

            let exists = match runtime.volume_exists(&spec.source).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(volume = %spec.source, error = %e, "failed to check volume existence");
                    false
                }
            };
            if exists {
                continue;
            }

            info!(task_id = %cfg.id, volume = %spec.source, "creating named volume");
            runtime
                .volume_create(&spec.source)
                .await
                .map_err(|source| DriverError::Volume {
                    name: spec.source.clone(),
                    source,
                })?;
            self.emit(TaskEvent::new(cfg, "Created volume").annotate("volume", &spec.source));
        }
        Ok(())
    }

    /// Pull with linear backoff between attempts
    async fn pull_image(
        &self,
        runtime: &dyn ContainerRuntime,
        cfg: &HostTaskConfig,
        image: &str,
        pull: &PullSettings,
    ) -> DriverResult<()> {
        let attempts = pull.attempts.max(1);
        info!(task_id = %cfg.id, image, "pulling image");

        let mut attempt = 1;
        loop {
            match runtime.pull(image).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    return Err(DriverError::ImagePull {
                        image: image.to_string(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(task_id = %cfg.id, image, attempt, error = %e, "image pull failed, retrying");
                    self.emit(
                        TaskEvent::new(cfg, "Image pull failed, retrying")
                            .annotate("image", image)
                            .annotate("attempt", attempt.to_string()),
                    );
                    tokio::time::sleep(pull.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub(crate) async fn recover(&self, handle: &TaskHandle) -> DriverResult<()> {
        let task_id = &handle.config.id;
        if self.tasks.contains(task_id).await {
            debug!(task_id = %task_id, "task already tracked, nothing to recover");
            return Ok(());
        }

        if handle.version != TASK_HANDLE_VERSION {
            return Err(DriverError::IncompatibleHandle {
                found: handle.version,
                expected: TASK_HANDLE_VERSION,
            });
        }

        let state = self
            .codec
            .decode(&handle.state)
            .map_err(|e| DriverError::State(format!("failed to decode task state: {}", e)))?;

        info!(task_id = %task_id, container_id = %state.container_id, "recovering task");

        let runtime = self.runtime();
        if let Err(e) = runtime.inspect(&state.container_id).await {
            return Err(DriverError::Recovery {
                container_id: state.container_id,
                reason: e.to_string(),
            });
        }

        let container_id = state.container_id.clone();
        let monitor = Arc::new(TaskMonitor::new(
            task_id,
            &handle.config.name,
            state,
            Arc::clone(&self.runtime),
        ));
        if !self.tasks.insert_new(task_id, Arc::clone(&monitor)).await {
            debug!(task_id = %task_id, "task recovered concurrently");
            return Ok(());
        }
        monitor.spawn_watch(self.config().watch_interval());

        self.emit(
            TaskEvent::new(&handle.config, "Recovered container")
                .annotate("container_id", container_id),
        );
        Ok(())
    }
}

/// Stop then remove a just-launched container. Failures are logged; the
/// caller returns its primary error regardless.
async fn cleanup(runtime: &dyn ContainerRuntime, container_id: &str, cause: &DriverError) {
    warn!(container_id, error = %cause, "cleaning up container after start failure");

    if let Err(e) = runtime.stop(container_id).await {
        warn!(container_id, error = %e, "failed to stop container during cleanup");
    }
    if let Err(e) = runtime.remove(container_id).await {
        warn!(container_id, error = %e, "failed to remove container during cleanup");
    }
}

/// Container address for service registration; inspection problems are
/// logged and yield no network info
async fn container_network(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    resources: &AllocatedResources,
) -> Option<DriverNetwork> {
    let info = match runtime.inspect(container_id).await {
        Ok(info) => info,
        Err(e) => {
            warn!(container_id, error = %e, "failed to inspect container for network info");
            return None;
        }
    };

    let ip = info.primary_ip()?.to_string();
    let port_map = resources.port_map();
    info!(container_id, ip = %ip, ?port_map, "container network info");

    Some(DriverNetwork {
        ip,
        auto_advertise: true,
        port_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_container_name_strips_slashes() {
        assert_eq!(container_name("alloc/web/1"), "alloc-web-1");
        assert_eq!(container_name("plain"), "plain");
    }

    #[test]
    fn test_auto_mounts_order() {
        let dirs = TaskDir::new(Path::new("/alloc/a1"), "web");
        assert_eq!(
            auto_mounts(&dirs),
            vec![
                "/alloc/a1/web/local:/local",
                "/alloc/a1/web/secrets:/secrets",
                "/alloc/a1/alloc:/alloc",
            ]
        );
    }
}
