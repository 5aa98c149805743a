use std::path::Path;

use serde_json::{json, Value};
use styx_task::plugin::{
    AllocatedPort, AllocatedResources, CodecError, HostTaskConfig, JsonStateCodec, StateCodec,
    TaskDir,
};
use styx_task::TaskState;

/// Start request for `image`, with task directories under `alloc_dir`
pub fn host_task(id: &str, image: &str, alloc_dir: &Path) -> HostTaskConfig {
    HostTaskBuilder::new(id, image, alloc_dir).build()
}

/// Builder for `HostTaskConfig`.
pub struct HostTaskBuilder {
    config: HostTaskConfig,
    driver_config: serde_json::Map<String, Value>,
}

impl HostTaskBuilder {
    pub fn new(id: &str, image: &str, alloc_dir: &Path) -> Self {
        let name = id.rsplit('/').next().unwrap_or(id).to_string();
        let mut driver_config = serde_json::Map::new();
        driver_config.insert("image".to_string(), json!(image));

        Self {
            config: HostTaskConfig {
                id: id.to_string(),
                name: name.clone(),
                alloc_id: "alloc-0001".to_string(),
                task_dir: TaskDir::new(alloc_dir, &name),
                resources: Some(AllocatedResources {
                    ports: vec![AllocatedPort {
                        label: "http".to_string(),
                        value: 24080,
                        to: 80,
                    }],
                    cpu_shares: 500,
                    memory_mb: 256,
                }),
                driver_config: Value::Null,
            },
            driver_config,
        }
    }

    /// Set a raw field of the driver block
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.driver_config.insert(key.to_string(), value);
        self
    }

    pub fn with_volumes(self, volumes: &[&str]) -> Self {
        self.with("volumes", json!(volumes))
    }

    pub fn with_network(self, network: &str) -> Self {
        self.with("network", json!(network))
    }

    pub fn without_resources(mut self) -> Self {
        self.config.resources = None;
        self
    }

    pub fn build(mut self) -> HostTaskConfig {
        self.config.driver_config = Value::Object(self.driver_config);
        self.config
    }
}

/// Codec whose encode always fails; decode is plain JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStateCodec;

impl StateCodec for FailingStateCodec {
    fn encode(&self, _state: &TaskState) -> Result<Vec<u8>, CodecError> {
        Err("no space left on device".into())
    }

    fn decode(&self, raw: &[u8]) -> Result<TaskState, CodecError> {
        JsonStateCodec.decode(raw)
    }
}
