//! # styx-task
//!
//! Apple container task driver for a host orchestrator.
//! Turns "run this workload" requests into monitored containers and reports
//! their lifecycle back to the host.
//!
//! ## Layout
//!
//! - `container` - runtime executor over the external container tool
//! - `task` / `state` - task configuration, persisted state, exit results
//! - `monitor` / `table` - per-task watch loop and the task table
//! - `plugin` - host plugin contract, schemas and wire types
//! - `driver` - the `Driver` implementing the contract

pub mod container;
pub mod driver;
pub mod monitor;
pub mod plugin;
pub mod state;
pub mod table;
pub mod task;

// Runtime executor
pub use container::{
    shared_runtime, CliRuntime, ContainerRuntime, RunOptions, RuntimeError, RuntimeResult,
    SharedRuntime,
};

// Driver
pub use driver::{build_fingerprint, container_name, Driver, DriverError, DriverResult};

// Plugin contract
pub use plugin::{
    Capabilities, DriverNetwork, DriverPlugin, ExecTaskResult, Fingerprint, HealthState,
    HostTaskConfig, PluginInfo, StateCodec, TaskDir, TaskEvent, TaskHandle, TaskResourceUsage,
    TaskStatus,
};

// Task model
pub use monitor::TaskMonitor;
pub use state::{ExitResult, TaskLifecycle};
pub use table::TaskTable;
pub use task::{ConfigError, TaskConfig, TaskState, VolumeSpec};
