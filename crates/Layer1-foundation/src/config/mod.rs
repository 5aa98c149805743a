//! Config - driver-level settings
//!
//! - `driver.rs` - `DriverConfig` and its layered loading

mod driver;

pub use driver::{
    DriverConfig, NetworkSettings, PullSettings, CONTAINER_BIN_ENV, DEFAULT_CONTAINER_BIN,
    DEFAULT_NETWORK_NAME, DEFAULT_NETWORK_SUBNET, DRIVER_CONFIG_FILE,
};
