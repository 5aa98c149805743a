//! # styx-foundation
//!
//! Foundation layer for the Styx container driver:
//! - Error: shared error type and `Result` alias
//! - Config: driver-level configuration (`DriverConfig`) with layered loading
//! - Storage: `JsonStore` for small JSON documents (config, persisted task handles)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    DriverConfig, NetworkSettings, PullSettings, CONTAINER_BIN_ENV, DEFAULT_CONTAINER_BIN,
    DEFAULT_NETWORK_NAME, DEFAULT_NETWORK_SUBNET, DRIVER_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;
