//! Storage module
//!
//! - `json`: JSON documents on disk (driver config, persisted task handles)

mod json;

pub use json::JsonStore;
