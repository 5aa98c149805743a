//! Test support for the Styx driver crates
//!
//! - `FakeRuntime` - in-memory container runtime with failure injection
//! - `FailingStateCodec` - codec whose encode always fails
//! - `HostTaskBuilder` - start requests rooted in a temp directory

pub mod builders;
pub mod fake_runtime;

pub use builders::{host_task, FailingStateCodec, HostTaskBuilder};
pub use fake_runtime::FakeRuntime;

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Output goes through the test writer, so it only shows for failing tests
/// unless run with `--nocapture`. Levels come from `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}
