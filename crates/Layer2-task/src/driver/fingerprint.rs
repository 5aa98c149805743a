//! Health fingerprinting

use super::Driver;
use crate::container::ContainerRuntime;
use crate::plugin::{Attribute, Fingerprint, HealthState, PLUGIN_NAME};
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One health report for the given runtime. Never fails; problems become
/// the reported health state.
pub async fn build_fingerprint(runtime: &dyn ContainerRuntime) -> Fingerprint {
    if !runtime.is_available() {
        return Fingerprint::new(HealthState::Undetected, "container CLI not found");
    }

    match runtime.version().await {
        Ok(version) => Fingerprint::new(HealthState::Healthy, "healthy")
            .with_attribute(format!("driver.{}.version", PLUGIN_NAME), Attribute::String(version))
            .with_attribute(format!("driver.{}", PLUGIN_NAME), Attribute::Bool(true)),
        Err(e) => Fingerprint::new(
            HealthState::Unhealthy,
            format!("failed to get container version: {}", e),
        ),
    }
}

impl Driver {
    /// Reports every fingerprint period until `ctx` or the driver is
    /// cancelled. Each call starts a fresh stream.
    pub(crate) fn fingerprint_stream(&self, ctx: CancellationToken) -> BoxStream<'static, Fingerprint> {
        let slot = Arc::clone(&self.runtime);
        let period = self.config.read().fingerprint_period();
        let driver = self.cancel.clone();

        Box::pin(async_stream::stream! {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = driver.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let runtime = Arc::clone(&*slot.read());
                let fingerprint = build_fingerprint(runtime.as_ref()).await;
                debug!(health = ?fingerprint.health, "fingerprint");
                yield fingerprint;
            }
        })
    }
}
