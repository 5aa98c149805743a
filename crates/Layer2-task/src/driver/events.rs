//! Task event bus

use super::Driver;
use crate::plugin::TaskEvent;
use futures::stream::BoxStream;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

impl Driver {
    /// Publish an event; nobody listening is fine
    pub(crate) fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }

    /// Events published after this call, until `ctx` or the driver is
    /// cancelled
    pub(crate) fn event_stream(&self, ctx: CancellationToken) -> BoxStream<'static, TaskEvent> {
        let mut rx = self.events.subscribe();
        let driver = self.cancel.clone();

        Box::pin(async_stream::stream! {
            loop {
                let received = tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = driver.cancelled() => break,
                    received = rx.recv() => received,
                };

                match received {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "task event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
