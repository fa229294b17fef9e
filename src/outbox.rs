use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::observability;
use crate::publish::EventPublisher;
use crate::store::BookingStore;

pub(crate) const DISPATCH_INTERVAL_MS: u64 = 200;
const DISPATCH_BATCH: usize = 64;

/// Background task: deliver pending outbox entries to the publisher.
///
/// At-least-once: an entry is only marked delivered after a successful
/// publish, so a crash between publish and mark may replay it. Delivery is
/// in commit order; a failed publish stops the batch and the whole tail is
/// retried on the next tick, which keeps ordering intact through publisher
/// downtime.
pub async fn run_dispatcher(
    store: Arc<BookingStore>,
    publisher: Arc<dyn EventPublisher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(DISPATCH_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                drain(&store, publisher.as_ref()).await;
            }
            _ = shutdown.changed() => {
                // final drain so shutdown doesn't strand committed events
                drain(&store, publisher.as_ref()).await;
                return;
            }
        }
    }
}

pub(crate) async fn drain(store: &BookingStore, publisher: &dyn EventPublisher) {
    for entry in store.pending_outbox(DISPATCH_BATCH) {
        match publisher.publish(&entry.event).await {
            Ok(()) => {
                metrics::counter!(observability::EVENTS_PUBLISHED_TOTAL).increment(1);
                debug!(outbox_id = %entry.id, kind = entry.event.kind.as_str(), "event delivered");
                if let Err(e) = store.mark_delivered(entry.id).await {
                    warn!(outbox_id = %entry.id, error = %e, "delivered but not marked; will redeliver");
                    return;
                }
            }
            Err(e) => {
                metrics::counter!(observability::EVENT_PUBLISH_FAILURES_TOTAL).increment(1);
                warn!(outbox_id = %entry.id, error = %e, "publish failed, will retry");
                return;
            }
        }
    }
}
