use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::BookingEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Delivery failure. The outbox dispatcher retries; the mutation that
/// produced the event has already committed and is never rolled back.
#[derive(Debug)]
pub struct PublishError(pub String);

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish failed: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

/// Downstream sink for booking lifecycle events. Implementations bridge to
/// whatever transport the deployment uses (queue, webhook, in-process bus).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &BookingEvent) -> Result<(), PublishError>;
}

/// In-process publisher: one broadcast channel per tenant.
pub struct BroadcastPublisher {
    channels: DashMap<Ulid, broadcast::Sender<BookingEvent>>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a tenant's lifecycle events. Creates the channel if
    /// needed.
    pub fn subscribe(&self, tenant_id: Ulid) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .channels
            .entry(tenant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    /// No-op success when nobody is listening.
    async fn publish(&self, event: &BookingEvent) -> Result<(), PublishError> {
        if let Some(sender) = self.channels.get(&event.tenant_id) {
            let _ = sender.send(event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::BTreeMap;

    fn sample_event() -> BookingEvent {
        let booking = Booking {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            service_id: Ulid::new(),
            provider_id: Ulid::new(),
            customer: Customer {
                name: "Mary Jackson".into(),
                email: "mary@example.com".into(),
                phone: "+15550003333".into(),
            },
            span: Span::new(1000, 2000),
            status: BookingStatus::Confirmed,
            notes: None,
            metadata: BTreeMap::new(),
            special_requests: None,
            reschedule_count: 0,
            cancellation: None,
            history: Vec::new(),
            created_at: 0,
            updated_at: 0,
        };
        BookingEvent::new(EventKind::Created, &booking)
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let publisher = BroadcastPublisher::new();
        let event = sample_event();
        let mut rx = publisher.subscribe(event.tenant_id);

        publisher.publish(&event).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = BroadcastPublisher::new();
        publisher.publish(&sample_event()).await.unwrap();
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let publisher = BroadcastPublisher::new();
        let event = sample_event();
        let mut other = publisher.subscribe(Ulid::new());

        publisher.publish(&event).await.unwrap();

        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
