use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Booking lifecycle. `Completed`, `Cancelled` and `NoShow` are terminal;
/// no transition leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }

    /// Active bookings count toward conflict checks and concurrency caps.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// `pending → confirmed`, `pending|confirmed → cancelled`,
    /// `confirmed → completed | no_show`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Confirmed) => true,
            (Self::Pending | Self::Confirmed, Self::Cancelled) => true,
            (Self::Confirmed, Self::Completed | Self::NoShow) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    CustomerRequest,
    ProviderUnavailable,
    Emergency,
    Other,
}

impl CancellationReason {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer_request" => Some(Self::CustomerRequest),
            "provider_unavailable" => Some(Self::ProviderUnavailable),
            "emergency" => Some(Self::Emergency),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomerRequest => "customer_request",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Emergency => "emergency",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// One entry in a booking's append-only audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub at: Ms,
    /// Field names touched by this change.
    pub changed: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub reason: CancellationReason,
    pub notes: Option<String>,
    pub refund_requested: bool,
    /// False when the cancellation landed inside the refund window; the
    /// refund decision is then deferred to a human process.
    pub refund_auto_eligible: bool,
}

/// The core entity. Owned exclusively by its tenant; never physically
/// deleted — cancellation is a status change, preserving audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub customer: Customer,
    pub span: Span,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub special_requests: Option<String>,
    pub reschedule_count: u32,
    pub cancellation: Option<CancellationRecord>,
    pub history: Vec<ModificationRecord>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn calendar_key(&self) -> CalendarKey {
        CalendarKey {
            tenant_id: self.tenant_id,
            provider_id: self.provider_id,
        }
    }
}

/// Partition key of all booking state. The store serializes writers per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalendarKey {
    pub tenant_id: Ulid,
    pub provider_id: Ulid,
}

/// All bookings of one `(tenant, provider)`, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ProviderCalendar {
    pub key: CalendarKey,
    bookings: Vec<Booking>,
}

impl ProviderCalendar {
    pub fn new(key: CalendarKey) -> Self {
        Self {
            key,
            bookings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Replace a row in place, re-sorting if its span moved.
    pub fn upsert(&mut self, booking: Booking) -> Option<Booking> {
        let old = self.remove(booking.id);
        self.insert(booking);
        old
    }

    /// Rows whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`, so the scan is bounded
    /// by the window rather than the calendar.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Active rows overlapping the window, in start order.
    pub fn active_in(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(window).filter(|b| b.is_active())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter()
    }
}

// ── Lifecycle events ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Modified,
    Cancelled,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "booking.created",
            Self::Modified => "booking.modified",
            Self::Cancelled => "booking.cancelled",
        }
    }
}

/// Payload handed to the event publisher, at least once per committed
/// mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEvent {
    pub kind: EventKind,
    pub booking_id: Ulid,
    pub tenant_id: Ulid,
    pub occurred_at: Ms,
    /// Row snapshot as of the mutation.
    pub booking: Booking,
}

impl BookingEvent {
    pub fn new(kind: EventKind, booking: &Booking) -> Self {
        Self {
            kind,
            booking_id: booking.id,
            tenant_id: booking.tenant_id,
            occurred_at: booking.updated_at,
            booking: booking.clone(),
        }
    }

    /// The `{type, booking_id, tenant_id, payload, timestamp}` shape
    /// expected by transport adapters bridging to queues or webhooks.
    pub fn wire_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.kind.as_str(),
            "booking_id": self.booking_id.to_string(),
            "tenant_id": self.tenant_id.to_string(),
            "payload": serde_json::to_value(&self.booking).unwrap_or(serde_json::Value::Null),
            "timestamp": self.occurred_at,
        })
    }
}

/// Outbox record: written in the same WAL frame as the state change, so a
/// committed mutation can never lose its lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Ulid,
    pub event: BookingEvent,
}

/// The WAL record format — one frame per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A booking row was created, modified or cancelled. Carries the full
    /// row (the WAL is the database) and the undelivered lifecycle event,
    /// if any. Compaction re-emits rows with `outbox: None` once delivered.
    BookingWritten {
        booking: Booking,
        outbox: Option<OutboxEntry>,
    },
    /// The dispatcher delivered the given outbox entry.
    OutboxDelivered { outbox_id: Ulid },
    /// Compaction marker: an undelivered entry carried forward into the
    /// rewritten log.
    OutboxPending { entry: OutboxEntry },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            tenant_id: Ulid::new(),
            service_id: Ulid::new(),
            provider_id: Ulid::new(),
            customer: Customer {
                name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                phone: "+15550001111".into(),
            },
            span: Span::new(start, end),
            status: BookingStatus::Confirmed,
            notes: None,
            metadata: BTreeMap::new(),
            special_requests: None,
            reschedule_count: 0,
            cancellation: None,
            history: Vec::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn key() -> CalendarKey {
        CalendarKey {
            tenant_id: Ulid::new(),
            provider_id: Ulid::new(),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(NoShow));
        // terminal states go nowhere
        for terminal in [Completed, Cancelled, NoShow] {
            for next in [Pending, Confirmed, Completed, Cancelled, NoShow] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_activity() {
        use BookingStatus::*;
        assert!(Pending.is_active());
        assert!(Confirmed.is_active());
        assert!(!Cancelled.is_active());
        assert!(Cancelled.is_terminal());
        assert!(!Confirmed.is_terminal());
    }

    #[test]
    fn cancellation_reason_roundtrip() {
        for s in ["customer_request", "provider_unavailable", "emergency", "other"] {
            assert_eq!(CancellationReason::parse(s).unwrap().as_str(), s);
        }
        assert!(CancellationReason::parse("changed_my_mind").is_none());
    }

    #[test]
    fn calendar_keeps_start_order() {
        let mut cal = ProviderCalendar::new(key());
        cal.insert(sample_booking(300, 400));
        cal.insert(sample_booking(100, 200));
        cal.insert(sample_booking(200, 300));
        let starts: Vec<Ms> = cal.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn calendar_overlapping_prunes_window() {
        let mut cal = ProviderCalendar::new(key());
        cal.insert(sample_booking(100, 200)); // past
        cal.insert(sample_booking(450, 600)); // overlaps query
        cal.insert(sample_booking(1000, 1100)); // starts after query end
        let hits: Vec<_> = cal.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn calendar_adjacent_not_overlapping() {
        let mut cal = ProviderCalendar::new(key());
        cal.insert(sample_booking(100, 200));
        assert_eq!(cal.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn calendar_active_in_skips_terminal() {
        let mut cal = ProviderCalendar::new(key());
        let mut cancelled = sample_booking(100, 200);
        cancelled.status = BookingStatus::Cancelled;
        cal.insert(cancelled);
        cal.insert(sample_booking(150, 250));
        let active: Vec<_> = cal.active_in(&Span::new(0, 1000)).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].span, Span::new(150, 250));
    }

    #[test]
    fn calendar_upsert_moves_row() {
        let mut cal = ProviderCalendar::new(key());
        let mut b = sample_booking(100, 200);
        let id = b.id;
        cal.insert(b.clone());
        b.span = Span::new(500, 600);
        let old = cal.upsert(b).unwrap();
        assert_eq!(old.span, Span::new(100, 200));
        assert_eq!(cal.len(), 1);
        assert_eq!(cal.get(id).unwrap().span, Span::new(500, 600));
    }

    #[test]
    fn calendar_remove_missing_is_none() {
        let mut cal = ProviderCalendar::new(key());
        cal.insert(sample_booking(100, 200));
        assert!(cal.remove(Ulid::new()).is_none());
        assert_eq!(cal.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut booking = sample_booking(1000, 2000);
        booking.metadata.insert("room".into(), "studio-2".into());
        let entry = OutboxEntry {
            id: Ulid::new(),
            event: BookingEvent::new(EventKind::Created, &booking),
        };
        let event = Event::BookingWritten {
            booking,
            outbox: Some(entry),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_kind_labels() {
        assert_eq!(EventKind::Created.as_str(), "booking.created");
        assert_eq!(EventKind::Modified.as_str(), "booking.modified");
        assert_eq!(EventKind::Cancelled.as_str(), "booking.cancelled");
    }

    #[test]
    fn wire_json_shape() {
        let booking = sample_booking(1000, 2000);
        let event = BookingEvent::new(EventKind::Cancelled, &booking);
        let json = event.wire_json();
        assert_eq!(json["type"], "booking.cancelled");
        assert_eq!(json["booking_id"], booking.id.to_string());
        assert_eq!(json["tenant_id"], booking.tenant_id.to_string());
        assert!(json["payload"].is_object());
        assert_eq!(json["timestamp"], booking.updated_at);
    }
}
