use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ── Business metrics (per-engine counters, also exported) ───────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotbook_bookings_created_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "slotbook_bookings_cancelled_total";

/// Counter: create/modify requests refused for interval overlap.
pub const CONFLICTS_DETECTED_TOTAL: &str = "slotbook_conflicts_detected_total";

/// Counter: successful interval reschedules.
pub const CONFLICTS_RESOLVED_TOTAL: &str = "slotbook_conflicts_resolved_total";

/// Counter: requests rejected before touching the store.
pub const VALIDATION_FAILURES_TOTAL: &str = "slotbook_validation_failures_total";

// ── Delivery and durability ─────────────────────────────────────

/// Counter: lifecycle events delivered to the publisher.
pub const EVENTS_PUBLISHED_TOTAL: &str = "slotbook_events_published_total";

/// Counter: publish attempts that failed (entry stays queued).
pub const EVENT_PUBLISH_FAILURES_TOTAL: &str = "slotbook_event_publish_failures_total";

/// Gauge: undelivered outbox entries.
pub const OUTBOX_PENDING: &str = "slotbook_outbox_pending";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the fmt tracing subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Per-engine business counters. Process-local operational signal, not a
/// correctness mechanism; read via [`EngineMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct EngineMetrics {
    bookings_created: AtomicU64,
    bookings_cancelled: AtomicU64,
    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
    validation_failures: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn record_created(&self) {
        self.bookings_created.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
    }

    pub(crate) fn record_cancelled(&self) {
        self.bookings_cancelled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(BOOKINGS_CANCELLED_TOTAL).increment(1);
    }

    pub(crate) fn record_conflict_detected(&self) {
        self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONFLICTS_DETECTED_TOTAL).increment(1);
    }

    pub(crate) fn record_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONFLICTS_RESOLVED_TOTAL).increment(1);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(VALIDATION_FAILURES_TOTAL).increment(1);
    }

    /// Defensive copy — the live counters are never handed out.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bookings_created: self.bookings_created.load(Ordering::Relaxed),
            bookings_cancelled: self.bookings_cancelled.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub bookings_created: u64,
    pub bookings_cancelled: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub validation_failures: u64,
}
