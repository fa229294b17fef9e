mod conflict;
mod error;
mod mutations;
mod policy;
mod queries;
mod request;

pub use conflict::{find_all_conflicts, find_conflict};
pub use error::{
    BookingError, CancellationError, CreationError, FieldViolation, ModificationError,
    ValidationError,
};
pub use policy::{check_booking_window, refund_auto_eligible, validate_span, TimeViolation};
pub use queries::{merge_overlapping, subtract_intervals};
pub use request::{CancelBookingRequest, CreateBookingRequest, ModifyBookingRequest};

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::observability::{EngineMetrics, MetricsSnapshot};
use crate::outbox;
use crate::publish::EventPublisher;
use crate::store::BookingStore;

/// The booking engine: validation, temporal policy, conflict detection,
/// transactional persistence and lifecycle transitions, with an outbox
/// dispatcher delivering `booking.*` events after commit.
///
/// The engine itself holds no per-request state; all shared mutable data
/// lives behind the store's per-calendar locking. Metrics counters are
/// process-local.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<BookingStore>,
    pub(crate) metrics: EngineMetrics,
    publisher: Arc<dyn EventPublisher>,
    dispatcher: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Engine {
    /// Open (or replay) the WAL at `wal_path`. Must run on a tokio
    /// runtime. The dispatcher is not started until [`Engine::initialize`].
    pub fn new(
        config: EngineConfig,
        wal_path: &Path,
        publisher: Arc<dyn EventPublisher>,
    ) -> io::Result<Self> {
        let store = Arc::new(BookingStore::open(wal_path)?);
        Ok(Self {
            config,
            store,
            metrics: EngineMetrics::default(),
            publisher,
            dispatcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start the outbox dispatcher. Idempotent: a second call is a no-op.
    pub async fn initialize(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(outbox::run_dispatcher(
            self.store.clone(),
            self.publisher.clone(),
            rx,
        ));
        *dispatcher = Some((tx, handle));
        info!("booking engine initialized");
    }

    /// Stop the dispatcher after a final outbox drain. Idempotent, and
    /// safe to call before `initialize`.
    pub async fn shutdown(&self) {
        let mut dispatcher = self.dispatcher.lock().await;
        let Some((tx, handle)) = dispatcher.take() else {
            return;
        };
        let _ = tx.send(true);
        if handle.await.is_err() {
            tracing::warn!("outbox dispatcher ended abnormally");
        }
        info!("booking engine stopped");
    }

    /// Defensive copy of the engine counters — never the live values.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Undelivered lifecycle events (operational visibility).
    pub fn outbox_backlog(&self) -> usize {
        self.store.outbox_len()
    }

    /// Rewrite the WAL from live state, dropping superseded frames.
    pub async fn compact_wal(&self) -> io::Result<()> {
        self.store
            .compact()
            .await
            .map_err(|e| io::Error::other(e.to_string()))
    }
}
