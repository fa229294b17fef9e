//! Persistence boundary for booking state.
//!
//! Isolation contract: all bookings are partitioned by
//! `(tenant_id, provider_id)` into calendars, each behind its own
//! `RwLock`. Holding a calendar's write guard *is* the transaction —
//! the read-active / check-overlap / write-row sequence for one provider
//! is serialized against every other writer for that provider, while
//! different providers and tenants proceed in parallel. Provider moves
//! take both guards in sorted key order so concurrent moves cannot
//! deadlock.
//!
//! Durability: every committed mutation is one WAL frame, appended and
//! fsynced (group commit) before the in-memory apply. The frame carries
//! the lifecycle event for the outbox, so a committed row can never lose
//! its `booking.*` notification.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tokio::time::timeout;
use ulid::Ulid;

use crate::limits::CALENDAR_LOCK_TIMEOUT_MS;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<ProviderCalendar>>;
pub type CalendarGuard = OwnedRwLockWriteGuard<ProviderCalendar>;

#[derive(Debug)]
pub enum StoreError {
    Wal(String),
    /// The calendar write guard could not be acquired within the deadline.
    /// Callers retry with backoff; the engine never retries internally.
    LockTimeout(CalendarKey),
    CalendarFull(CalendarKey),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::LockTimeout(key) => write!(
                f,
                "timed out acquiring calendar {}/{}",
                key.tenant_id, key.provider_id
            ),
            StoreError::CalendarFull(key) => write!(
                f,
                "calendar {}/{} is full",
                key.tenant_id, key.provider_id
            ),
        }
    }
}

impl std::error::Error for StoreError {}

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block on the first append, drain everything immediately available, one
/// fsync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }
                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered
    // bytes don't leak into the next batch (these callers get an Err).
    let flush_err = wal.flush_sync().err();
    let result: io::Result<()> = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    };

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── The store ────────────────────────────────────────────

pub struct BookingStore {
    calendars: DashMap<CalendarKey, SharedCalendar>,
    /// booking id → owning calendar.
    booking_index: DashMap<Ulid, CalendarKey>,
    /// (tenant, customer email) → active booking count.
    customer_active: DashMap<(Ulid, String), u32>,
    /// Undelivered lifecycle events, oldest first.
    outbox: Mutex<VecDeque<OutboxEntry>>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl BookingStore {
    /// Replay the WAL and start the group-commit writer task. Must run on
    /// a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            calendars: DashMap::new(),
            booking_index: DashMap::new(),
            customer_active: DashMap::new(),
            outbox: Mutex::new(VecDeque::new()),
            wal_tx,
        };
        for event in events {
            store.replay_event(event);
        }
        metrics::gauge!(observability::OUTBOX_PENDING).set(store.outbox_len() as f64);
        Ok(store)
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    fn calendar_entry(&self, key: CalendarKey) -> SharedCalendar {
        self.calendars
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderCalendar::new(key))))
            .clone()
    }

    /// Acquire the write guard for one calendar — the transaction scope
    /// for every mutation touching that provider. Bounded by
    /// [`CALENDAR_LOCK_TIMEOUT_MS`].
    pub async fn calendar_write(&self, key: CalendarKey) -> Result<CalendarGuard, StoreError> {
        let cal = self.calendar_entry(key);
        timeout(
            Duration::from_millis(CALENDAR_LOCK_TIMEOUT_MS),
            cal.write_owned(),
        )
        .await
        .map_err(|_| StoreError::LockTimeout(key))
    }

    /// Acquire two distinct calendars in sorted key order (deadlock-free),
    /// returning the guards in argument order.
    pub async fn calendar_write_pair(
        &self,
        a: CalendarKey,
        b: CalendarKey,
    ) -> Result<(CalendarGuard, CalendarGuard), StoreError> {
        debug_assert_ne!(a, b, "calendar_write_pair requires distinct keys");
        if a <= b {
            let first = self.calendar_write(a).await?;
            let second = self.calendar_write(b).await?;
            Ok((first, second))
        } else {
            let second = self.calendar_write(b).await?;
            let first = self.calendar_write(a).await?;
            Ok((first, second))
        }
    }

    /// Locate a booking and lock its calendar. `None` when the id is
    /// unknown. Re-resolves if the row moved calendars between the index
    /// lookup and the lock.
    pub async fn resolve_booking_write(
        &self,
        id: Ulid,
    ) -> Result<Option<(CalendarKey, CalendarGuard)>, StoreError> {
        loop {
            let Some(key) = self.booking_index.get(&id).map(|e| *e.value()) else {
                return Ok(None);
            };
            let guard = self.calendar_write(key).await?;
            if guard.get(id).is_some() {
                return Ok(Some((key, guard)));
            }
        }
    }

    // ── Reads ────────────────────────────────────────────

    /// Read guard for one calendar; `None` if the calendar was never
    /// written.
    pub async fn calendar_read(
        &self,
        key: CalendarKey,
    ) -> Option<tokio::sync::OwnedRwLockReadGuard<ProviderCalendar>> {
        let cal = self.calendars.get(&key)?.value().clone();
        Some(cal.read_owned().await)
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let key = *self.booking_index.get(&id)?.value();
        let cal = self.calendars.get(&key)?.value().clone();
        let guard = cal.read().await;
        guard.get(id).cloned()
    }

    /// The §4.3 window query: active rows for one provider overlapping
    /// `window`, in start order.
    pub async fn list_active_for_provider(
        &self,
        key: CalendarKey,
        window: &Span,
    ) -> Vec<Booking> {
        let Some(cal) = self.calendars.get(&key).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        guard.active_in(window).cloned().collect()
    }

    pub fn customer_active_count(&self, tenant_id: Ulid, email: &str) -> u32 {
        self.customer_active
            .get(&(tenant_id, email.to_string()))
            .map(|e| *e.value())
            .unwrap_or(0)
    }

    // ── Writes (caller holds the guard) ──────────────────

    /// WAL-append + in-memory apply + outbox enqueue in one call. The
    /// caller holds `cal`'s write guard; nothing is applied if the append
    /// fails.
    pub async fn commit(
        &self,
        cal: &mut ProviderCalendar,
        booking: Booking,
        kind: EventKind,
    ) -> Result<Booking, StoreError> {
        debug_assert_eq!(booking.calendar_key(), cal.key);
        let entry = OutboxEntry {
            id: Ulid::new(),
            event: BookingEvent::new(kind, &booking),
        };
        let event = Event::BookingWritten {
            booking: booking.clone(),
            outbox: Some(entry.clone()),
        };
        self.wal_append(&event).await?;

        let old = cal.upsert(booking.clone());
        self.apply_indexes(old.as_ref(), &booking, cal.key);
        self.push_outbox(entry);
        Ok(booking)
    }

    /// Commit a booking that changed providers: removed from `from`,
    /// inserted into `to`. The caller holds both guards (acquired via
    /// [`Self::calendar_write_pair`]).
    pub async fn commit_move(
        &self,
        from: &mut ProviderCalendar,
        to: &mut ProviderCalendar,
        booking: Booking,
        kind: EventKind,
    ) -> Result<Booking, StoreError> {
        debug_assert_eq!(booking.calendar_key(), to.key);
        let entry = OutboxEntry {
            id: Ulid::new(),
            event: BookingEvent::new(kind, &booking),
        };
        let event = Event::BookingWritten {
            booking: booking.clone(),
            outbox: Some(entry.clone()),
        };
        self.wal_append(&event).await?;

        let old = from.remove(booking.id);
        to.upsert(booking.clone());
        self.apply_indexes(old.as_ref(), &booking, to.key);
        self.push_outbox(entry);
        Ok(booking)
    }

    fn apply_indexes(&self, old: Option<&Booking>, new: &Booking, key: CalendarKey) {
        let old_active = old.is_some_and(|b| b.is_active());
        let now_active = new.is_active();
        if old_active != now_active {
            let counter_key = (new.tenant_id, new.customer.email.clone());
            if now_active {
                *self.customer_active.entry(counter_key).or_insert(0) += 1;
            } else if let Some(mut e) = self.customer_active.get_mut(&counter_key) {
                *e = e.saturating_sub(1);
            }
        }
        self.booking_index.insert(new.id, key);
    }

    // ── Outbox ───────────────────────────────────────────

    fn push_outbox(&self, entry: OutboxEntry) {
        let mut outbox = self.outbox.lock().expect("outbox lock poisoned");
        outbox.push_back(entry);
        metrics::gauge!(observability::OUTBOX_PENDING).set(outbox.len() as f64);
    }

    /// Oldest undelivered entries, up to `max`.
    pub fn pending_outbox(&self, max: usize) -> Vec<OutboxEntry> {
        let outbox = self.outbox.lock().expect("outbox lock poisoned");
        outbox.iter().take(max).cloned().collect()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().expect("outbox lock poisoned").len()
    }

    /// Record a successful delivery. Durable: replay will not re-enqueue
    /// the entry.
    pub async fn mark_delivered(&self, outbox_id: Ulid) -> Result<(), StoreError> {
        self.wal_append(&Event::OutboxDelivered { outbox_id }).await?;
        let mut outbox = self.outbox.lock().expect("outbox lock poisoned");
        outbox.retain(|e| e.id != outbox_id);
        metrics::gauge!(observability::OUTBOX_PENDING).set(outbox.len() as f64);
        Ok(())
    }

    // ── Replay ───────────────────────────────────────────

    fn replay_event(&self, event: Event) {
        match event {
            Event::BookingWritten { booking, outbox } => {
                let new_key = booking.calendar_key();
                // The row may have lived in another calendar before a
                // provider move — evict the stale copy first.
                let mut old = None;
                if let Some(prev) = self.booking_index.get(&booking.id).map(|e| *e.value())
                    && prev != new_key
                    && let Some(cal) = self.calendars.get(&prev).map(|e| e.value().clone())
                {
                    old = cal
                        .try_write()
                        .expect("replay: uncontended write")
                        .remove(booking.id);
                }
                let cal = self.calendar_entry(new_key);
                let mut guard = cal.try_write().expect("replay: uncontended write");
                if old.is_none() {
                    old = guard.remove(booking.id);
                }
                self.apply_indexes(old.as_ref(), &booking, new_key);
                guard.insert(booking);
                if let Some(entry) = outbox {
                    self.outbox
                        .lock()
                        .expect("outbox lock poisoned")
                        .push_back(entry);
                }
            }
            Event::OutboxDelivered { outbox_id } => {
                self.outbox
                    .lock()
                    .expect("outbox lock poisoned")
                    .retain(|e| e.id != outbox_id);
            }
            Event::OutboxPending { entry } => {
                self.outbox
                    .lock()
                    .expect("outbox lock poisoned")
                    .push_back(entry);
            }
        }
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current
    /// state: every row (outbox stripped) plus the still-pending outbox
    /// entries.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut events = Vec::new();
        for entry in self.calendars.iter() {
            let cal = entry.value().clone();
            let guard = cal.read().await;
            for booking in guard.iter() {
                events.push(Event::BookingWritten {
                    booking: booking.clone(),
                    outbox: None,
                });
            }
        }
        {
            let outbox = self.outbox.lock().expect("outbox lock poisoned");
            for entry in outbox.iter() {
                events.push(Event::OutboxPending {
                    entry: entry.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn sample_booking(key: CalendarKey, start: Ms, end: Ms, email: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            tenant_id: key.tenant_id,
            service_id: Ulid::new(),
            provider_id: key.provider_id,
            customer: Customer {
                name: "Katherine Johnson".into(),
                email: email.into(),
                phone: "+15550004444".into(),
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

    #[tokio::test]
    async fn commit_and_read_back() {
        let store = BookingStore::open(&test_wal_path("commit_read.wal")).unwrap();
        let k = key();
        let booking = sample_booking(k, 1000, 2000, "a@example.com");
        let id = booking.id;

        let mut guard = store.calendar_write(k).await.unwrap();
        store
            .commit(&mut guard, booking, EventKind::Created)
            .await
            .unwrap();
        drop(guard);

        let read = store.get_booking(id).await.unwrap();
        assert_eq!(read.span, Span::new(1000, 2000));
        assert_eq!(store.customer_active_count(k.tenant_id, "a@example.com"), 1);
        assert_eq!(store.outbox_len(), 1);
    }

    #[tokio::test]
    async fn cancel_releases_customer_slot() {
        let store = BookingStore::open(&test_wal_path("cancel_slot.wal")).unwrap();
        let k = key();
        let booking = sample_booking(k, 1000, 2000, "b@example.com");

        let mut guard = store.calendar_write(k).await.unwrap();
        let mut committed = store
            .commit(&mut guard, booking, EventKind::Created)
            .await
            .unwrap();
        committed.status = BookingStatus::Cancelled;
        store
            .commit(&mut guard, committed, EventKind::Cancelled)
            .await
            .unwrap();
        drop(guard);

        assert_eq!(store.customer_active_count(k.tenant_id, "b@example.com"), 0);
    }

    #[tokio::test]
    async fn replay_rebuilds_state_and_outbox() {
        let path = test_wal_path("replay_rebuild.wal");
        let k = key();
        let (id, delivered_id) = {
            let store = BookingStore::open(&path).unwrap();
            let booking = sample_booking(k, 1000, 2000, "c@example.com");
            let id = booking.id;
            let mut guard = store.calendar_write(k).await.unwrap();
            store
                .commit(&mut guard, booking, EventKind::Created)
                .await
                .unwrap();
            drop(guard);
            let entry = store.pending_outbox(1)[0].clone();
            store.mark_delivered(entry.id).await.unwrap();

            // second, undelivered mutation
            let mut guard = store.calendar_write(k).await.unwrap();
            let mut b = guard.get(id).unwrap().clone();
            b.notes = Some("moved".into());
            store
                .commit(&mut guard, b, EventKind::Modified)
                .await
                .unwrap();
            drop(guard);
            (id, entry.id)
        };

        let store = BookingStore::open(&path).unwrap();
        let read = store.get_booking(id).await.unwrap();
        assert_eq!(read.notes.as_deref(), Some("moved"));
        assert_eq!(store.customer_active_count(k.tenant_id, "c@example.com"), 1);
        // only the undelivered entry survives
        let pending = store.pending_outbox(10);
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, delivered_id);
    }

    #[tokio::test]
    async fn move_between_calendars() {
        let store = BookingStore::open(&test_wal_path("move_cal.wal")).unwrap();
        let from_key = key();
        let to_key = CalendarKey {
            tenant_id: from_key.tenant_id,
            provider_id: Ulid::new(),
        };
        let booking = sample_booking(from_key, 1000, 2000, "d@example.com");
        let id = booking.id;

        let mut guard = store.calendar_write(from_key).await.unwrap();
        store
            .commit(&mut guard, booking, EventKind::Created)
            .await
            .unwrap();
        drop(guard);

        let (mut from, mut to) = store.calendar_write_pair(from_key, to_key).await.unwrap();
        let mut moved = from.get(id).unwrap().clone();
        moved.provider_id = to_key.provider_id;
        store
            .commit_move(&mut from, &mut to, moved, EventKind::Modified)
            .await
            .unwrap();
        assert!(from.get(id).is_none());
        assert!(to.get(id).is_some());
        drop(from);
        drop(to);

        // active count unchanged by the move
        assert_eq!(store.customer_active_count(from_key.tenant_id, "d@example.com"), 1);
        let resolved = store.resolve_booking_write(id).await.unwrap().unwrap();
        assert_eq!(resolved.0, to_key);
    }

    #[tokio::test]
    async fn resolve_unknown_booking() {
        let store = BookingStore::open(&test_wal_path("resolve_none.wal")).unwrap();
        assert!(store.resolve_booking_write(Ulid::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compaction_preserves_rows_and_pending_outbox() {
        let path = test_wal_path("compact_store.wal");
        let k = key();
        {
            let store = BookingStore::open(&path).unwrap();
            let mut guard = store.calendar_write(k).await.unwrap();
            for i in 0..5i64 {
                let b = sample_booking(k, i * 1000, i * 1000 + 500, "e@example.com");
                store.commit(&mut guard, b, EventKind::Created).await.unwrap();
            }
            drop(guard);
            // deliver three of five
            for entry in store.pending_outbox(3) {
                store.mark_delivered(entry.id).await.unwrap();
            }
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
        }

        let store = BookingStore::open(&path).unwrap();
        let window = Span::new(0, 10_000);
        assert_eq!(store.list_active_for_provider(k, &window).await.len(), 5);
        assert_eq!(store.outbox_len(), 2);
    }

    #[tokio::test]
    async fn list_active_filters_window() {
        let store = BookingStore::open(&test_wal_path("list_window.wal")).unwrap();
        let k = key();
        let mut guard = store.calendar_write(k).await.unwrap();
        for (s, e) in [(0, 500), (1000, 1500), (5000, 6000)] {
            let b = sample_booking(k, s, e, "f@example.com");
            store.commit(&mut guard, b, EventKind::Created).await.unwrap();
        }
        drop(guard);

        let hits = store.list_active_for_provider(k, &Span::new(900, 2000)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(1000, 1500));
    }
}
