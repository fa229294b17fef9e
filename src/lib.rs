//! slotbook — a multi-tenant appointment-booking engine.
//!
//! Turns booking requests into durable, conflict-free reservations and
//! keeps each provider's calendar internally consistent under concurrent
//! requests: half-open interval conflict detection, advance-notice and
//! horizon policy, reschedule and per-customer caps, per-provider write
//! serialization, WAL durability with group commit, and at-least-once
//! lifecycle event delivery through an outbox dispatcher.
//!
//! The engine is a library component invoked by thin request handlers; it
//! exposes no network surface of its own.

pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod outbox;
pub mod publish;
pub mod store;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{
    BookingError, CancelBookingRequest, CancellationError, CreateBookingRequest, CreationError,
    Engine, FieldViolation, ModificationError, ModifyBookingRequest, ValidationError,
};
pub use model::{
    Booking, BookingEvent, BookingStatus, CancellationReason, Customer, EventKind, Ms, Span,
};
pub use observability::MetricsSnapshot;
pub use publish::{BroadcastPublisher, EventPublisher, PublishError};
