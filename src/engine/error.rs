use ulid::Ulid;

use crate::model::{BookingStatus, Span};
use crate::store::StoreError;

/// A single failed input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

/// Input failed shape or temporal checks. Lists every violated field, not
/// just the first. Raised before any store interaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub(crate) fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldViolation> {
        self.violations.iter().find(|v| v.field == name)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation failed:")?;
        for v in &self.violations {
            write!(f, " {}: {};", v.field, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// A valid-shaped create request could not be committed.
#[derive(Debug)]
pub enum CreationError {
    /// The candidate interval overlaps an existing active booking.
    Conflict { booking_id: Ulid, span: Span },
    /// The customer already holds the maximum number of active bookings.
    CustomerCap { limit: u32 },
    Store(StoreError),
}

/// A valid-shaped modify request is disallowed or failed to commit.
#[derive(Debug)]
pub enum ModificationError {
    Terminal { status: BookingStatus },
    RescheduleCap { count: u32, limit: u32 },
    Conflict { booking_id: Ulid, span: Span },
    Store(StoreError),
}

/// Cancellation disallowed or failed to commit. Cancelling an already
/// terminal booking is an error, not a no-op, to surface duplicate-cancel
/// bugs.
#[derive(Debug)]
pub enum CancellationError {
    AlreadyTerminal { status: BookingStatus },
    Store(StoreError),
}

/// Everything a booking operation can fail with. Callers branch on the
/// variant; `code()` and `http_status()` give the calling layer a stable
/// rendering without inspecting internals.
#[derive(Debug)]
pub enum BookingError {
    Validation(ValidationError),
    Creation(CreationError),
    Modification(ModificationError),
    Cancellation(CancellationError),
    /// Unknown id, or a booking outside the caller's tenant — reported
    /// identically so existence never leaks across tenants.
    NotFound(Ulid),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Creation(CreationError::Conflict { .. }) => "booking_conflict",
            Self::Creation(CreationError::CustomerCap { .. }) => "customer_cap_exceeded",
            Self::Creation(CreationError::Store(_)) => "store_unavailable",
            Self::Modification(ModificationError::Terminal { .. }) => "booking_terminal",
            Self::Modification(ModificationError::RescheduleCap { .. }) => {
                "reschedule_cap_exceeded"
            }
            Self::Modification(ModificationError::Conflict { .. }) => "booking_conflict",
            Self::Modification(ModificationError::Store(_)) => "store_unavailable",
            Self::Cancellation(CancellationError::AlreadyTerminal { .. }) => "booking_terminal",
            Self::Cancellation(CancellationError::Store(_)) => "store_unavailable",
            Self::NotFound(_) => "booking_not_found",
        }
    }

    /// HTTP-style status family: 400 validation, 404 not-found,
    /// 409 conflict, 422 business-rule, 500 internal.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Creation(CreationError::Conflict { .. })
            | Self::Modification(ModificationError::Conflict { .. }) => 409,
            Self::Creation(CreationError::CustomerCap { .. })
            | Self::Modification(ModificationError::Terminal { .. })
            | Self::Modification(ModificationError::RescheduleCap { .. })
            | Self::Cancellation(CancellationError::AlreadyTerminal { .. }) => 422,
            Self::Creation(CreationError::Store(_))
            | Self::Modification(ModificationError::Store(_))
            | Self::Cancellation(CancellationError::Store(_)) => 500,
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::Creation(CreationError::Conflict { booking_id, span }) => write!(
                f,
                "interval conflicts with booking {booking_id} [{}, {})",
                span.start, span.end
            ),
            Self::Creation(CreationError::CustomerCap { limit }) => {
                write!(f, "customer already holds {limit} active bookings")
            }
            Self::Creation(CreationError::Store(e)) => write!(f, "create failed: {e}"),
            Self::Modification(ModificationError::Terminal { status }) => {
                write!(f, "cannot modify a {} booking", status.as_str())
            }
            Self::Modification(ModificationError::RescheduleCap { count, limit }) => {
                write!(f, "reschedule count {count} reached the limit of {limit}")
            }
            Self::Modification(ModificationError::Conflict { booking_id, span }) => write!(
                f,
                "new interval conflicts with booking {booking_id} [{}, {})",
                span.start, span.end
            ),
            Self::Modification(ModificationError::Store(e)) => write!(f, "modify failed: {e}"),
            Self::Cancellation(CancellationError::AlreadyTerminal { status }) => {
                write!(f, "cannot cancel a {} booking", status.as_str())
            }
            Self::Cancellation(CancellationError::Store(e)) => write!(f, "cancel failed: {e}"),
            Self::NotFound(id) => write!(f, "booking not found: {id}"),
        }
    }
}

impl std::error::Error for BookingError {
    /// Root cause for logs; never shown to end users.
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Creation(CreationError::Store(e))
            | Self::Modification(ModificationError::Store(e))
            | Self::Cancellation(CancellationError::Store(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for BookingError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}
