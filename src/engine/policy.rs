//! Pure temporal policy. Nothing here consults the store; this is the
//! unit-test surface for every temporal edge case.

use crate::config::EngineConfig;
use crate::limits::{MAX_SPAN_DURATION_MS, MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::{Ms, Span};

/// Why a candidate interval is not bookable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeViolation {
    /// start >= end.
    InvalidOrder,
    /// A timestamp outside the representable range.
    OutOfRange,
    /// Wider than a single booking is allowed to be.
    TooWide,
    /// Starts sooner than the advance-notice minimum.
    TooSoon { minutes_required: i64 },
    /// Starts beyond the booking horizon.
    TooFar { days_allowed: i64 },
}

impl TimeViolation {
    pub fn message(&self) -> String {
        match self {
            Self::InvalidOrder => "start must be before end".into(),
            Self::OutOfRange => "timestamp out of range".into(),
            Self::TooWide => "booking spans too long an interval".into(),
            Self::TooSoon { minutes_required } => {
                format!("must start at least {minutes_required} minutes from now")
            }
            Self::TooFar { days_allowed } => {
                format!("must start within {days_allowed} days from now")
            }
        }
    }
}

/// Shape sanity: ordering, representable range, maximum width.
pub fn validate_span(span: &Span) -> Result<(), TimeViolation> {
    if span.start >= span.end {
        return Err(TimeViolation::InvalidOrder);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(TimeViolation::OutOfRange);
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(TimeViolation::TooWide);
    }
    Ok(())
}

/// Business window relative to `now`: advance notice and horizon. A start
/// exactly at `now + min_advance` or exactly at `now + horizon` is
/// accepted.
pub fn check_booking_window(
    now: Ms,
    span: &Span,
    config: &EngineConfig,
) -> Result<(), TimeViolation> {
    validate_span(span)?;
    if span.start - now < config.min_advance_ms() {
        return Err(TimeViolation::TooSoon {
            minutes_required: config.min_advance_minutes,
        });
    }
    if span.start - now > config.horizon_ms() {
        return Err(TimeViolation::TooFar {
            days_allowed: config.max_horizon_days,
        });
    }
    Ok(())
}

/// Whether a refund-requesting cancellation is automatically eligible:
/// the booking must start more than the cancellation window from now.
/// Ineligible cancellations are still accepted, just flagged.
pub fn refund_auto_eligible(now: Ms, start: Ms, config: &EngineConfig) -> bool {
    start - now > config.cancellation_window_ms()
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}
