//! Overlap detection over a locked provider calendar.
//!
//! Two half-open intervals `[a1,a2)` and `[b1,b2)` overlap iff
//! `b1 < a2 && b2 > a1`; adjacency is not overlap, so back-to-back
//! bookings are permitted. The calendar's `overlapping` iterator already
//! narrows the scan to the candidate window, which covers any existing
//! booking long enough to reach into it.

use ulid::Ulid;

use crate::model::{Booking, ProviderCalendar, Span};

/// First active booking whose interval overlaps `candidate`, if any.
/// `exclude` skips the booking being rescheduled so it cannot conflict
/// with itself.
pub fn find_conflict<'a>(
    cal: &'a ProviderCalendar,
    candidate: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    cal.overlapping(candidate)
        .find(|b| b.is_active() && Some(b.id) != exclude)
}

/// Diagnostic mode: every active overlap, in start order.
pub fn find_all_conflicts<'a>(
    cal: &'a ProviderCalendar,
    candidate: &Span,
    exclude: Option<Ulid>,
) -> Vec<&'a Booking> {
    cal.overlapping(candidate)
        .filter(|b| b.is_active() && Some(b.id) != exclude)
        .collect()
}
