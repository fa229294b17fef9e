use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::{Booking, CalendarKey, Ms, Span};

use super::conflict::find_all_conflicts;
use super::error::{BookingError, ValidationError};
use super::policy;
use super::Engine;

fn check_window(window: &Span) -> Result<(), BookingError> {
    let mut v = ValidationError::default();
    if window.start >= window.end {
        v.push("window", "start must be before end");
    } else if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        v.push("window", "query window too wide");
    }
    if v.is_empty() { Ok(()) } else { Err(BookingError::Validation(v)) }
}

impl Engine {
    /// Tenant-scoped load. A booking outside the caller's tenant reads as
    /// not-found.
    pub async fn get_booking(&self, tenant_id: Ulid, booking_id: Ulid) -> Result<Booking, BookingError> {
        match self.store.get_booking(booking_id).await {
            Some(b) if b.tenant_id == tenant_id => Ok(b),
            _ => Err(BookingError::NotFound(booking_id)),
        }
    }

    /// Active (`pending`/`confirmed`) bookings for one provider
    /// overlapping `window`, in start order.
    pub async fn list_active_for_provider(
        &self,
        tenant_id: Ulid,
        provider_id: Ulid,
        window: Span,
    ) -> Result<Vec<Booking>, BookingError> {
        check_window(&window)?;
        let key = CalendarKey { tenant_id, provider_id };
        Ok(self.store.list_active_for_provider(key, &window).await)
    }

    /// Diagnostic mode of the conflict detector: every active booking the
    /// candidate interval would collide with.
    pub async fn list_conflicts(
        &self,
        tenant_id: Ulid,
        provider_id: Ulid,
        candidate: Span,
    ) -> Result<Vec<Booking>, BookingError> {
        if let Err(violation) = policy::validate_span(&candidate) {
            let mut v = ValidationError::default();
            v.push("candidate", violation.message());
            return Err(BookingError::Validation(v));
        }
        let key = CalendarKey { tenant_id, provider_id };
        let Some(cal) = self.store.calendar_read(key).await else {
            return Ok(Vec::new());
        };
        Ok(find_all_conflicts(&cal, &candidate, None)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Free slots for a provider: the query window minus active bookings,
    /// optionally filtered by minimum slot duration.
    pub async fn free_windows(
        &self,
        tenant_id: Ulid,
        provider_id: Ulid,
        window: Span,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, BookingError> {
        check_window(&window)?;
        let key = CalendarKey { tenant_id, provider_id };
        let busy: Vec<Span> = self
            .store
            .list_active_for_provider(key, &window)
            .await
            .iter()
            .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
            .collect();
        let merged = merge_overlapping(&busy);
        let mut free = subtract_intervals(&[window], &merged);
        if let Some(min) = min_duration_ms {
            free.retain(|s| s.duration_ms() >= min);
        }
        Ok(free)
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Subtract sorted disjoint `to_remove` intervals from sorted `base`
/// intervals.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
