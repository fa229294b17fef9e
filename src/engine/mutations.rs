use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_CALENDAR;
use crate::model::*;
use crate::store::StoreError;

use super::conflict::find_conflict;
use super::error::*;
use super::policy::{self, now_ms};
use super::request::*;
use super::Engine;

/// Everything a modify will change, computed against the current row
/// before any conflict check. `None` means the request is an effective
/// no-op.
struct PlannedModify {
    updated: Booking,
    new_span: Span,
    interval_changed: bool,
    provider_changed: bool,
}

impl Engine {
    /// Create a durable, conflict-free reservation.
    ///
    /// Validation (all violations reported) → time policy → calendar
    /// write guard → conflict detection → customer cap → group-commit
    /// insert → outbox enqueue. On any failure nothing is written.
    pub async fn create_booking(&self, req: &CreateBookingRequest) -> Result<Booking, BookingError> {
        let input = req.validate().map_err(|e| {
            self.metrics.record_validation_failure();
            BookingError::Validation(e)
        })?;
        let now = now_ms();
        if let Err(violation) = policy::check_booking_window(now, &input.span, &self.config) {
            self.metrics.record_validation_failure();
            let mut v = ValidationError::default();
            v.push("start", violation.message());
            return Err(BookingError::Validation(v));
        }

        let key = CalendarKey {
            tenant_id: input.tenant_id,
            provider_id: input.provider_id,
        };
        let mut cal = self
            .store
            .calendar_write(key)
            .await
            .map_err(|e| BookingError::Creation(CreationError::Store(e)))?;
        if cal.len() >= MAX_BOOKINGS_PER_CALENDAR {
            return Err(BookingError::Creation(CreationError::Store(
                StoreError::CalendarFull(key),
            )));
        }

        if let Some(existing) = find_conflict(&cal, &input.span, None) {
            self.metrics.record_conflict_detected();
            debug!(
                provider_id = %key.provider_id,
                conflicting = %existing.id,
                "create rejected: interval conflict"
            );
            return Err(BookingError::Creation(CreationError::Conflict {
                booking_id: existing.id,
                span: existing.span,
            }));
        }

        let held = self
            .store
            .customer_active_count(input.tenant_id, &input.customer.email);
        if held >= self.config.max_concurrent_per_customer {
            return Err(BookingError::Creation(CreationError::CustomerCap {
                limit: self.config.max_concurrent_per_customer,
            }));
        }

        let status = if self.config.auto_confirm {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        let booking = Booking {
            id: Ulid::new(),
            tenant_id: input.tenant_id,
            service_id: input.service_id,
            provider_id: input.provider_id,
            customer: input.customer,
            span: input.span,
            status,
            notes: input.notes,
            metadata: input.metadata,
            special_requests: input.special_requests,
            reschedule_count: 0,
            cancellation: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let committed = self
            .store
            .commit(&mut cal, booking, EventKind::Created)
            .await
            .map_err(|e| BookingError::Creation(CreationError::Store(e)))?;
        drop(cal);

        self.metrics.record_created();
        info!(
            booking_id = %committed.id,
            tenant_id = %committed.tenant_id,
            provider_id = %committed.provider_id,
            status = committed.status.as_str(),
            "booking created"
        );
        Ok(committed)
    }

    /// Modify a booking. Interval or provider changes re-run time policy
    /// and conflict detection against the new slot, excluding the
    /// booking's own row, under the same locking discipline as create.
    pub async fn modify_booking(&self, req: &ModifyBookingRequest) -> Result<Booking, BookingError> {
        let input = req.validate().map_err(|e| {
            self.metrics.record_validation_failure();
            BookingError::Validation(e)
        })?;
        let now = now_ms();

        loop {
            let Some((key, mut guard)) = self
                .store
                .resolve_booking_write(input.booking_id)
                .await
                .map_err(|e| BookingError::Modification(ModificationError::Store(e)))?
            else {
                return Err(BookingError::NotFound(input.booking_id));
            };
            let current = guard
                .get(input.booking_id)
                .cloned()
                .expect("resolved booking present under guard");
            if current.tenant_id != input.tenant_id {
                return Err(BookingError::NotFound(input.booking_id));
            }

            let target_key = CalendarKey {
                tenant_id: current.tenant_id,
                provider_id: input.provider_id.unwrap_or(current.provider_id),
            };
            if target_key == key {
                return self.modify_in_place(&input, now, current, &mut guard).await;
            }

            // Provider reassignment needs both calendars; release and
            // re-acquire in sorted key order, then re-check the row since
            // it was briefly unlocked.
            drop(guard);
            let (mut from, mut to) = self
                .store
                .calendar_write_pair(key, target_key)
                .await
                .map_err(|e| BookingError::Modification(ModificationError::Store(e)))?;
            let Some(current) = from.get(input.booking_id).cloned() else {
                continue;
            };
            if current.tenant_id != input.tenant_id {
                return Err(BookingError::NotFound(input.booking_id));
            }
            if to.len() >= MAX_BOOKINGS_PER_CALENDAR {
                return Err(BookingError::Modification(ModificationError::Store(
                    StoreError::CalendarFull(target_key),
                )));
            }

            let Some(plan) = self.plan_modify(&input, now, &current)? else {
                return Ok(current);
            };
            if let Some(existing) = find_conflict(&to, &plan.new_span, Some(current.id)) {
                self.metrics.record_conflict_detected();
                return Err(BookingError::Modification(ModificationError::Conflict {
                    booking_id: existing.id,
                    span: existing.span,
                }));
            }

            let committed = self
                .store
                .commit_move(&mut from, &mut to, plan.updated, EventKind::Modified)
                .await
                .map_err(|e| BookingError::Modification(ModificationError::Store(e)))?;
            drop(from);
            drop(to);
            return Ok(self.finish_modify(committed, plan.interval_changed));
        }
    }

    async fn modify_in_place(
        &self,
        input: &ValidModify,
        now: Ms,
        current: Booking,
        cal: &mut ProviderCalendar,
    ) -> Result<Booking, BookingError> {
        let Some(plan) = self.plan_modify(input, now, &current)? else {
            return Ok(current);
        };
        if plan.interval_changed || plan.provider_changed {
            if let Some(existing) = find_conflict(cal, &plan.new_span, Some(current.id)) {
                self.metrics.record_conflict_detected();
                return Err(BookingError::Modification(ModificationError::Conflict {
                    booking_id: existing.id,
                    span: existing.span,
                }));
            }
        }

        let committed = self
            .store
            .commit(cal, plan.updated, EventKind::Modified)
            .await
            .map_err(|e| BookingError::Modification(ModificationError::Store(e)))?;
        Ok(self.finish_modify(committed, plan.interval_changed))
    }

    /// Lifecycle, cap and policy checks plus the updated row. Pure with
    /// respect to the store; conflict detection stays with the caller,
    /// which holds the right guard.
    fn plan_modify(
        &self,
        input: &ValidModify,
        now: Ms,
        current: &Booking,
    ) -> Result<Option<PlannedModify>, BookingError> {
        if current.status.is_terminal() {
            return Err(BookingError::Modification(ModificationError::Terminal {
                status: current.status,
            }));
        }

        let new_span = Span {
            start: input.start.unwrap_or(current.span.start),
            end: input.end.unwrap_or(current.span.end),
        };
        let interval_changed = new_span != current.span;
        let provider_changed = input
            .provider_id
            .is_some_and(|p| p != current.provider_id);

        if interval_changed {
            if current.reschedule_count >= self.config.max_reschedules {
                return Err(BookingError::Modification(ModificationError::RescheduleCap {
                    count: current.reschedule_count,
                    limit: self.config.max_reschedules,
                }));
            }
            if let Err(violation) = policy::check_booking_window(now, &new_span, &self.config) {
                self.metrics.record_validation_failure();
                let mut v = ValidationError::default();
                v.push("start", violation.message());
                return Err(BookingError::Validation(v));
            }
        }

        let mut updated = current.clone();
        let mut changed: Vec<String> = Vec::new();
        if interval_changed {
            if new_span.start != current.span.start {
                changed.push("start".into());
            }
            if new_span.end != current.span.end {
                changed.push("end".into());
            }
            updated.span = new_span;
            updated.reschedule_count += 1;
        }
        if let Some(service_id) = input.service_id
            && service_id != current.service_id
        {
            updated.service_id = service_id;
            changed.push("service_id".into());
        }
        if provider_changed {
            updated.provider_id = input.provider_id.expect("provider_changed implies Some");
            changed.push("provider_id".into());
        }
        if let Some(notes) = &input.notes
            && current.notes.as_ref() != Some(notes)
        {
            updated.notes = Some(notes.clone());
            changed.push("notes".into());
        }
        if let Some(special) = &input.special_requests
            && current.special_requests.as_ref() != Some(special)
        {
            updated.special_requests = Some(special.clone());
            changed.push("special_requests".into());
        }

        if changed.is_empty() {
            return Ok(None);
        }
        updated.history.push(ModificationRecord {
            at: now,
            changed,
            reason: input.reason.clone(),
        });
        updated.updated_at = now;
        Ok(Some(PlannedModify {
            updated,
            new_span,
            interval_changed,
            provider_changed,
        }))
    }

    fn finish_modify(&self, committed: Booking, interval_changed: bool) -> Booking {
        if interval_changed {
            self.metrics.record_conflict_resolved();
        }
        info!(
            booking_id = %committed.id,
            tenant_id = %committed.tenant_id,
            reschedules = committed.reschedule_count,
            "booking modified"
        );
        committed
    }

    /// Cancel a booking. Always a status change, never a row removal;
    /// cancelling an already terminal booking is an error. Refund
    /// eligibility is evaluated against the cancellation window and
    /// recorded on the row — the cancellation itself is accepted either
    /// way.
    pub async fn cancel_booking(&self, req: &CancelBookingRequest) -> Result<Booking, BookingError> {
        let input = req.validate().map_err(|e| {
            self.metrics.record_validation_failure();
            BookingError::Validation(e)
        })?;
        let now = now_ms();

        let Some((_key, mut guard)) = self
            .store
            .resolve_booking_write(input.booking_id)
            .await
            .map_err(|e| BookingError::Cancellation(CancellationError::Store(e)))?
        else {
            return Err(BookingError::NotFound(input.booking_id));
        };
        let current = guard
            .get(input.booking_id)
            .cloned()
            .expect("resolved booking present under guard");
        if current.tenant_id != input.tenant_id {
            return Err(BookingError::NotFound(input.booking_id));
        }
        if current.status.is_terminal() {
            return Err(BookingError::Cancellation(CancellationError::AlreadyTerminal {
                status: current.status,
            }));
        }

        let mut updated = current.clone();
        updated.status = BookingStatus::Cancelled;
        updated.cancellation = Some(CancellationRecord {
            reason: input.reason,
            notes: input.notes.clone(),
            refund_requested: input.refund_requested,
            refund_auto_eligible: policy::refund_auto_eligible(now, current.span.start, &self.config),
        });
        updated.history.push(ModificationRecord {
            at: now,
            changed: vec!["status".into()],
            reason: input.reason.as_str().into(),
        });
        updated.updated_at = now;

        let committed = self
            .store
            .commit(&mut guard, updated, EventKind::Cancelled)
            .await
            .map_err(|e| BookingError::Cancellation(CancellationError::Store(e)))?;
        drop(guard);

        self.metrics.record_cancelled();
        info!(
            booking_id = %committed.id,
            tenant_id = %committed.tenant_id,
            reason = input.reason.as_str(),
            "booking cancelled"
        );
        Ok(committed)
    }
}
