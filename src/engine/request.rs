//! Request shapes as handed over by thin request handlers, and their
//! validation into domain types. Validation never touches the store and
//! reports every violated field, not just the first.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::{CancellationReason, Customer, Ms, Span};

use super::error::ValidationError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub tenant_id: String,
    pub service_id: String,
    pub provider_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    /// ISO-8601 / RFC 3339, UTC.
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub special_requests: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifyBookingRequest {
    pub tenant_id: String,
    pub booking_id: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub special_requests: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    pub tenant_id: String,
    pub booking_id: String,
    /// One of `customer_request`, `provider_unavailable`, `emergency`,
    /// `other`.
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub refund_requested: bool,
}

// ── Validated forms ──────────────────────────────────────

pub(crate) struct ValidCreate {
    pub tenant_id: Ulid,
    pub service_id: Ulid,
    pub provider_id: Ulid,
    pub customer: Customer,
    pub span: Span,
    pub notes: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub special_requests: Option<String>,
}

pub(crate) struct ValidModify {
    pub tenant_id: Ulid,
    pub booking_id: Ulid,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub service_id: Option<Ulid>,
    pub provider_id: Option<Ulid>,
    pub notes: Option<String>,
    pub special_requests: Option<String>,
    pub reason: String,
}

pub(crate) struct ValidCancel {
    pub tenant_id: Ulid,
    pub booking_id: Ulid,
    pub reason: CancellationReason,
    pub notes: Option<String>,
    pub refund_requested: bool,
}

// ── Field checks ─────────────────────────────────────────

fn parse_id(v: &mut ValidationError, field: &'static str, raw: &str) -> Option<Ulid> {
    match Ulid::from_string(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            v.push(field, "not a valid id");
            None
        }
    }
}

fn parse_datetime(v: &mut ValidationError, field: &'static str, raw: &str) -> Option<Ms> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.timestamp_millis()),
        Err(_) => {
            v.push(field, "not a valid ISO-8601 datetime");
            None
        }
    }
}

fn check_len(
    v: &mut ValidationError,
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> bool {
    let len = value.chars().count();
    if len < min {
        v.push(field, format!("must be at least {min} characters"));
        false
    } else if len > max {
        v.push(field, format!("must be at most {max} characters"));
        false
    } else {
        true
    }
}

fn check_opt_len(
    v: &mut ValidationError,
    field: &'static str,
    value: &Option<String>,
    max: usize,
) {
    if let Some(s) = value
        && s.chars().count() > max
    {
        v.push(field, format!("must be at most {max} characters"));
    }
}

/// Syntactic email check: one `@` with non-empty sides and a dot in the
/// domain. Deliverability is not our concern.
fn check_email(v: &mut ValidationError, field: &'static str, value: &str) {
    if !check_len(v, field, value, 3, MAX_EMAIL_LEN) {
        return;
    }
    let mut parts = value.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains('@') {
        v.push(field, "not a valid email address");
    }
}

fn check_phone(v: &mut ValidationError, field: &'static str, value: &str) {
    if !check_len(v, field, value, MIN_PHONE_LEN, MAX_PHONE_LEN) {
        return;
    }
    let ok = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    if !ok {
        v.push(field, "may only contain digits, spaces, and + - ( )");
    }
}

// ── Validation entry points ──────────────────────────────

impl CreateBookingRequest {
    pub(crate) fn validate(&self) -> Result<ValidCreate, ValidationError> {
        let mut v = ValidationError::default();

        let tenant_id = parse_id(&mut v, "tenant_id", &self.tenant_id);
        let service_id = parse_id(&mut v, "service_id", &self.service_id);
        let provider_id = parse_id(&mut v, "provider_id", &self.provider_id);

        check_len(&mut v, "customer_name", &self.customer_name, 1, MAX_NAME_LEN);
        check_email(&mut v, "customer_email", &self.customer_email);
        check_phone(&mut v, "customer_phone", &self.customer_phone);

        let start = parse_datetime(&mut v, "start", &self.start);
        let end = parse_datetime(&mut v, "end", &self.end);
        let span = match (start, end) {
            (Some(s), Some(e)) if s < e => Some(Span::new(s, e)),
            (Some(_), Some(_)) => {
                v.push("start", "must be before end");
                None
            }
            _ => None,
        };

        check_opt_len(&mut v, "notes", &self.notes, MAX_NOTES_LEN);
        check_opt_len(
            &mut v,
            "special_requests",
            &self.special_requests,
            MAX_SPECIAL_REQUESTS_LEN,
        );

        let metadata = self.metadata.clone().unwrap_or_default();
        if metadata.len() > MAX_METADATA_ENTRIES {
            v.push(
                "metadata",
                format!("must have at most {MAX_METADATA_ENTRIES} entries"),
            );
        } else if metadata
            .values()
            .any(|val| val.chars().count() > MAX_METADATA_VALUE_LEN)
        {
            v.push(
                "metadata",
                format!("values must be at most {MAX_METADATA_VALUE_LEN} characters"),
            );
        }

        if !v.is_empty() {
            return Err(v);
        }
        Ok(ValidCreate {
            tenant_id: tenant_id.expect("checked"),
            service_id: service_id.expect("checked"),
            provider_id: provider_id.expect("checked"),
            customer: Customer {
                name: self.customer_name.clone(),
                email: self.customer_email.trim().to_ascii_lowercase(),
                phone: self.customer_phone.clone(),
            },
            span: span.expect("checked"),
            notes: self.notes.clone(),
            metadata,
            special_requests: self.special_requests.clone(),
        })
    }
}

impl ModifyBookingRequest {
    pub(crate) fn validate(&self) -> Result<ValidModify, ValidationError> {
        let mut v = ValidationError::default();

        let tenant_id = parse_id(&mut v, "tenant_id", &self.tenant_id);
        let booking_id = parse_id(&mut v, "booking_id", &self.booking_id);
        let start = match &self.start {
            Some(raw) => parse_datetime(&mut v, "start", raw),
            None => None,
        };
        let end = match &self.end {
            Some(raw) => parse_datetime(&mut v, "end", raw),
            None => None,
        };
        let service_id = match &self.service_id {
            Some(raw) => parse_id(&mut v, "service_id", raw),
            None => None,
        };
        let provider_id = match &self.provider_id {
            Some(raw) => parse_id(&mut v, "provider_id", raw),
            None => None,
        };

        check_len(&mut v, "reason", &self.reason, 1, MAX_REASON_LEN);
        check_opt_len(&mut v, "notes", &self.notes, MAX_NOTES_LEN);
        check_opt_len(
            &mut v,
            "special_requests",
            &self.special_requests,
            MAX_SPECIAL_REQUESTS_LEN,
        );

        if !v.is_empty() {
            return Err(v);
        }
        Ok(ValidModify {
            tenant_id: tenant_id.expect("checked"),
            booking_id: booking_id.expect("checked"),
            start,
            end,
            service_id,
            provider_id,
            notes: self.notes.clone(),
            special_requests: self.special_requests.clone(),
            reason: self.reason.clone(),
        })
    }
}

impl CancelBookingRequest {
    pub(crate) fn validate(&self) -> Result<ValidCancel, ValidationError> {
        let mut v = ValidationError::default();

        let tenant_id = parse_id(&mut v, "tenant_id", &self.tenant_id);
        let booking_id = parse_id(&mut v, "booking_id", &self.booking_id);
        let reason = match CancellationReason::parse(&self.reason) {
            Some(r) => Some(r),
            None => {
                v.push(
                    "reason",
                    "must be one of customer_request, provider_unavailable, emergency, other",
                );
                None
            }
        };
        check_opt_len(&mut v, "notes", &self.notes, MAX_CANCEL_NOTES_LEN);

        if !v.is_empty() {
            return Err(v);
        }
        Ok(ValidCancel {
            tenant_id: tenant_id.expect("checked"),
            booking_id: booking_id.expect("checked"),
            reason: reason.expect("checked"),
            notes: self.notes.clone(),
            refund_requested: self.refund_requested,
        })
    }
}
