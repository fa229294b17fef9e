use serde::{Deserialize, Serialize};

use crate::model::{DAY_MS, HOUR_MS, MINUTE_MS, Ms};

/// Tunable business rules. Defaults match the standard deployment; all
/// knobs can be overridden via `SLOTBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum lead time between "now" and a booking's start, in minutes.
    pub min_advance_minutes: i64,
    /// Furthest a booking's start may lie in the future, in days.
    pub max_horizon_days: i64,
    /// Cancellations closer to start than this many hours are accepted but
    /// flagged outside the refund window.
    pub cancellation_window_hours: i64,
    /// Interval reschedules allowed per booking before modify is refused.
    pub max_reschedules: u32,
    /// Active bookings a single customer may hold within a tenant.
    pub max_concurrent_per_customer: u32,
    /// New bookings start `confirmed` when true, `pending` otherwise
    /// (deployments with an approval step set this to false).
    pub auto_confirm: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_advance_minutes: 30,
            max_horizon_days: 365,
            cancellation_window_hours: 24,
            max_reschedules: 3,
            max_concurrent_per_customer: 5,
            auto_confirm: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load from `SLOTBOOK_*` environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_advance_minutes: env_parse("SLOTBOOK_MIN_ADVANCE_MINUTES", d.min_advance_minutes),
            max_horizon_days: env_parse("SLOTBOOK_MAX_HORIZON_DAYS", d.max_horizon_days),
            cancellation_window_hours: env_parse(
                "SLOTBOOK_CANCELLATION_WINDOW_HOURS",
                d.cancellation_window_hours,
            ),
            max_reschedules: env_parse("SLOTBOOK_MAX_RESCHEDULES", d.max_reschedules),
            max_concurrent_per_customer: env_parse(
                "SLOTBOOK_MAX_CONCURRENT_PER_CUSTOMER",
                d.max_concurrent_per_customer,
            ),
            auto_confirm: env_parse("SLOTBOOK_AUTO_CONFIRM", d.auto_confirm),
        }
    }

    pub fn min_advance_ms(&self) -> Ms {
        self.min_advance_minutes * MINUTE_MS
    }

    pub fn horizon_ms(&self) -> Ms {
        self.max_horizon_days * DAY_MS
    }

    pub fn cancellation_window_ms(&self) -> Ms {
        self.cancellation_window_hours * HOUR_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.min_advance_minutes, 30);
        assert_eq!(c.max_horizon_days, 365);
        assert_eq!(c.cancellation_window_hours, 24);
        assert_eq!(c.max_reschedules, 3);
        assert!(c.auto_confirm);
    }

    #[test]
    fn ms_accessors() {
        let c = EngineConfig::default();
        assert_eq!(c.min_advance_ms(), 30 * MINUTE_MS);
        assert_eq!(c.horizon_ms(), 365 * DAY_MS);
        assert_eq!(c.cancellation_window_ms(), 24 * HOUR_MS);
    }
}
