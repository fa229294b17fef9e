//! Hard bounds on externally supplied values. Validation and the store
//! reject anything beyond these before it can reach the WAL.

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MIN_PHONE_LEN: usize = 10;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_NOTES_LEN: usize = 1000;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 500;
pub const MAX_CANCEL_NOTES_LEN: usize = 500;
pub const MAX_REASON_LEN: usize = 255;
pub const MAX_METADATA_ENTRIES: usize = 64;
pub const MAX_METADATA_VALUE_LEN: usize = 1000;

/// 2000-01-01T00:00:00Z. Anything earlier is a malformed timestamp.
pub const MIN_VALID_TIMESTAMP_MS: i64 = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: i64 = 4_102_444_800_000;

/// A single booking may not span more than 7 days.
pub const MAX_SPAN_DURATION_MS: i64 = 7 * 24 * 3_600_000;

/// Read queries wider than this are rejected.
pub const MAX_QUERY_WINDOW_MS: i64 = 366 * 24 * 3_600_000;

/// Rows retained per provider calendar (terminal rows included).
pub const MAX_BOOKINGS_PER_CALENDAR: usize = 100_000;

/// Calendar write-guard acquisition deadline. Exceeding it surfaces as a
/// store failure the caller may retry with backoff.
pub const CALENDAR_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Largest WAL frame accepted on replay. A length prefix beyond this is
/// treated as corruption, not an allocation request.
pub const MAX_WAL_FRAME_LEN: usize = 16 * 1024 * 1024;
