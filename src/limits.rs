use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_BOOKING_ID_LEN: usize = 128;
pub const MAX_SKILLS: usize = 64;
pub const MAX_EMPLOYEES_PER_BOOKING: usize = 64;
pub const MAX_BOOKINGS_PER_MACHINE: usize = 100_000;
pub const MAX_REORDER_BATCH: usize = 10_000;

/// Machine codes are `M0000`..`M9999`.
pub const MACHINE_CODE_SPACE: u128 = 10_000;
pub const MAX_MACHINES: usize = 5_000;
pub const MACHINE_CODE_ATTEMPTS: usize = 10;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One year.
pub const MAX_BOOKING_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// HTTP request bodies larger than this are rejected with 413.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
