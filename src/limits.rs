use crate::model::{MINUTE_MS, Ms};

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
/// No appointment (work time + buffer) spans more than a day.
pub const MAX_SPAN_DURATION_MS: Ms = 24 * 60 * MINUTE_MS;

/// Slots on the current day must start at least this far in the future.
pub const MIN_LEAD_TIME_MS: Ms = 15 * MINUTE_MS;

pub const MAX_APPOINTMENTS_PER_BUSINESS: usize = 1_000_000;
pub const MAX_ACTIONS_PER_BUSINESS: usize = 1_000_000;
pub const MAX_PROPOSALS_PER_ACTION: usize = 20;
pub const MAX_NOTES_LEN: usize = 16 * 1024;
pub const MAX_REASON_LEN: usize = 2_048;
pub const MAX_PLATFORM_LEN: usize = 256;
pub const MAX_TENANTS: usize = 10_000;
