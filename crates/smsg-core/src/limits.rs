//! Protocol limits.

/// Largest envelope accepted without funding.
pub const MAX_FREE_ENVELOPE_BYTES: usize = 24_000;

/// Largest envelope accepted with funding.
pub const MAX_PAID_ENVELOPE_BYTES: usize = 512 * 1024;

/// Shortest retention, in periods.
pub const MIN_TTL_PERIODS: u32 = 1;

/// Longest retention, in periods.
pub const MAX_TTL_PERIODS: u32 = 31;

/// Retention applied to free messages, in periods.
pub const FREE_TTL_PERIODS: u32 = 2;

/// Default retention period length (one day).
pub const DEFAULT_PERIOD_SECS: u64 = 86_400;

/// Default bucket width (one hour).
pub const DEFAULT_BUCKET_WIDTH_SECS: u64 = 3_600;
