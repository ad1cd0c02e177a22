//! Fee computation for paid messages.
//!
//! The fee formula is network-wide: the sender uses it to fund a message and
//! every receiver uses it again to verify the funding. Schedules are versioned
//! so that both sides can name the exact formula they apply.

use serde::{Deserialize, Serialize};

/// Base units per coin.
pub const COIN: u64 = 100_000_000;

/// V1 rate: base units per 1000 bytes per retention period.
pub const FEE_PER_KB_PER_PERIOD_V1: u64 = 50_000;

/// A versioned fee formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeSchedule {
    /// `floor(50_000 * size / 1000) * ttl_periods`.
    #[default]
    V1,
}

impl FeeSchedule {
    /// Schedule version number.
    pub const fn version(&self) -> u8 {
        match self {
            FeeSchedule::V1 => 1,
        }
    }

    /// Rate per 1000 bytes per period.
    pub const fn fee_per_kb_per_period(&self) -> u64 {
        match self {
            FeeSchedule::V1 => FEE_PER_KB_PER_PERIOD_V1,
        }
    }

    /// Required fee for an envelope of `payload_size` bytes kept for
    /// `ttl_periods` periods.
    ///
    /// Non-decreasing in both arguments. Saturates instead of overflowing.
    pub fn required_fee(&self, payload_size: usize, ttl_periods: u32) -> u64 {
        let size = u64::try_from(payload_size).unwrap_or(u64::MAX);
        let per_period = self.fee_per_kb_per_period().saturating_mul(size) / 1000;
        per_period.saturating_mul(ttl_periods as u64)
    }
}

/// Required fee under the default schedule.
pub fn required_fee(payload_size: usize, ttl_periods: u32) -> u64 {
    FeeSchedule::default().required_fee(payload_size, ttl_periods)
}

/// Format base units as a decimal coin amount with eight places.
pub fn format_amount(amount: u64) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}
