//! Engine configuration.

use serde::{Deserialize, Serialize};

use smsg_core::limits::{
    DEFAULT_BUCKET_WIDTH_SECS, DEFAULT_PERIOD_SECS, FREE_TTL_PERIODS, MAX_TTL_PERIODS,
    MIN_TTL_PERIODS,
};
use smsg_core::{Envelope, FeeSchedule};
use smsg_store::EnvelopeMeta;

use crate::error::{Result, SmsgError};

/// Configuration for the messaging engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Width of a retention bucket in seconds.
    pub bucket_width_secs: u64,
    /// Length of one retention period in seconds.
    pub period_secs: u64,
    /// Fee formula shared by senders and verifiers.
    pub fee_schedule: FeeSchedule,
    /// Largest ttl accepted for paid messages and on ingest.
    pub max_ttl_periods: u32,
    /// Ttl given to free messages.
    pub free_ttl_periods: u32,
    /// Confirmations a funding transaction needs before the message is propagated.
    pub required_confirmations: u32,
    /// Whether to verify funding of incoming paid envelopes.
    pub verify_on_ingest: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
            period_secs: DEFAULT_PERIOD_SECS,
            fee_schedule: FeeSchedule::default(),
            max_ttl_periods: MAX_TTL_PERIODS,
            free_ttl_periods: FREE_TTL_PERIODS,
            required_confirmations: 1,
            verify_on_ingest: true,
        }
    }
}

impl EngineConfig {
    /// Check a requested paid ttl against the configured range.
    pub fn check_ttl(&self, ttl_periods: u32) -> Result<()> {
        if !(MIN_TTL_PERIODS..=self.max_ttl_periods).contains(&ttl_periods) {
            return Err(SmsgError::InvalidTtl {
                got: ttl_periods,
                min: MIN_TTL_PERIODS,
                max: self.max_ttl_periods,
            });
        }
        Ok(())
    }

    /// Storage bookkeeping for an envelope arriving at `now`.
    pub fn envelope_meta(&self, envelope: &Envelope, paid: bool, now: i64) -> EnvelopeMeta {
        EnvelopeMeta {
            paid,
            received_at: now,
            expires_at: envelope.expires_at(self.period_secs),
            bucket: envelope.bucket(self.bucket_width_secs),
        }
    }
}
