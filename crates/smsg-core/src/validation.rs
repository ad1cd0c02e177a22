//! Envelope validation: structural checks applied before storing.

use crate::envelope::{Envelope, ENVELOPE_VERSION};
use crate::error::ValidationError;
use crate::limits::{MAX_FREE_ENVELOPE_BYTES, MAX_PAID_ENVELOPE_BYTES, MIN_TTL_PERIODS};

/// Validate an envelope's structure.
///
/// This performs:
/// - Version check
/// - TTL range check against `max_ttl_periods`
/// - Size limit (free and paid envelopes have different limits)
/// - No funding reference on free envelopes
///
/// A paid claim without a funding reference passes. Funding is checked
/// against the ledger at ingest, which keeps such envelopes as unpaid.
pub fn validate_envelope(envelope: &Envelope, max_ttl_periods: u32) -> Result<(), ValidationError> {
    if envelope.header.version != ENVELOPE_VERSION {
        return Err(ValidationError::UnsupportedVersion(envelope.header.version));
    }

    let ttl = envelope.header.ttl_periods;
    if !(MIN_TTL_PERIODS..=max_ttl_periods).contains(&ttl) {
        return Err(ValidationError::InvalidTtl {
            got: ttl,
            min: MIN_TTL_PERIODS,
            max: max_ttl_periods,
        });
    }

    if envelope.ciphertext.is_empty() {
        return Err(ValidationError::EmptyCiphertext);
    }

    let limit = if envelope.header.paid {
        MAX_PAID_ENVELOPE_BYTES
    } else {
        MAX_FREE_ENVELOPE_BYTES
    };
    let size = envelope.payload_size();
    if size > limit {
        return Err(ValidationError::TooLarge { size, limit });
    }

    if !envelope.header.paid && envelope.funding_txid.is_some() {
        return Err(ValidationError::UnexpectedFunding);
    }

    Ok(())
}
