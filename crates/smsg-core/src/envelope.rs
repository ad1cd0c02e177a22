//! Envelope: the wire and storage unit of one encrypted message.
//!
//! An envelope is immutable once built. Its hash covers the canonical header
//! and the ciphertext. The funding txid travels alongside but sits outside the
//! hash, since the funding transaction itself commits to the hash.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::{Address, RecipientTag};
use crate::canonical::canonical_header_bytes;
use crate::crypto::Blake3Hash;
use crate::error::CoreError;
use crate::types::{MessageHash, Txid};

/// The current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// The hashed metadata of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Format version (currently 1).
    pub version: u8,

    /// Sender-claimed send time (Unix seconds). Untrusted.
    pub timestamp: i64,

    /// Number of retention periods the message is kept for.
    pub ttl_periods: u32,

    /// Sender address, `None` for anonymous messages.
    pub sender: Option<Address>,

    /// Tag derived from the recipient address.
    pub recipient_tag: RecipientTag,

    /// Whether the sender claims the message is funded.
    pub paid: bool,
}

/// A complete envelope: header + ciphertext + optional funding reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The hashed header.
    pub header: EnvelopeHeader,

    /// The sealed message (see `smsg-crypto`).
    pub ciphertext: Bytes,

    /// Funding transaction for paid envelopes. Not covered by the hash.
    pub funding_txid: Option<Txid>,
}

impl Envelope {
    /// Bytes covered by the message hash: canonical header || ciphertext.
    pub fn hashed_bytes(&self) -> Vec<u8> {
        let mut buf = canonical_header_bytes(&self.header);
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    /// Compute the content-addressed hash.
    pub fn compute_hash(&self) -> MessageHash {
        MessageHash(Blake3Hash::hash(&self.hashed_bytes()).0)
    }

    /// Size in bytes used for fee computation.
    pub fn payload_size(&self) -> usize {
        canonical_header_bytes(&self.header).len() + self.ciphertext.len()
    }

    /// Sender-claimed timestamp.
    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    /// Retention periods requested.
    pub fn ttl_periods(&self) -> u32 {
        self.header.ttl_periods
    }

    /// Sender address, if revealed.
    pub fn sender(&self) -> Option<&Address> {
        self.header.sender.as_ref()
    }

    /// Recipient tag.
    pub fn recipient_tag(&self) -> &RecipientTag {
        &self.header.recipient_tag
    }

    /// Whether the sender claims this envelope is funded.
    pub fn claims_paid(&self) -> bool {
        self.header.paid
    }

    /// Whether this envelope is addressed to `address`.
    pub fn is_for(&self, address: &Address) -> bool {
        self.header.recipient_tag == address.recipient_tag()
    }

    /// Unix time after which the envelope is no longer retained.
    pub fn expires_at(&self, period_secs: u64) -> i64 {
        let ttl_secs = (self.header.ttl_periods as u64).saturating_mul(period_secs);
        self.header
            .timestamp
            .saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
    }

    /// Whether the envelope has expired at `now`.
    pub fn is_expired(&self, now: i64, period_secs: u64) -> bool {
        now >= self.expires_at(period_secs)
    }

    /// Time bucket index: `floor(timestamp / bucket_width)`.
    pub fn bucket(&self, bucket_width_secs: u64) -> i64 {
        let width = i64::try_from(bucket_width_secs.max(1)).unwrap_or(i64::MAX);
        self.header.timestamp.div_euclid(width)
    }

    /// Attach the funding transaction id. Leaves the hash unchanged.
    pub fn with_funding(mut self, txid: Txid) -> Self {
        self.funding_txid = Some(txid);
        self
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// Builder for envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    recipient_tag: RecipientTag,
    ciphertext: Bytes,
    sender: Option<Address>,
    timestamp: i64,
    ttl_periods: u32,
    paid: bool,
}

impl EnvelopeBuilder {
    /// Start building an envelope for a recipient.
    pub fn new(recipient: &Address, ciphertext: impl Into<Bytes>) -> Self {
        Self {
            recipient_tag: recipient.recipient_tag(),
            ciphertext: ciphertext.into(),
            sender: None,
            timestamp: 0,
            ttl_periods: 1,
            paid: false,
        }
    }

    /// Reveal the sender address.
    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the timestamp (Unix seconds).
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the retention periods.
    pub fn ttl_periods(mut self, ttl_periods: u32) -> Self {
        self.ttl_periods = ttl_periods;
        self
    }

    /// Mark as paid.
    pub fn paid(mut self, paid: bool) -> Self {
        self.paid = paid;
        self
    }

    /// Build the envelope (no funding attached yet).
    pub fn build(self) -> Envelope {
        Envelope {
            header: EnvelopeHeader {
                version: ENVELOPE_VERSION,
                timestamp: self.timestamp,
                ttl_periods: self.ttl_periods,
                sender: self.sender,
                recipient_tag: self.recipient_tag,
                paid: self.paid,
            },
            ciphertext: self.ciphertext,
            funding_txid: None,
        }
    }
}
