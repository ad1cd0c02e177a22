//! Messaging addresses.
//!
//! An address is `base58check(ADDRESS_VERSION || key_id)` where the key id is
//! the first 20 bytes of a domain-separated Blake3 hash of the X25519 public
//! key. Addresses are how keys are named externally; the public key itself is
//! learned separately and checked against the address before use.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{Blake3Hash, PublicKey};
use crate::error::CoreError;

/// Version byte prefixed to every encoded address.
pub const ADDRESS_VERSION: u8 = 0x38;

/// Domain for recipient tags carried in envelope headers.
const RECIPIENT_TAG_CONTEXT: &str = "smsg recipient tag v1";

/// The 20-byte hash of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub [u8; 20]);

impl KeyId {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", hex::encode(&self.0[..8]))
    }
}

/// A human-readable messaging address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(KeyId);

impl Address {
    /// Address for a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(public_key.key_id())
    }

    /// Address for a raw key id.
    pub const fn from_key_id(key_id: KeyId) -> Self {
        Self(key_id)
    }

    /// Parse and checksum-verify an encoded address.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let data = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| CoreError::InvalidAddress(format!("{}: {}", s, e)))?;

        if data.len() != 21 {
            return Err(CoreError::InvalidAddress(format!(
                "{}: expected 21 bytes, got {}",
                s,
                data.len()
            )));
        }
        if data[0] != ADDRESS_VERSION {
            return Err(CoreError::InvalidAddress(format!(
                "{}: unexpected version byte 0x{:02x}",
                s, data[0]
            )));
        }

        let mut id = [0u8; 20];
        id.copy_from_slice(&data[1..]);
        Ok(Self(KeyId(id)))
    }

    /// The key id this address encodes.
    pub const fn key_id(&self) -> &KeyId {
        &self.0
    }

    /// Whether a public key hashes to this address.
    pub fn matches(&self, public_key: &PublicKey) -> bool {
        public_key.key_id() == self.0
    }

    /// The tag placed in envelope headers for messages to this address.
    pub fn recipient_tag(&self) -> RecipientTag {
        RecipientTag(Blake3Hash::derive(RECIPIENT_TAG_CONTEXT, &self.0 .0).0)
    }

    /// Encode as base58check.
    pub fn encode(&self) -> String {
        let mut data = Vec::with_capacity(21);
        data.push(ADDRESS_VERSION);
        data.extend_from_slice(&self.0 .0);
        bs58::encode(data).with_check().into_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encode())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hash of a recipient address as carried in an envelope header.
///
/// Receivers match envelopes against their local keys by tag without the
/// address itself travelling in the clear.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientTag(pub [u8; 32]);

impl RecipientTag {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for RecipientTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientTag({})", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip() {
        let address = Address::from_public_key(&PublicKey::from_bytes([9u8; 32]));
        let encoded = address.to_string();
        assert_eq!(Address::parse(&encoded).unwrap(), address);
    }

    #[test]
    fn test_address_rejects_bad_checksum() {
        let address = Address::from_public_key(&PublicKey::from_bytes([9u8; 32]));
        let mut encoded = address.to_string();
        let last = encoded.pop().unwrap();
        encoded.push(if last == '1' { '2' } else { '1' });
        assert!(Address::parse(&encoded).is_err());
    }

    #[test]
    fn test_address_rejects_wrong_version() {
        let mut data = vec![0x00];
        data.extend_from_slice(&[5u8; 20]);
        let encoded = bs58::encode(data).with_check().into_string();
        assert!(matches!(
            Address::parse(&encoded),
            Err(CoreError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_address_matches_its_key_only() {
        let pk = PublicKey::from_bytes([3u8; 32]);
        let other = PublicKey::from_bytes([4u8; 32]);
        let address = Address::from_public_key(&pk);
        assert!(address.matches(&pk));
        assert!(!address.matches(&other));
    }

    #[test]
    fn test_recipient_tag_is_stable_and_distinct() {
        let a = Address::from_public_key(&PublicKey::from_bytes([1u8; 32]));
        let b = Address::from_public_key(&PublicKey::from_bytes([2u8; 32]));
        assert_eq!(a.recipient_tag(), a.recipient_tag());
        assert_ne!(a.recipient_tag(), b.recipient_tag());
    }
}
