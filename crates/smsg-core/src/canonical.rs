//! Canonical CBOR encoding for deterministic hashing.
//!
//! This module implements RFC 8949 Core Deterministic Encoding for the two
//! structures whose bytes are hashed:
//! - Envelope headers (the message hash covers them)
//! - Funding transactions (the txid covers them)
//!
//! Rules:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! Sender and receiver must produce identical bytes: the receiver recomputes
//! the hash and the payload size used for fee verification from them.

use ciborium::value::Value;

use crate::envelope::EnvelopeHeader;
use crate::funding::FundingTx;

/// Header field keys (integer keys for compact encoding).
mod header_keys {
    pub const VERSION: u64 = 0;
    pub const TIMESTAMP: u64 = 1;
    pub const TTL_PERIODS: u64 = 2;
    pub const SENDER: u64 = 3;
    pub const RECIPIENT_TAG: u64 = 4;
    pub const PAID: u64 = 5;
}

/// Transaction field keys.
mod tx_keys {
    pub const VERSION: u64 = 0;
    pub const INPUTS: u64 = 1;
    pub const OUTPUTS: u64 = 2;
}

/// Encode an envelope header to canonical CBOR bytes.
pub fn canonical_header_bytes(header: &EnvelopeHeader) -> Vec<u8> {
    let value = header_to_cbor_value(header);
    encode_cbor_value_canonical(&value)
}

/// Encode a funding transaction to canonical CBOR bytes.
pub fn canonical_tx_bytes(tx: &FundingTx) -> Vec<u8> {
    let value = tx_to_cbor_value(tx);
    encode_cbor_value_canonical(&value)
}

fn int(n: u64) -> Value {
    Value::Integer(n.into())
}

/// Convert a header to a CBOR Value (map with integer keys).
fn header_to_cbor_value(header: &EnvelopeHeader) -> Value {
    let sender = match &header.sender {
        Some(address) => Value::Bytes(address.key_id().0.to_vec()),
        None => Value::Null,
    };

    Value::Map(vec![
        (int(header_keys::VERSION), int(header.version.into())),
        (int(header_keys::TIMESTAMP), Value::Integer(header.timestamp.into())),
        (int(header_keys::TTL_PERIODS), int(header.ttl_periods.into())),
        (int(header_keys::SENDER), sender),
        (
            int(header_keys::RECIPIENT_TAG),
            Value::Bytes(header.recipient_tag.0.to_vec()),
        ),
        (int(header_keys::PAID), Value::Bool(header.paid)),
    ])
}

fn tx_to_cbor_value(tx: &FundingTx) -> Value {
    let inputs = tx
        .inputs
        .iter()
        .map(|input| {
            Value::Array(vec![
                Value::Bytes(input.txid.0.to_vec()),
                int(input.index.into()),
            ])
        })
        .collect();

    let outputs = tx
        .outputs
        .iter()
        .map(|output| Value::Array(vec![int(output.amount), Value::Bytes(output.script.to_vec())]))
        .collect();

    Value::Map(vec![
        (int(tx_keys::VERSION), int(tx.version.into())),
        (int(tx_keys::INPUTS), Value::Array(inputs)),
        (int(tx_keys::OUTPUTS), Value::Array(outputs)),
    ])
}

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
///
/// Only the value shapes produced above are reachable.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        _ => buf.push(0xf7),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4).
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, RecipientTag};
    use crate::crypto::PublicKey;

    fn header(paid: bool) -> EnvelopeHeader {
        EnvelopeHeader {
            version: 1,
            timestamp: 1_700_000_000,
            ttl_periods: 4,
            sender: Some(Address::from_public_key(&PublicKey::from_bytes([1; 32]))),
            recipient_tag: RecipientTag([2; 32]),
            paid,
        }
    }

    #[test]
    fn test_uint_encoding_is_minimal() {
        let mut buf = Vec::new();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 0x1_0000);
        assert_eq!(buf, vec![0x1a, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_map_keys_sorted() {
        let value = Value::Map(vec![(int(5), int(1)), (int(0), int(2))]);
        let bytes = encode_cbor_value_canonical(&value);
        assert_eq!(bytes, vec![0xa2, 0x00, 0x02, 0x05, 0x01]);
    }

    #[test]
    fn test_header_bytes_deterministic() {
        assert_eq!(
            canonical_header_bytes(&header(true)),
            canonical_header_bytes(&header(true))
        );
    }

    #[test]
    fn test_header_bytes_cover_paid_flag() {
        assert_ne!(
            canonical_header_bytes(&header(true)),
            canonical_header_bytes(&header(false))
        );
    }

    #[test]
    fn test_header_decodes_as_cbor_map() {
        let bytes = canonical_header_bytes(&header(false));
        let value: Value = ciborium::from_reader(&bytes[..]).unwrap();
        match value {
            Value::Map(entries) => assert_eq!(entries.len(), 6),
            other => panic!("expected map, got {:?}", other),
        }
    }
}
