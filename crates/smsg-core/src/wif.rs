//! Private key import/export encoding.
//!
//! `base58check(SECRET_VERSION || secret(32) || 0x01)`.

use zeroize::Zeroizing;

use crate::error::CoreError;

/// Version byte prefixed to encoded private keys.
pub const SECRET_VERSION: u8 = 0x6c;

/// Trailing marker byte after the secret.
const SECRET_SUFFIX: u8 = 0x01;

/// Encode a 32-byte secret for export.
pub fn encode_wif(secret: &[u8; 32]) -> String {
    let mut data = Zeroizing::new(Vec::with_capacity(34));
    data.push(SECRET_VERSION);
    data.extend_from_slice(secret);
    data.push(SECRET_SUFFIX);
    bs58::encode(data.as_slice()).with_check().into_string()
}

/// Decode an exported secret.
///
/// Any checksum, version, length or suffix mismatch is `InvalidKey`.
/// Every buffer holding key bytes is wiped on drop.
pub fn decode_wif(s: &str) -> Result<Zeroizing<[u8; 32]>, CoreError> {
    let data = Zeroizing::new(
        bs58::decode(s.trim())
            .with_check(None)
            .into_vec()
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?,
    );

    if data.len() != 34 {
        return Err(CoreError::InvalidKey(format!(
            "expected 34 bytes, got {}",
            data.len()
        )));
    }
    if data[0] != SECRET_VERSION {
        return Err(CoreError::InvalidKey(format!(
            "unexpected version byte 0x{:02x}",
            data[0]
        )));
    }
    if data[33] != SECRET_SUFFIX {
        return Err(CoreError::InvalidKey("missing key suffix".into()));
    }

    let mut secret = Zeroizing::new([0u8; 32]);
    secret.copy_from_slice(&data[1..33]);
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wif_roundtrip() {
        let secret = [0x5au8; 32];
        let encoded = encode_wif(&secret);
        let decoded: Zeroizing<[u8; 32]> = decode_wif(&encoded).unwrap();
        assert_eq!(*decoded, secret);
    }

    #[test]
    fn test_wif_rejects_garbage() {
        assert!(matches!(decode_wif("not a key"), Err(CoreError::InvalidKey(_))));
        assert!(matches!(decode_wif(""), Err(CoreError::InvalidKey(_))));
    }

    #[test]
    fn test_wif_rejects_address_encoding() {
        let mut data = vec![crate::ADDRESS_VERSION];
        data.extend_from_slice(&[1u8; 20]);
        let encoded = bs58::encode(data).with_check().into_string();
        assert!(decode_wif(&encoded).is_err());
    }

    #[test]
    fn test_wif_rejects_tampered_checksum() {
        let mut encoded = encode_wif(&[1u8; 32]);
        let last = encoded.pop().unwrap();
        encoded.push(if last == 'a' { 'b' } else { 'a' });
        assert!(decode_wif(&encoded).is_err());
    }
}
