//! Passphrase-derived protection for private keys at rest.
//!
//! A [`MasterKey`] is derived from the wallet passphrase with Argon2id and
//! never stored. Each protected secret is a [`SealedSecret`]: the 32 secret
//! bytes encrypted under the master key with ChaCha20-Poly1305.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, Result};
use crate::keys::{EncryptionKey, EncryptionNonce};

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

const MASTER_KEY_LEN: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Parallel lanes.
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 4 lanes.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests only.
    pub fn fast() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// A key derived from a passphrase. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: EncryptionKey,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

impl MasterKey {
    /// Generate a random salt.
    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    /// Derive a master key from a passphrase.
    pub fn derive(passphrase: &[u8], salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<Self> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(MASTER_KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 params: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key_bytes = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        argon2
            .hash_password_into(passphrase, salt, &mut key_bytes[..])
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            key: EncryptionKey::from_bytes(*key_bytes),
        })
    }
}

/// A 32-byte secret encrypted under a [`MasterKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    nonce: EncryptionNonce,
    ciphertext: Vec<u8>,
}

impl SealedSecret {
    /// Encrypt a secret.
    pub fn seal(master: &MasterKey, secret: &[u8; 32]) -> Result<Self> {
        let nonce = EncryptionNonce::generate();
        let ciphertext = master.key.encrypt(secret, &nonce)?;
        Ok(Self { nonce, ciphertext })
    }

    /// Decrypt a secret. A wrong master key fails with `AuthenticationFailed`.
    pub fn open(&self, master: &MasterKey) -> Result<Zeroizing<[u8; 32]>> {
        let plaintext = Zeroizing::new(master.key.decrypt(&self.ciphertext, &self.nonce)?);
        if plaintext.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "sealed secret is {} bytes",
                plaintext.len()
            )));
        }

        let mut secret = Zeroizing::new([0u8; 32]);
        secret.copy_from_slice(&plaintext);
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_with_same_passphrase() {
        let salt = MasterKey::generate_salt();
        let master = MasterKey::derive(b"correct horse", &salt, &KdfParams::fast()).unwrap();

        let sealed = SealedSecret::seal(&master, &[7u8; 32]).unwrap();

        let again = MasterKey::derive(b"correct horse", &salt, &KdfParams::fast()).unwrap();
        assert_eq!(*sealed.open(&again).unwrap(), [7u8; 32]);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let salt = MasterKey::generate_salt();
        let master = MasterKey::derive(b"correct horse", &salt, &KdfParams::fast()).unwrap();
        let sealed = SealedSecret::seal(&master, &[7u8; 32]).unwrap();

        let wrong = MasterKey::derive(b"battery staple", &salt, &KdfParams::fast()).unwrap();
        assert!(matches!(
            sealed.open(&wrong),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_salt_changes_key() {
        let a = MasterKey::derive(b"pw", &[1u8; SALT_LEN], &KdfParams::fast()).unwrap();
        let b = MasterKey::derive(b"pw", &[2u8; SALT_LEN], &KdfParams::fast()).unwrap();

        let sealed = SealedSecret::seal(&a, &[9u8; 32]).unwrap();
        assert!(sealed.open(&b).is_err());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        };
        assert!(matches!(
            MasterKey::derive(b"pw", &[0u8; SALT_LEN], &params),
            Err(CryptoError::KeyDerivation(_))
        ));
    }
}
