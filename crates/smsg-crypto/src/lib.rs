//! # SMSG Crypto
//!
//! Message sealing and private key protection.
//!
//! ## Sealing Model
//!
//! A message is sealed for one recipient:
//!
//! 1. **Key agreement**: X25519 between the sender key (the sender's static
//!    messaging key, or a fresh ephemeral key for anonymous sends) and the
//!    recipient's public key
//! 2. **Key derivation**: Blake3 in derive-key mode over the shared secret
//!    and both public keys
//! 3. **Encryption**: ChaCha20-Poly1305 with a random nonce; the tag
//!    authenticates the ciphertext
//!
//! Encryption only needs the recipient's public key. Decryption needs the
//! recipient's private key and fails with
//! [`CryptoError::AuthenticationFailed`] on a wrong key or corrupted data,
//! without ever exposing partial plaintext.
//!
//! ## Key Protection
//!
//! Private keys held by a wallet can be sealed at rest under a
//! [`MasterKey`] derived from a passphrase with Argon2id. See [`passphrase`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smsg_crypto::{open, seal, MessageBody, SecretKey, SenderKey};
//!
//! let recipient = SecretKey::generate();
//! let body = MessageBody { from: None, text: "hello".into() };
//! let sealed = seal(SenderKey::Ephemeral, &recipient.public_key(), &body).unwrap();
//! let opened = open(Some(&recipient), &sealed).unwrap();
//! assert_eq!(opened.body.text, "hello");
//! ```

pub mod codec;
pub mod error;
pub mod keys;
pub mod passphrase;

pub use codec::{open, open_envelope, seal, MessageBody, Opened, SealFormat, SealedMessage, SenderKey};
pub use error::{CryptoError, Result};
pub use keys::{EncryptionKey, EncryptionNonce, EphemeralKeyPair, SecretKey, SharedKey};
pub use passphrase::{KdfParams, MasterKey, SealedSecret};
