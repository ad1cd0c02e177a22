//! Sealing and opening message payloads.
//!
//! A sealed message is a CBOR record carrying the sender-side public key of
//! the key agreement, a nonce and the authenticated ciphertext of a
//! [`MessageBody`].

use serde::{Deserialize, Serialize};

use smsg_core::{Address, Envelope, PublicKey};

use crate::error::{CryptoError, Result};
use crate::keys::{EncryptionNonce, EphemeralKeyPair, SecretKey};

/// Format version of a sealed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SealFormat {
    /// X25519 + Blake3 derive-key + ChaCha20-Poly1305.
    V1,
}

/// The plaintext of a message before sealing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Sender address, `None` for anonymous messages.
    pub from: Option<Address>,

    /// Message text.
    pub text: String,
}

/// Key used on the sending side of the key agreement.
#[derive(Debug, Clone, Copy)]
pub enum SenderKey<'a> {
    /// The sender's own messaging key. Reveals the sender to the recipient.
    Static(&'a SecretKey),

    /// A fresh one-time key. The recipient learns nothing about the sender.
    Ephemeral,
}

/// Wire form of a sealed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    /// Format version.
    pub format: SealFormat,

    /// Public key of the sending side of the key agreement.
    pub sender_public: PublicKey,

    /// Nonce used for encryption.
    pub nonce: EncryptionNonce,

    /// Authenticated ciphertext of the CBOR-encoded body.
    pub ciphertext: Vec<u8>,
}

impl SealedMessage {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CryptoError::SerializationError(e.to_string()))
    }
}

/// A successfully opened message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// The decrypted body.
    pub body: MessageBody,

    /// Public key the sender used in the key agreement.
    pub sender_public: PublicKey,
}

/// Seal a message body for a recipient.
///
/// Only the recipient's public key is needed. Every call draws a fresh nonce
/// (and, for [`SenderKey::Ephemeral`], a fresh key pair), so sealing the same
/// body twice never yields the same bytes.
pub fn seal(sender: SenderKey<'_>, recipient: &PublicKey, body: &MessageBody) -> Result<Vec<u8>> {
    let (sender_public, shared) = match sender {
        SenderKey::Static(secret) => (secret.public_key(), secret.diffie_hellman(recipient)),
        SenderKey::Ephemeral => {
            let ephemeral = EphemeralKeyPair::generate();
            let public = ephemeral.public_key();
            (public, ephemeral.diffie_hellman(recipient))
        }
    };
    let key = shared.derive_message_key(&sender_public, recipient);

    let mut plaintext = Vec::new();
    ciborium::into_writer(body, &mut plaintext)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;

    let nonce = EncryptionNonce::generate();
    let ciphertext = key.encrypt(&plaintext, &nonce)?;

    SealedMessage {
        format: SealFormat::V1,
        sender_public,
        nonce,
        ciphertext,
    }
    .to_bytes()
}

/// Open a sealed message with the recipient's private key.
///
/// `None` means the key is unavailable (for example a locked wallet) and
/// yields `MissingKey`. A wrong key, a corrupted record or a tampered
/// ciphertext all yield `AuthenticationFailed`.
pub fn open(recipient: Option<&SecretKey>, sealed: &[u8]) -> Result<Opened> {
    let recipient = recipient.ok_or(CryptoError::MissingKey)?;
    let sealed = SealedMessage::from_bytes(sealed).map_err(|_| CryptoError::AuthenticationFailed)?;

    let shared = recipient.diffie_hellman(&sealed.sender_public);
    let key = shared.derive_message_key(&sealed.sender_public, &recipient.public_key());
    let plaintext = key.decrypt(&sealed.ciphertext, &sealed.nonce)?;

    let body: MessageBody =
        ciborium::from_reader(plaintext.as_slice()).map_err(|_| CryptoError::AuthenticationFailed)?;

    Ok(Opened {
        body,
        sender_public: sealed.sender_public,
    })
}

/// Open the payload of an envelope.
///
/// Besides decrypting, checks that a sender named in the envelope header is
/// the key that took part in the key agreement and matches the sender inside
/// the body.
pub fn open_envelope(recipient: Option<&SecretKey>, envelope: &Envelope) -> Result<Opened> {
    let opened = open(recipient, &envelope.ciphertext)?;

    if opened.body.from.as_ref() != envelope.sender() {
        return Err(CryptoError::AuthenticationFailed);
    }
    if let Some(sender) = envelope.sender() {
        if !sender.matches(&opened.sender_public) {
            return Err(CryptoError::AuthenticationFailed);
        }
    }

    Ok(opened)
}
