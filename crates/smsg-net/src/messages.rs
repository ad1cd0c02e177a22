//! Wire messages exchanged between nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

use smsg_core::limits::MAX_PAID_ENVELOPE_BYTES;
use smsg_core::{Address, Envelope, PublicKey};

use crate::error::{NetError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Unique identifier for a node in the network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(")?;
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Messages propagated between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetMessage {
    /// An envelope to store and relay.
    Envelope(Envelope),

    /// A public key published for discovery by its owner.
    KeyAnnouncement {
        address: Address,
        public_key: PublicKey,
    },
}

#[derive(Serialize, Deserialize)]
struct Frame {
    version: u8,
    message: NetMessage,
}

impl NetMessage {
    /// Check size limits and internal consistency.
    pub fn validate(&self) -> Result<()> {
        match self {
            NetMessage::Envelope(envelope) => {
                let size = envelope.payload_size();
                if size > MAX_PAID_ENVELOPE_BYTES {
                    return Err(NetError::InvalidMessage(format!(
                        "envelope of {} bytes exceeds {}",
                        size, MAX_PAID_ENVELOPE_BYTES
                    )));
                }
            }
            NetMessage::KeyAnnouncement {
                address,
                public_key,
            } => {
                if !address.matches(public_key) {
                    return Err(NetError::InvalidMessage(format!(
                        "announced key does not belong to {}",
                        address
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to the CBOR wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let frame = Frame {
            version: PROTOCOL_VERSION,
            message: self.clone(),
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&frame, &mut buf)
            .map_err(|e| NetError::InvalidMessage(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from the wire form and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: Frame =
            ciborium::from_reader(bytes).map_err(|e| NetError::InvalidMessage(e.to_string()))?;
        if frame.version != PROTOCOL_VERSION {
            return Err(NetError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: frame.version,
            });
        }
        frame.message.validate()?;
        Ok(frame.message)
    }
}
