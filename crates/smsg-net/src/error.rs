//! Error types for the network module.

use thiserror::Error;

/// Errors that can occur while propagating messages.
#[derive(Debug, Error)]
pub enum NetError {
    /// Message failed decoding or limit checks.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
