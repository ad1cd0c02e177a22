//! # SMSG Net
//!
//! Propagation of envelopes and public key announcements between nodes.
//!
//! The engine only needs at-least-once delivery with unspecified latency.
//! [`Transport`] captures that contract; [`memory::MemoryNetwork`] wires any
//! number of in-process nodes together for tests.
//!
//! Every message crosses the transport in its CBOR wire form
//! ([`NetMessage::to_bytes`]), so the in-memory network exercises the same
//! decoding and limit checks a real link would.

pub mod error;
pub mod messages;
pub mod transport;

pub use error::{NetError, Result};
pub use messages::{NetMessage, NodeId, PROTOCOL_VERSION};
pub use transport::{memory, Transport};
