//! Transport abstraction for message propagation.
//!
//! The transport layer handles serialization and delivery. Delivery is
//! at-least-once with unspecified latency; receivers deduplicate by message
//! hash.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{NetMessage, NodeId};

/// Transport trait for sending and receiving network messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &NodeId, message: &NetMessage) -> Result<()>;

    /// Broadcast a message to all connected peers.
    async fn broadcast(&self, message: &NetMessage) -> Result<()>;

    /// Receive the next message, waiting until one arrives.
    async fn recv(&self) -> Result<(NodeId, NetMessage)>;

    /// Receive with timeout. `None` if nothing arrived in time.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, NetMessage)>>;

    /// Receive a message only if one is already queued.
    async fn try_recv(&self) -> Result<Option<(NodeId, NetMessage)>>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;
}

/// An in-memory transport for testing.
///
/// Uses channels to simulate message passing between nodes. Messages travel
/// as encoded bytes and are decoded on receipt.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};
    use tracing::warn;

    use crate::error::NetError;

    const CHANNEL_CAPACITY: usize = 1000;

    #[derive(Debug)]
    struct Frame {
        from: NodeId,
        bytes: Vec<u8>,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<NodeId, mpsc::Sender<Frame>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Disconnect a node. Messages to it fail from now on.
        pub async fn disconnect(&self, node_id: &NodeId) {
            self.senders.write().await.remove(node_id);
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Frame>>,
    }

    fn decode(frame: Frame) -> Result<(NodeId, NetMessage)> {
        let message = NetMessage::from_bytes(&frame.bytes)?;
        Ok((frame.from, message))
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, message: &NetMessage) -> Result<()> {
            let bytes = message.to_bytes()?;
            let senders = self.network.senders.read().await;
            let sender = senders
                .get(peer)
                .ok_or_else(|| NetError::PeerNotConnected(format!("{:?}", peer)))?;

            sender
                .send(Frame {
                    from: self.node_id,
                    bytes,
                })
                .await
                .map_err(|_| NetError::TransportError("peer disconnected".into()))
        }

        async fn broadcast(&self, message: &NetMessage) -> Result<()> {
            let bytes = message.to_bytes()?;
            let senders = self.network.senders.read().await;

            for (peer_id, sender) in senders.iter() {
                if peer_id == &self.node_id {
                    continue;
                }
                let frame = Frame {
                    from: self.node_id,
                    bytes: bytes.clone(),
                };
                if sender.send(frame).await.is_err() {
                    warn!(peer = ?peer_id, "broadcast to disconnected peer dropped");
                }
            }
            Ok(())
        }

        async fn recv(&self) -> Result<(NodeId, NetMessage)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(frame) => decode(frame),
                None => Err(NetError::TransportError("channel closed".into())),
            }
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, NetMessage)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(frame)) => decode(frame).map(Some),
                Ok(None) => Err(NetError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        async fn try_recv(&self) -> Result<Option<(NodeId, NetMessage)>> {
            let mut rx = self.receiver.lock().await;
            match rx.try_recv() {
                Ok(frame) => decode(frame).map(Some),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    Err(NetError::TransportError("channel closed".into()))
                }
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            let senders = self.network.senders.read().await;
            Ok(senders
                .keys()
                .filter(|id| *id != &self.node_id)
                .copied()
                .collect())
        }
    }
}
