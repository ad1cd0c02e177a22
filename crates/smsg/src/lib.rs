//! # SMSG
//!
//! Paid secure messaging between ledger addresses: end-to-end encrypted
//! messages whose retention on the network is paid for with an on-ledger
//! funding commitment.
//!
//! ## Overview
//!
//! - **KeyStore**: wallet-derived keys enabled for receiving, standalone
//!   imported keys, and public keys learned from peers
//! - **SendPipeline**: seal, compute the fee, fund and propagate
//! - **InboxReader**: decrypt what arrived, with placeholders for messages
//!   whose key is locked in the wallet
//! - **Engine**: one node's facade over all of the above, plus ingest of
//!   envelopes and key announcements from the network
//!
//! The wallet, the ledger and the network are collaborators behind the
//! [`Wallet`], [`Ledger`] and [`Transport`](smsg_net::Transport) traits.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use smsg::ledger::memory::MemoryLedger;
//! use smsg::net::{memory::MemoryNetwork, NodeId};
//! use smsg::store::SqliteStore;
//! use smsg::{Engine, EngineConfig, LocalWallet, Scope, SendRequest};
//!
//! async fn example() {
//!     let wallet = Arc::new(LocalWallet::generate("default"));
//!     let ledger = Arc::new(MemoryLedger::new());
//!     let network = MemoryNetwork::new();
//!     let transport = Arc::new(network.create_transport(NodeId::random()).await);
//!
//!     let store = SqliteStore::open("smsg.db").unwrap();
//!     let engine = Engine::new(store, wallet.clone(), ledger, transport, EngineConfig::default());
//!
//!     let me = wallet.new_address().unwrap();
//!     engine.enable_receiving(&me).await.unwrap();
//!
//!     // Preview the fee of a message kept for 4 periods
//!     let request = SendRequest::new(me, me, "hello").paid(4).dry_run();
//!     let outcome = engine.send(request).await.unwrap();
//!     println!("{} fee {}", outcome.result, outcome.fee);
//!
//!     let inbox = engine.inbox(Scope::New, None).await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `smsg::core` - Envelopes, addresses, fees and funding commitments
//! - `smsg::crypto` - Key agreement, sealing and passphrase protection
//! - `smsg::store` - Storage abstraction and SQLite
//! - `smsg::net` - Wire messages and transports

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod inbox;
pub mod keystore;
pub mod ledger;
pub mod send;
pub mod wallet;

// Re-export component crates
pub use smsg_core as core;
pub use smsg_crypto as crypto;
pub use smsg_net as net;
pub use smsg_store as store;

// Re-export main types for convenience
pub use command::{Command, CommandResult};
pub use config::EngineConfig;
pub use engine::{Engine, IngestResult};
pub use error::{Result, SmsgError};
pub use inbox::{DecryptedMessage, InboxItem, InboxReader, LockedPlaceholder, Scope};
pub use keystore::{KeyAnnouncement, KeyListing, KeyStore, LocalKey};
pub use ledger::Ledger;
pub use send::{Composed, OutboxReport, SendOutcome, SendPipeline, SendRequest, SendResult};
pub use wallet::{LocalWallet, LockStatus, Wallet};

// Re-export commonly used core types
pub use smsg_core::{Address, Envelope, FeeSchedule, MessageHash, PublicKey, Txid};

/// Current Unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
