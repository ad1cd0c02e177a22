//! # SMSG Store
//!
//! Persistence for the messaging engine: received and sent envelopes, local
//! messaging keys, learned peer keys and the outbox of paid sends.
//!
//! ## Overview
//!
//! Everything sits behind the async [`Store`] trait so the engine is
//! storage-agnostic. [`SqliteStore`] is the durable backend; [`MemoryStore`]
//! has the same semantics without persistence and is used in tests.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoredEnvelope`] - An envelope plus its local bookkeeping
//! - [`QueryFilter`] - Recipient, arrival-marker and read-state filter
//! - [`LocalKeyRecord`] - A wallet-derived or standalone messaging key
//! - [`OutboxEntry`] - A sent envelope and its funding state
//!
//! ## Usage
//!
//! ```rust,no_run
//! use smsg_store::{QueryFilter, SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("smsg.db").unwrap();
//!
//!     // Everything that arrived after marker 10 and is still unread
//!     let filter = QueryFilter::all().since(10).unread();
//!     let envelopes = store.query(&filter).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Content addressing**: envelopes are keyed by message hash; inserting
//!   the same envelope twice returns `AlreadyExists`
//! - **Arrival order**: every insert gets the next arrival sequence number,
//!   which doubles as the `since` marker of inbox queries
//! - **No inline eviction**: expired envelopes are only removed by an explicit
//!   [`Store::purge_expired`] call

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    EnvelopeMeta, InsertResult, KeyKind, LocalKeyRecord, OutboxEntry, OutboxState, QueryFilter,
    Store, StoredEnvelope,
};
