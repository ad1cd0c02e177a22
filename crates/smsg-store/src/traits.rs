//! Store trait: the abstract interface for messaging persistence.
//!
//! This trait allows the engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::fmt;

use async_trait::async_trait;
use smsg_core::{Address, Envelope, MessageHash, PublicKey, RecipientTag, Txid};

use crate::error::Result;

/// Result of inserting an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Envelope was inserted with the given arrival sequence number.
    Inserted {
        /// Arrival sequence number.
        seq: u64,
    },
    /// An envelope with the same hash already exists (not an error).
    AlreadyExists,
}

impl InsertResult {
    /// Whether the envelope was new.
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertResult::Inserted { .. })
    }
}

/// Local bookkeeping attached to an envelope on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeMeta {
    /// Whether funding was verified locally.
    pub paid: bool,
    /// Local arrival time (Unix seconds).
    pub received_at: i64,
    /// Time after which the envelope may be purged (Unix seconds).
    pub expires_at: i64,
    /// Retention bucket: `floor(timestamp / bucket_width)`.
    pub bucket: i64,
}

/// An envelope as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEnvelope {
    /// Content hash.
    pub hash: MessageHash,
    /// The envelope itself. Never mutated after insert.
    pub envelope: Envelope,
    /// Arrival sequence number, strictly increasing per store.
    pub seq: u64,
    /// Whether funding was verified locally.
    pub paid: bool,
    /// Whether the envelope has been read.
    pub read: bool,
    /// Local arrival time (Unix seconds).
    pub received_at: i64,
    /// Purge deadline (Unix seconds).
    pub expires_at: i64,
    /// Retention bucket.
    pub bucket: i64,
}

/// Envelope query filter.
///
/// The default filter matches everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Only envelopes for one of these recipients. Empty matches any.
    pub recipients: Vec<RecipientTag>,
    /// Only envelopes that arrived after this sequence number.
    pub since: Option<u64>,
    /// Only unread envelopes.
    pub unread_only: bool,
    /// Only envelopes not yet expired at this time (Unix seconds).
    pub live_at: Option<i64>,
    /// Only envelopes that claim payment and name a funding transaction, but
    /// are not yet verified as paid.
    pub pending_funding: bool,
}

impl QueryFilter {
    /// A filter matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to envelopes addressed to any of `recipients`.
    pub fn recipients(mut self, recipients: impl IntoIterator<Item = RecipientTag>) -> Self {
        self.recipients = recipients.into_iter().collect();
        self
    }

    /// Restrict to envelopes that arrived after `marker`.
    pub fn since(mut self, marker: u64) -> Self {
        self.since = Some(marker);
        self
    }

    /// Restrict to unread envelopes.
    pub fn unread(mut self) -> Self {
        self.unread_only = true;
        self
    }

    /// Restrict to envelopes still live at `now`.
    pub fn live_at(mut self, now: i64) -> Self {
        self.live_at = Some(now);
        self
    }

    /// Restrict to paid claims whose funding is not verified yet.
    pub fn pending_funding(mut self) -> Self {
        self.pending_funding = true;
        self
    }

    /// Whether a stored envelope passes this filter.
    pub fn matches(&self, stored: &StoredEnvelope) -> bool {
        if !self.recipients.is_empty()
            && !self.recipients.contains(stored.envelope.recipient_tag())
        {
            return false;
        }
        if let Some(since) = self.since {
            if stored.seq <= since {
                return false;
            }
        }
        if self.unread_only && stored.read {
            return false;
        }
        if let Some(now) = self.live_at {
            if stored.expires_at <= now {
                return false;
            }
        }
        if self.pending_funding
            && (stored.paid
                || !stored.envelope.claims_paid()
                || stored.envelope.funding_txid.is_none())
        {
            return false;
        }
        true
    }
}

/// The two kinds of local messaging keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Derived from the spending wallet. The secret stays in the wallet.
    WalletDerived,
    /// Imported independently of any wallet. The secret is held here.
    Standalone,
}

impl KeyKind {
    /// Convert to the stored integer form.
    pub fn to_u8(self) -> u8 {
        match self {
            KeyKind::WalletDerived => 0,
            KeyKind::Standalone => 1,
        }
    }

    /// Convert from the stored integer form.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(KeyKind::WalletDerived),
            1 => Some(KeyKind::Standalone),
            _ => None,
        }
    }
}

/// A locally managed messaging key.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalKeyRecord {
    pub address: Address,
    pub public_key: PublicKey,
    pub kind: KeyKind,
    pub receiving_enabled: bool,
    pub label: String,
    /// Secret bytes. Present only for standalone keys.
    pub secret: Option<[u8; 32]>,
    pub created_at: i64,
}

impl fmt::Debug for LocalKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeyRecord")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("receiving_enabled", &self.receiving_enabled)
            .field("label", &self.label)
            .field("secret", &self.secret.map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Lifecycle of a sent envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxState {
    /// Funding transaction broadcast, waiting for confirmation.
    Broadcast,
    /// Funding confirmed, not yet propagated.
    Confirmed,
    /// Propagated to the network.
    Sent,
    /// Funding transaction dropped by the ledger.
    Rejected,
}

impl OutboxState {
    /// Convert to the stored integer form.
    pub fn to_u8(self) -> u8 {
        match self {
            OutboxState::Broadcast => 0,
            OutboxState::Confirmed => 1,
            OutboxState::Sent => 2,
            OutboxState::Rejected => 3,
        }
    }

    /// Convert from the stored integer form.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(OutboxState::Broadcast),
            1 => Some(OutboxState::Confirmed),
            2 => Some(OutboxState::Sent),
            3 => Some(OutboxState::Rejected),
            _ => None,
        }
    }

    /// Whether no further transition is expected.
    pub fn is_final(self) -> bool {
        matches!(self, OutboxState::Sent | OutboxState::Rejected)
    }
}

/// A sent envelope with its funding state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub hash: MessageHash,
    pub envelope: Envelope,
    pub state: OutboxState,
    /// Fee paid, zero for free messages.
    pub fee: u64,
    pub txid: Option<Txid>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The Store trait: async interface for messaging persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime. Every method takes its own short-lived lock; callers never hold
/// store state across an await.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Envelope Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an envelope.
    ///
    /// Returns `AlreadyExists` if an envelope with the same hash is present;
    /// the stored copy and its bookkeeping are left untouched.
    async fn insert_envelope(&self, envelope: &Envelope, meta: EnvelopeMeta)
        -> Result<InsertResult>;

    /// Get an envelope by hash.
    async fn get_envelope(&self, hash: &MessageHash) -> Result<Option<StoredEnvelope>>;

    /// Check if an envelope exists.
    async fn has_envelope(&self, hash: &MessageHash) -> Result<bool>;

    /// Envelopes matching `filter`, ordered by arrival.
    async fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredEnvelope>>;

    /// Mark an envelope read. Returns false if unknown.
    async fn mark_read(&self, hash: &MessageHash) -> Result<bool>;

    /// Record the verified paid status. Returns false if unknown.
    async fn set_paid(&self, hash: &MessageHash, paid: bool) -> Result<bool>;

    /// Remove envelopes whose `expires_at <= now`. Returns the count removed.
    async fn purge_expired(&self, now: i64) -> Result<usize>;

    /// Number of envelopes held per bucket, ordered by bucket.
    async fn bucket_counts(&self) -> Result<Vec<(i64, usize)>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Local Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a local key.
    async fn upsert_local_key(&self, record: &LocalKeyRecord) -> Result<()>;

    /// Get a local key by address.
    async fn get_local_key(&self, address: &Address) -> Result<Option<LocalKeyRecord>>;

    /// All local keys, ordered by creation.
    async fn list_local_keys(&self) -> Result<Vec<LocalKeyRecord>>;

    /// Remove a local key. Returns false if unknown.
    async fn remove_local_key(&self, address: &Address) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Peer Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a peer's public key.
    async fn upsert_peer_key(&self, address: &Address, public_key: &PublicKey) -> Result<()>;

    /// Get a peer's public key.
    async fn get_peer_key(&self, address: &Address) -> Result<Option<PublicKey>>;

    /// All known peer keys.
    async fn list_peer_keys(&self) -> Result<Vec<(Address, PublicKey)>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Outbox Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace an outbox entry.
    async fn upsert_outbox(&self, entry: &OutboxEntry) -> Result<()>;

    /// Get an outbox entry by hash.
    async fn get_outbox(&self, hash: &MessageHash) -> Result<Option<OutboxEntry>>;

    /// Outbox entries, optionally in one state, ordered by creation.
    async fn list_outbox(&self, state: Option<OutboxState>) -> Result<Vec<OutboxEntry>>;

    /// Move an outbox entry to a new state. Returns false if unknown.
    async fn set_outbox_state(
        &self,
        hash: &MessageHash,
        state: OutboxState,
        now: i64,
    ) -> Result<bool>;
}
