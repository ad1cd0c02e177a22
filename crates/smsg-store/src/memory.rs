//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite, no persistence. Used by tests and by nodes that
//! do not need to survive a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use smsg_core::{Address, Envelope, MessageHash, PublicKey};

use crate::error::{Result, StoreError};
use crate::traits::{
    EnvelopeMeta, InsertResult, LocalKeyRecord, OutboxEntry, OutboxState, QueryFilter, Store,
    StoredEnvelope,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Envelopes by arrival sequence.
    envelopes: BTreeMap<u64, StoredEnvelope>,

    /// Hash index: hash -> arrival sequence.
    by_hash: HashMap<MessageHash, u64>,

    /// Last assigned arrival sequence.
    last_seq: u64,

    local_keys: HashMap<Address, LocalKeyRecord>,

    /// Peer keys with insertion order.
    peer_keys: Vec<(Address, PublicKey)>,

    /// Outbox in insertion order.
    outbox: Vec<OutboxEntry>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn envelope_mut(&mut self, hash: &MessageHash) -> Option<&mut StoredEnvelope> {
        let seq = *self.by_hash.get(hash)?;
        self.envelopes.get_mut(&seq)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_envelope(
        &self,
        envelope: &Envelope,
        meta: EnvelopeMeta,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let hash = envelope.compute_hash();

        if inner.by_hash.contains_key(&hash) {
            return Ok(InsertResult::AlreadyExists);
        }

        inner.last_seq += 1;
        let seq = inner.last_seq;
        inner.envelopes.insert(
            seq,
            StoredEnvelope {
                hash,
                envelope: envelope.clone(),
                seq,
                paid: meta.paid,
                read: false,
                received_at: meta.received_at,
                expires_at: meta.expires_at,
                bucket: meta.bucket,
            },
        );
        inner.by_hash.insert(hash, seq);

        Ok(InsertResult::Inserted { seq })
    }

    async fn get_envelope(&self, hash: &MessageHash) -> Result<Option<StoredEnvelope>> {
        let inner = self.read()?;
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|seq| inner.envelopes.get(seq))
            .cloned())
    }

    async fn has_envelope(&self, hash: &MessageHash) -> Result<bool> {
        Ok(self.read()?.by_hash.contains_key(hash))
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredEnvelope>> {
        let inner = self.read()?;
        let start = filter.since.map_or(0, |s| s.saturating_add(1));

        Ok(inner
            .envelopes
            .range(start..)
            .map(|(_, stored)| stored)
            .filter(|stored| filter.matches(stored))
            .cloned()
            .collect())
    }

    async fn mark_read(&self, hash: &MessageHash) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(match inner.envelope_mut(hash) {
            Some(stored) => {
                stored.read = true;
                true
            }
            None => false,
        })
    }

    async fn set_paid(&self, hash: &MessageHash, paid: bool) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(match inner.envelope_mut(hash) {
            Some(stored) => {
                stored.paid = paid;
                true
            }
            None => false,
        })
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let mut inner = self.write()?;

        let expired: Vec<(u64, MessageHash)> = inner
            .envelopes
            .values()
            .filter(|stored| stored.expires_at <= now)
            .map(|stored| (stored.seq, stored.hash))
            .collect();

        for (seq, hash) in &expired {
            inner.envelopes.remove(seq);
            inner.by_hash.remove(hash);
        }

        Ok(expired.len())
    }

    async fn bucket_counts(&self) -> Result<Vec<(i64, usize)>> {
        let inner = self.read()?;

        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for stored in inner.envelopes.values() {
            *counts.entry(stored.bucket).or_default() += 1;
        }

        Ok(counts.into_iter().collect())
    }

    async fn upsert_local_key(&self, record: &LocalKeyRecord) -> Result<()> {
        let mut inner = self.write()?;

        let created_at = inner
            .local_keys
            .get(&record.address)
            .map_or(record.created_at, |existing| existing.created_at);
        let mut record = record.clone();
        record.created_at = created_at;
        inner.local_keys.insert(record.address, record);

        Ok(())
    }

    async fn get_local_key(&self, address: &Address) -> Result<Option<LocalKeyRecord>> {
        Ok(self.read()?.local_keys.get(address).cloned())
    }

    async fn list_local_keys(&self) -> Result<Vec<LocalKeyRecord>> {
        let inner = self.read()?;

        let mut keys: Vec<LocalKeyRecord> = inner.local_keys.values().cloned().collect();
        keys.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.address.encode().cmp(&b.address.encode()))
        });

        Ok(keys)
    }

    async fn remove_local_key(&self, address: &Address) -> Result<bool> {
        Ok(self.write()?.local_keys.remove(address).is_some())
    }

    async fn upsert_peer_key(&self, address: &Address, public_key: &PublicKey) -> Result<()> {
        let mut inner = self.write()?;

        match inner.peer_keys.iter().position(|(a, _)| a == address) {
            Some(pos) => inner.peer_keys[pos].1 = *public_key,
            None => inner.peer_keys.push((*address, *public_key)),
        }

        Ok(())
    }

    async fn get_peer_key(&self, address: &Address) -> Result<Option<PublicKey>> {
        Ok(self
            .read()?
            .peer_keys
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, key)| *key))
    }

    async fn list_peer_keys(&self) -> Result<Vec<(Address, PublicKey)>> {
        Ok(self.read()?.peer_keys.clone())
    }

    async fn upsert_outbox(&self, entry: &OutboxEntry) -> Result<()> {
        let mut inner = self.write()?;

        match inner.outbox.iter().position(|e| e.hash == entry.hash) {
            Some(pos) => {
                let created_at = inner.outbox[pos].created_at;
                inner.outbox[pos] = OutboxEntry {
                    created_at,
                    ..entry.clone()
                };
            }
            None => inner.outbox.push(entry.clone()),
        }

        Ok(())
    }

    async fn get_outbox(&self, hash: &MessageHash) -> Result<Option<OutboxEntry>> {
        Ok(self
            .read()?
            .outbox
            .iter()
            .find(|e| &e.hash == hash)
            .cloned())
    }

    async fn list_outbox(&self, state: Option<OutboxState>) -> Result<Vec<OutboxEntry>> {
        let inner = self.read()?;

        let mut entries: Vec<OutboxEntry> = inner
            .outbox
            .iter()
            .filter(|e| state.map_or(true, |s| e.state == s))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);

        Ok(entries)
    }

    async fn set_outbox_state(
        &self,
        hash: &MessageHash,
        state: OutboxState,
        now: i64,
    ) -> Result<bool> {
        let mut inner = self.write()?;

        Ok(match inner.outbox.iter_mut().find(|e| &e.hash == hash) {
            Some(entry) => {
                entry.state = state;
                entry.updated_at = now;
                true
            }
            None => false,
        })
    }
}
