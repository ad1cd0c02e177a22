//! InboxReader: decrypt stored envelopes addressed to local keys.
//!
//! Private keys are looked up per envelope, so a wallet locked halfway
//! through a read only affects the envelopes that follow. Envelopes whose key
//! is locked come back as [`LockedPlaceholder`]s. Envelopes that fail to
//! authenticate are logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use smsg_core::{Address, MessageHash, RecipientTag};
use smsg_crypto::open_envelope;
use smsg_store::{LocalKeyRecord, QueryFilter, Store, StoredEnvelope};

use crate::error::{Result, SmsgError};
use crate::keystore::KeyStore;
use crate::now_secs;

/// Which envelopes an inbox read covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Unread envelopes for keys enabled for receiving.
    New,
    /// Every retained envelope for any local key.
    All,
    /// Envelopes that arrived after the given arrival marker.
    Since(u64),
}

/// A successfully decrypted message. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub envelope_hash: MessageHash,
    /// Sender address, `None` for anonymous messages.
    pub from: Option<Address>,
    pub to: Address,
    pub text: String,
    /// Sender-claimed timestamp.
    pub timestamp: i64,
    /// Whether funding was verified locally.
    pub paid: bool,
    /// Arrival marker, usable with [`Scope::Since`].
    pub arrival: u64,
}

/// Stand-in for a message whose key is currently locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedPlaceholder {
    pub envelope_hash: MessageHash,
    pub to: Address,
    pub reason: &'static str,
    pub arrival: u64,
}

/// One inbox entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxItem {
    Message(DecryptedMessage),
    Locked(LockedPlaceholder),
}

impl InboxItem {
    pub fn envelope_hash(&self) -> &MessageHash {
        match self {
            InboxItem::Message(message) => &message.envelope_hash,
            InboxItem::Locked(placeholder) => &placeholder.envelope_hash,
        }
    }

    pub fn arrival(&self) -> u64 {
        match self {
            InboxItem::Message(message) => message.arrival,
            InboxItem::Locked(placeholder) => placeholder.arrival,
        }
    }

    pub fn as_message(&self) -> Option<&DecryptedMessage> {
        match self {
            InboxItem::Message(message) => Some(message),
            InboxItem::Locked(_) => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, InboxItem::Locked(_))
    }
}

pub struct InboxReader<S: Store> {
    keystore: Arc<KeyStore<S>>,
    store: Arc<S>,
}

impl<S: Store> InboxReader<S> {
    pub fn new(keystore: Arc<KeyStore<S>>, store: Arc<S>) -> Self {
        Self { keystore, store }
    }

    /// Read the inbox, optionally for one local address.
    ///
    /// Results are in arrival order. A `New` read marks the messages it
    /// decrypted as read.
    pub async fn read(&self, scope: Scope, address: Option<&Address>) -> Result<Vec<InboxItem>> {
        let keys: HashMap<RecipientTag, LocalKeyRecord> = self
            .keystore
            .records()
            .await?
            .into_iter()
            .filter(|record| address.map_or(true, |a| &record.address == a))
            .filter(|record| scope != Scope::New || record.receiving_enabled)
            .map(|record| (record.address.recipient_tag(), record))
            .collect();

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut filter = QueryFilter::all()
            .recipients(keys.keys().copied())
            .live_at(now_secs());
        match scope {
            Scope::New => filter = filter.unread(),
            Scope::All => {}
            Scope::Since(marker) => filter = filter.since(marker),
        }

        let mut items = Vec::new();
        for stored in self.store.query(&filter).await? {
            let Some(record) = keys.get(stored.envelope.recipient_tag()) else {
                continue;
            };
            let Some(item) = self.decrypt(record, &stored) else {
                continue;
            };

            if scope == Scope::New && !item.is_locked() {
                self.store.mark_read(&stored.hash).await?;
            }
            items.push(item);
        }

        debug!(count = items.len(), ?scope, "inbox read");
        Ok(items)
    }

    fn decrypt(&self, record: &LocalKeyRecord, stored: &StoredEnvelope) -> Option<InboxItem> {
        let placeholder = || {
            InboxItem::Locked(LockedPlaceholder {
                envelope_hash: stored.hash,
                to: record.address,
                reason: "locked",
                arrival: stored.seq,
            })
        };

        let secret = match self.keystore.secret_for(record) {
            Ok(secret) => secret,
            Err(SmsgError::WalletLocked) | Err(SmsgError::MissingKey) => return Some(placeholder()),
            Err(e) => {
                warn!(hash = %stored.hash, error = %e, "key lookup failed, skipping");
                return None;
            }
        };

        match open_envelope(Some(&secret), &stored.envelope) {
            Ok(opened) => Some(InboxItem::Message(DecryptedMessage {
                envelope_hash: stored.hash,
                from: opened.body.from,
                to: record.address,
                text: opened.body.text,
                timestamp: stored.envelope.timestamp(),
                paid: stored.paid,
                arrival: stored.seq,
            })),
            Err(e) => {
                warn!(hash = %stored.hash, error = %e, "could not decrypt envelope, skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::wallet::{LocalWallet, Wallet};
    use bytes::Bytes;
    use smsg_core::{Envelope, EnvelopeBuilder, PublicKey};
    use smsg_crypto::{seal, KdfParams, MessageBody, SecretKey, SenderKey};
    use smsg_store::MemoryStore;

    struct Fixture {
        reader: InboxReader<MemoryStore>,
        keystore: Arc<KeyStore<MemoryStore>>,
        store: Arc<MemoryStore>,
        wallet: Arc<LocalWallet>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let wallet =
            Arc::new(LocalWallet::new("alice", [4u8; 32]).with_kdf_params(KdfParams::fast()));
        let keystore = Arc::new(KeyStore::new(store.clone(), wallet.clone()));
        let reader = InboxReader::new(keystore.clone(), store.clone());
        Fixture {
            reader,
            keystore,
            store,
            wallet,
        }
    }

    fn envelope_to(to: &Address, public_key: &PublicKey, text: &str) -> Envelope {
        let body = MessageBody {
            from: None,
            text: text.to_string(),
        };
        let sealed = seal(SenderKey::Ephemeral, public_key, &body).unwrap();
        EnvelopeBuilder::new(to, sealed)
            .timestamp(now_secs())
            .ttl_periods(2)
            .build()
    }

    async fn deliver(store: &MemoryStore, envelope: &Envelope) {
        let meta = EngineConfig::default().envelope_meta(envelope, false, now_secs());
        store.insert_envelope(envelope, meta).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_new_marks_read() {
        let f = fixture();
        let secret = SecretKey::generate();
        let key = f
            .keystore
            .import_private_key(&secret.to_wif(), "")
            .await
            .unwrap();

        deliver(&f.store, &envelope_to(&key.address, &key.public_key, "one")).await;
        deliver(&f.store, &envelope_to(&key.address, &key.public_key, "two")).await;

        let items = f.reader.read(Scope::New, None).await.unwrap();
        let texts: Vec<_> = items
            .iter()
            .filter_map(|item| item.as_message())
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(items[0].as_message().unwrap().from, None);

        assert!(f.reader.read(Scope::New, None).await.unwrap().is_empty());
        assert_eq!(f.reader.read(Scope::All, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_since_marker() {
        let f = fixture();
        let secret = SecretKey::generate();
        let key = f
            .keystore
            .import_private_key(&secret.to_wif(), "")
            .await
            .unwrap();

        deliver(&f.store, &envelope_to(&key.address, &key.public_key, "a")).await;
        let first = f.reader.read(Scope::All, None).await.unwrap();
        let marker = first[0].arrival();

        deliver(&f.store, &envelope_to(&key.address, &key.public_key, "b")).await;
        let items = f.reader.read(Scope::Since(marker), None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_message().unwrap().text, "b");
    }

    #[tokio::test]
    async fn test_address_filter_and_foreign_envelopes() {
        let f = fixture();
        let a = f
            .keystore
            .import_private_key(&SecretKey::generate().to_wif(), "a")
            .await
            .unwrap();
        let b = f
            .keystore
            .import_private_key(&SecretKey::generate().to_wif(), "b")
            .await
            .unwrap();
        let stranger = SecretKey::generate();

        deliver(&f.store, &envelope_to(&a.address, &a.public_key, "for a")).await;
        deliver(&f.store, &envelope_to(&b.address, &b.public_key, "for b")).await;
        deliver(
            &f.store,
            &envelope_to(&stranger.address(), &stranger.public_key(), "not ours"),
        )
        .await;

        let only_b = f.reader.read(Scope::All, Some(&b.address)).await.unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].as_message().unwrap().to, b.address);

        assert_eq!(f.reader.read(Scope::All, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_envelope_skipped() {
        let f = fixture();
        let key = f
            .keystore
            .import_private_key(&SecretKey::generate().to_wif(), "")
            .await
            .unwrap();

        let mut corrupt = envelope_to(&key.address, &key.public_key, "bad");
        let mut bytes = corrupt.ciphertext.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        corrupt.ciphertext = Bytes::from(bytes);

        deliver(&f.store, &corrupt).await;
        deliver(&f.store, &envelope_to(&key.address, &key.public_key, "good")).await;

        let items = f.reader.read(Scope::All, None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_message().unwrap().text, "good");
    }

    #[tokio::test]
    async fn test_locked_wallet_yields_placeholders() {
        let f = fixture();
        let wallet_address = f.wallet.new_address().unwrap();
        let wallet_public = f.wallet.secret_key(&wallet_address).unwrap().public_key();
        f.keystore.enable_receiving(&wallet_address).await.unwrap();

        let standalone = f
            .keystore
            .import_private_key(&SecretKey::generate().to_wif(), "")
            .await
            .unwrap();

        deliver(&f.store, &envelope_to(&wallet_address, &wallet_public, "w1")).await;
        deliver(
            &f.store,
            &envelope_to(&standalone.address, &standalone.public_key, "s1"),
        )
        .await;

        f.wallet.encrypt("pw").unwrap();

        let items = f.reader.read(Scope::All, None).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_locked());
        assert_eq!(items[1].as_message().unwrap().text, "s1");

        // Placeholders stay unread for a later New read.
        let new = f.reader.read(Scope::New, None).await.unwrap();
        assert_eq!(new.len(), 2);
        let new = f.reader.read(Scope::New, None).await.unwrap();
        assert_eq!(new.len(), 1);
        assert!(new[0].is_locked());

        f.wallet.unlock("pw", None).unwrap();
        let new = f.reader.read(Scope::New, None).await.unwrap();
        assert_eq!(new[0].as_message().unwrap().text, "w1");
    }

    #[tokio::test]
    async fn test_disabled_key_excluded_from_new() {
        let f = fixture();
        let address = f.wallet.new_address().unwrap();
        let public_key = f.wallet.secret_key(&address).unwrap().public_key();
        f.keystore.enable_receiving(&address).await.unwrap();

        deliver(&f.store, &envelope_to(&address, &public_key, "hi")).await;
        f.keystore.disable_receiving(&address).await.unwrap();

        assert!(f.reader.read(Scope::New, None).await.unwrap().is_empty());
        assert_eq!(f.reader.read(Scope::All, None).await.unwrap().len(), 1);
    }
}
