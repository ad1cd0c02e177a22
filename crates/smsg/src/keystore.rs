//! KeyStore: local messaging keys and learned peer keys.
//!
//! Two kinds of local key share one address space. Wallet-derived keys stay
//! in the [`Wallet`] and only get a record here once enabled for receiving.
//! Standalone keys are imported from WIF and their secret is stored here.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use smsg_core::{Address, PublicKey};
use smsg_crypto::SecretKey;
use smsg_net::NetMessage;
use smsg_store::{KeyKind, LocalKeyRecord, Store};

use crate::error::{Result, SmsgError};
use crate::now_secs;
use crate::wallet::Wallet;

/// A local messaging key as reported to callers. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalKey {
    pub address: Address,
    pub public_key: PublicKey,
    pub kind: KeyKind,
    pub receiving_enabled: bool,
    pub label: String,
}

impl From<&LocalKeyRecord> for LocalKey {
    fn from(record: &LocalKeyRecord) -> Self {
        Self {
            address: record.address,
            public_key: record.public_key,
            kind: record.kind,
            receiving_enabled: record.receiving_enabled,
            label: record.label.clone(),
        }
    }
}

/// Result of [`KeyStore::list_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyListing {
    /// Wallet-derived keys enabled for receiving.
    pub wallet_keys: Vec<LocalKey>,
    /// Standalone imported keys.
    pub smsg_keys: Vec<LocalKey>,
}

/// A public key to publish for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAnnouncement {
    pub address: Address,
    pub public_key: PublicKey,
}

impl From<KeyAnnouncement> for NetMessage {
    fn from(announcement: KeyAnnouncement) -> Self {
        NetMessage::KeyAnnouncement {
            address: announcement.address,
            public_key: announcement.public_key,
        }
    }
}

/// Manages local and peer keys on top of a [`Store`].
pub struct KeyStore<S: Store> {
    store: Arc<S>,
    wallet: Arc<dyn Wallet>,
    write_lock: Mutex<()>,
}

impl<S: Store> KeyStore<S> {
    pub fn new(store: Arc<S>, wallet: Arc<dyn Wallet>) -> Self {
        Self {
            store,
            wallet,
            write_lock: Mutex::new(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Enable a wallet address for receiving.
    ///
    /// Idempotent. Returns the announcement to publish.
    pub async fn enable_receiving(&self, address: &Address) -> Result<KeyAnnouncement> {
        let public_key = self
            .wallet
            .public_key(address)
            .ok_or(SmsgError::UnknownAddress(*address))?;

        let _guard = self.write_lock.lock().await;
        let record = match self.store.get_local_key(address).await? {
            Some(record) if record.kind == KeyKind::Standalone => {
                return Err(SmsgError::InvalidKey(
                    "address already managed as standalone key".into(),
                ));
            }
            Some(record) if record.receiving_enabled => {
                debug!(%address, "receiving already enabled");
                return Ok(KeyAnnouncement {
                    address: *address,
                    public_key,
                });
            }
            Some(mut record) => {
                record.receiving_enabled = true;
                record
            }
            None => LocalKeyRecord {
                address: *address,
                public_key,
                kind: KeyKind::WalletDerived,
                receiving_enabled: true,
                label: String::new(),
                secret: None,
                created_at: now_secs(),
            },
        };
        self.store.upsert_local_key(&record).await?;

        info!(%address, "receiving enabled");
        Ok(KeyAnnouncement {
            address: *address,
            public_key,
        })
    }

    /// Stop receiving on a local address. The key itself is kept.
    pub async fn disable_receiving(&self, address: &Address) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .store
            .get_local_key(address)
            .await?
            .ok_or(SmsgError::UnknownAddress(*address))?;

        if record.receiving_enabled {
            record.receiving_enabled = false;
            self.store.upsert_local_key(&record).await?;
            info!(%address, "receiving disabled");
        }
        Ok(())
    }

    /// Enabled wallet keys and all standalone keys.
    pub async fn list_keys(&self) -> Result<KeyListing> {
        let mut listing = KeyListing::default();
        for record in self.store.list_local_keys().await? {
            match record.kind {
                KeyKind::WalletDerived if record.receiving_enabled => {
                    listing.wallet_keys.push(LocalKey::from(&record))
                }
                KeyKind::WalletDerived => {}
                KeyKind::Standalone => listing.smsg_keys.push(LocalKey::from(&record)),
            }
        }
        Ok(listing)
    }

    /// Import a standalone key from WIF. It is enabled for receiving at once.
    ///
    /// Importing the same key again only updates the label; a disabled key
    /// stays disabled.
    pub async fn import_private_key(&self, wif: &str, label: &str) -> Result<LocalKey> {
        let secret = SecretKey::from_wif(wif)?;
        let address = secret.address();

        if self.wallet.owns(&address) {
            return Err(SmsgError::InvalidKey(
                "address already managed as wallet key".into(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let (created_at, receiving_enabled) = match self.store.get_local_key(&address).await? {
            Some(existing) if existing.kind == KeyKind::WalletDerived => {
                return Err(SmsgError::InvalidKey(
                    "address already managed as wallet key".into(),
                ));
            }
            Some(existing) => (existing.created_at, existing.receiving_enabled),
            None => (now_secs(), true),
        };

        let record = LocalKeyRecord {
            address,
            public_key: secret.public_key(),
            kind: KeyKind::Standalone,
            receiving_enabled,
            label: label.to_string(),
            secret: Some(*secret.to_bytes()),
            created_at,
        };
        self.store.upsert_local_key(&record).await?;

        info!(%address, "imported key");
        Ok(LocalKey::from(&record))
    }

    /// Export a local key as WIF.
    pub async fn export_private_key(&self, address: &Address) -> Result<String> {
        Ok(self.sender_key(address).await?.to_wif())
    }

    /// Remove a local key. Returns false if it was not present.
    pub async fn remove_key(&self, address: &Address) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.remove_local_key(address).await?;
        if removed {
            info!(%address, "removed key");
        }
        Ok(removed)
    }

    /// All local key records, including disabled wallet keys.
    pub(crate) async fn records(&self) -> Result<Vec<LocalKeyRecord>> {
        Ok(self.store.list_local_keys().await?)
    }

    /// The private key that opens messages for a local record.
    ///
    /// Wallet keys observe the wallet lock state at the time of the call.
    pub(crate) fn secret_for(&self, record: &LocalKeyRecord) -> Result<SecretKey> {
        match (record.kind, record.secret) {
            (KeyKind::Standalone, Some(secret)) => Ok(SecretKey::from_bytes(secret)),
            (KeyKind::Standalone, None) => Err(SmsgError::MissingKey),
            (KeyKind::WalletDerived, _) => self.wallet.secret_key(&record.address),
        }
    }

    /// The private key to send from `address`.
    ///
    /// Any local record or wallet address qualifies.
    pub async fn sender_key(&self, address: &Address) -> Result<SecretKey> {
        if let Some(record) = self.store.get_local_key(address).await? {
            return self.secret_for(&record);
        }
        if self.wallet.owns(address) {
            return self.wallet.secret_key(address);
        }
        Err(SmsgError::UnknownAddress(*address))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Public keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a peer's public key. It must hash to `address`.
    pub async fn add_peer_key(&self, address: &Address, public_key: &PublicKey) -> Result<()> {
        if !address.matches(public_key) {
            return Err(SmsgError::KeyMismatch(*address));
        }

        let _guard = self.write_lock.lock().await;
        self.store.upsert_peer_key(address, public_key).await?;
        debug!(%address, "added peer key");
        Ok(())
    }

    /// Public key for an address: local keys first, then peers, then the wallet.
    pub async fn get_public_key(&self, address: &Address) -> Result<Option<PublicKey>> {
        if let Some(record) = self.store.get_local_key(address).await? {
            return Ok(Some(record.public_key));
        }
        if let Some(public_key) = self.store.get_peer_key(address).await? {
            return Ok(Some(public_key));
        }
        Ok(self.wallet.public_key(address))
    }

    /// Public key of a send target.
    pub async fn recipient_public_key(&self, address: &Address) -> Result<PublicKey> {
        self.get_public_key(address)
            .await?
            .ok_or(SmsgError::UnknownRecipientKey(*address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::LocalWallet;
    use smsg_crypto::KdfParams;
    use smsg_store::MemoryStore;

    struct Fixture {
        keystore: KeyStore<MemoryStore>,
        wallet: Arc<LocalWallet>,
    }

    fn fixture() -> Fixture {
        let wallet =
            Arc::new(LocalWallet::new("alice", [1u8; 32]).with_kdf_params(KdfParams::fast()));
        let keystore = KeyStore::new(Arc::new(MemoryStore::new()), wallet.clone());
        Fixture { keystore, wallet }
    }

    #[tokio::test]
    async fn test_enable_receiving() {
        let f = fixture();
        let address = f.wallet.new_address().unwrap();

        let announcement = f.keystore.enable_receiving(&address).await.unwrap();
        assert_eq!(announcement.address, address);
        assert!(address.matches(&announcement.public_key));

        // Idempotent
        f.keystore.enable_receiving(&address).await.unwrap();

        let listing = f.keystore.list_keys().await.unwrap();
        assert_eq!(listing.wallet_keys.len(), 1);
        assert_eq!(listing.wallet_keys[0].kind, KeyKind::WalletDerived);
        assert!(listing.smsg_keys.is_empty());
    }

    #[tokio::test]
    async fn test_enable_unknown_address() {
        let f = fixture();
        let stranger = SecretKey::generate().address();
        assert!(matches!(
            f.keystore.enable_receiving(&stranger).await,
            Err(SmsgError::UnknownAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_wallet_keys_not_listed() {
        let f = fixture();
        let address = f.wallet.new_address().unwrap();
        f.keystore.enable_receiving(&address).await.unwrap();
        f.keystore.disable_receiving(&address).await.unwrap();

        let listing = f.keystore.list_keys().await.unwrap();
        assert!(listing.wallet_keys.is_empty());

        f.keystore.enable_receiving(&address).await.unwrap();
        assert_eq!(f.keystore.list_keys().await.unwrap().wallet_keys.len(), 1);
    }

    #[tokio::test]
    async fn test_import_private_key() {
        let f = fixture();
        let secret = SecretKey::generate();

        let key = f
            .keystore
            .import_private_key(&secret.to_wif(), "k1")
            .await
            .unwrap();
        assert_eq!(key.address, secret.address());
        assert_eq!(key.kind, KeyKind::Standalone);
        assert!(key.receiving_enabled);

        // Re-import updates the label only.
        let again = f
            .keystore
            .import_private_key(&secret.to_wif(), "renamed")
            .await
            .unwrap();
        assert_eq!(again.label, "renamed");

        let listing = f.keystore.list_keys().await.unwrap();
        assert_eq!(listing.smsg_keys.len(), 1);
        assert_eq!(listing.smsg_keys[0].label, "renamed");

        let exported = f.keystore.export_private_key(&key.address).await.unwrap();
        assert_eq!(exported, secret.to_wif());
    }

    #[tokio::test]
    async fn test_reimport_keeps_receiving_flag() {
        let f = fixture();
        let wif = SecretKey::generate().to_wif();

        let key = f.keystore.import_private_key(&wif, "k1").await.unwrap();
        f.keystore.disable_receiving(&key.address).await.unwrap();

        let again = f.keystore.import_private_key(&wif, "k2").await.unwrap();
        assert!(!again.receiving_enabled);
        assert_eq!(again.label, "k2");

        let listing = f.keystore.list_keys().await.unwrap();
        assert!(!listing.smsg_keys[0].receiving_enabled);
    }

    #[tokio::test]
    async fn test_import_malformed_key() {
        let f = fixture();
        assert!(matches!(
            f.keystore.import_private_key("not-a-key", "").await,
            Err(SmsgError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_import_wallet_key_rejected() {
        let f = fixture();
        let address = f.wallet.new_address().unwrap();
        let wif = f.wallet.secret_key(&address).unwrap().to_wif();

        assert!(matches!(
            f.keystore.import_private_key(&wif, "").await,
            Err(SmsgError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_add_peer_key() {
        let f = fixture();
        let peer = SecretKey::generate();
        let other = SecretKey::generate();

        assert!(matches!(
            f.keystore
                .add_peer_key(&peer.address(), &other.public_key())
                .await,
            Err(SmsgError::KeyMismatch(_))
        ));

        f.keystore
            .add_peer_key(&peer.address(), &peer.public_key())
            .await
            .unwrap();
        assert_eq!(
            f.keystore
                .recipient_public_key(&peer.address())
                .await
                .unwrap(),
            peer.public_key()
        );
    }

    #[tokio::test]
    async fn test_recipient_resolution() {
        let f = fixture();
        let stranger = SecretKey::generate().address();
        assert!(matches!(
            f.keystore.recipient_public_key(&stranger).await,
            Err(SmsgError::UnknownRecipientKey(_))
        ));

        // Self-sends resolve through the wallet.
        let own = f.wallet.new_address().unwrap();
        assert!(f.keystore.recipient_public_key(&own).await.is_ok());
    }

    #[tokio::test]
    async fn test_export_locked_wallet_key() {
        let f = fixture();
        let address = f.wallet.new_address().unwrap();
        f.keystore.enable_receiving(&address).await.unwrap();
        f.wallet.encrypt("pw").unwrap();

        assert!(matches!(
            f.keystore.export_private_key(&address).await,
            Err(SmsgError::WalletLocked)
        ));

        f.wallet.unlock("pw", None).unwrap();
        assert!(f.keystore.export_private_key(&address).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_key() {
        let f = fixture();
        let secret = SecretKey::generate();
        let key = f
            .keystore
            .import_private_key(&secret.to_wif(), "")
            .await
            .unwrap();

        assert!(f.keystore.remove_key(&key.address).await.unwrap());
        assert!(!f.keystore.remove_key(&key.address).await.unwrap());
        assert!(matches!(
            f.keystore.sender_key(&key.address).await,
            Err(SmsgError::UnknownAddress(_))
        ));
    }
}
