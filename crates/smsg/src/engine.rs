//! The Engine: unified API for paid secure messaging.
//!
//! The Engine wires the KeyStore, SendPipeline and InboxReader to one store,
//! one wallet, one ledger and one transport, and handles everything that
//! arrives from the network.

use std::sync::Arc;

use tracing::{debug, info, warn};

use smsg_core::{
    check_funding, validate_envelope, Address, Envelope, FundingCheck, MessageHash, PublicKey,
    ValidationError,
};
use smsg_net::{NetError, NetMessage, Transport};
use smsg_store::{InsertResult, OutboxEntry, OutboxState, QueryFilter, Store};

use crate::config::EngineConfig;
use crate::error::{Result, SmsgError};
use crate::inbox::{InboxItem, InboxReader, Scope};
use crate::keystore::{KeyAnnouncement, KeyListing, KeyStore, LocalKey};
use crate::ledger::Ledger;
use crate::now_secs;
use crate::send::{Composed, OutboxReport, SendOutcome, SendPipeline, SendRequest};
use crate::wallet::{LockStatus, Wallet};

/// Result of ingesting an envelope from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestResult {
    /// Envelope was stored. `paid` is the locally verified funding status.
    Accepted { hash: MessageHash, paid: bool },
    /// Envelope was already in store (idempotent).
    Duplicate,
    /// Envelope failed structural validation and was dropped.
    Invalid(ValidationError),
    /// Envelope is past its retention and was dropped.
    Expired,
}

/// The messaging engine of one node.
pub struct Engine<S: Store> {
    store: Arc<S>,
    wallet: Arc<dyn Wallet>,
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn Transport>,
    keystore: Arc<KeyStore<S>>,
    pipeline: SendPipeline<S>,
    inbox: InboxReader<S>,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    /// Create a new engine instance.
    pub fn new(
        store: S,
        wallet: Arc<dyn Wallet>,
        ledger: Arc<dyn Ledger>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(store);
        let keystore = Arc::new(KeyStore::new(store.clone(), wallet.clone()));
        let pipeline = SendPipeline::new(
            keystore.clone(),
            store.clone(),
            wallet.clone(),
            ledger.clone(),
            transport.clone(),
            config.clone(),
        );
        let inbox = InboxReader::new(keystore.clone(), store.clone());

        Self {
            store,
            wallet,
            ledger,
            transport,
            keystore,
            pipeline,
            inbox,
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keystore(&self) -> &KeyStore<S> {
        &self.keystore
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock state of the wallet backing this engine.
    pub fn lock_status(&self) -> LockStatus {
        self.wallet.lock_status()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Enable a wallet address for receiving and announce its public key.
    pub async fn enable_receiving(&self, address: &Address) -> Result<KeyAnnouncement> {
        let announcement = self.keystore.enable_receiving(address).await?;
        self.announce(announcement).await;
        Ok(announcement)
    }

    pub async fn disable_receiving(&self, address: &Address) -> Result<()> {
        self.keystore.disable_receiving(address).await
    }

    pub async fn list_keys(&self) -> Result<KeyListing> {
        self.keystore.list_keys().await
    }

    /// Import a standalone key and announce its public key.
    pub async fn import_private_key(&self, wif: &str, label: &str) -> Result<LocalKey> {
        let key = self.keystore.import_private_key(wif, label).await?;
        self.announce(KeyAnnouncement {
            address: key.address,
            public_key: key.public_key,
        })
        .await;
        Ok(key)
    }

    pub async fn export_private_key(&self, address: &Address) -> Result<String> {
        self.keystore.export_private_key(address).await
    }

    pub async fn remove_key(&self, address: &Address) -> Result<bool> {
        self.keystore.remove_key(address).await
    }

    pub async fn add_peer_key(&self, address: &Address, public_key: &PublicKey) -> Result<()> {
        self.keystore.add_peer_key(address, public_key).await
    }

    pub async fn get_public_key(&self, address: &Address) -> Result<Option<PublicKey>> {
        self.keystore.get_public_key(address).await
    }

    async fn announce(&self, announcement: KeyAnnouncement) {
        if let Err(e) = self.transport.broadcast(&announcement.into()).await {
            warn!(address = %announcement.address, error = %e, "key announcement failed");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome> {
        self.pipeline.send(request).await
    }

    /// Build an envelope without storing, funding or sending it.
    pub async fn compose(&self, request: &SendRequest) -> Result<Composed> {
        self.pipeline.compose(request).await
    }

    pub async fn inbox(&self, scope: Scope, address: Option<&Address>) -> Result<Vec<InboxItem>> {
        self.inbox.read(scope, address).await
    }

    /// Sent envelopes, optionally in one state. Nothing is decrypted.
    pub async fn outbox(&self, state: Option<OutboxState>) -> Result<Vec<OutboxEntry>> {
        Ok(self.store.list_outbox(state).await?)
    }

    /// Follow funding confirmations of paid sends.
    pub async fn poll_outbox(&self) -> Result<OutboxReport> {
        self.pipeline.poll_outbox().await
    }

    /// Drop envelopes past their retention. Never called implicitly.
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self.store.purge_expired(now_secs()).await?;
        if removed > 0 {
            info!(removed, "purged expired envelopes");
        }
        Ok(removed)
    }

    /// Number of stored envelopes per time bucket.
    pub async fn bucket_counts(&self) -> Result<Vec<(i64, usize)>> {
        Ok(self.store.bucket_counts().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network
    // ─────────────────────────────────────────────────────────────────────────

    /// Ingest an envelope received from a peer.
    ///
    /// Paid envelopes whose funding cannot be verified are kept as unpaid.
    pub async fn ingest(&self, envelope: &Envelope) -> Result<IngestResult> {
        if let Err(e) = validate_envelope(envelope, self.config.max_ttl_periods) {
            warn!(error = %e, "dropping invalid envelope");
            return Ok(IngestResult::Invalid(e));
        }

        if envelope.is_expired(now_secs(), self.config.period_secs) {
            debug!("dropping expired envelope");
            return Ok(IngestResult::Expired);
        }

        let hash = envelope.compute_hash();
        if self.store.has_envelope(&hash).await? {
            debug!(%hash, "duplicate envelope");
            return Ok(IngestResult::Duplicate);
        }

        let paid = if !envelope.claims_paid() {
            false
        } else if !self.config.verify_on_ingest {
            true
        } else {
            match self.verify_paid(envelope).await {
                Ok(()) => {
                    debug!(%hash, "funding verified");
                    true
                }
                Err(e) => {
                    warn!(%hash, error = %e, "funding not verified, keeping as unpaid");
                    false
                }
            }
        };

        let meta = self.config.envelope_meta(envelope, paid, now_secs());
        match self.store.insert_envelope(envelope, meta).await? {
            InsertResult::Inserted { .. } => Ok(IngestResult::Accepted { hash, paid }),
            InsertResult::AlreadyExists => Ok(IngestResult::Duplicate),
        }
    }

    /// Verify again every stored envelope whose paid claim could not be
    /// confirmed when it arrived, typically because its funding transaction
    /// was still unconfirmed.
    ///
    /// Returns the hashes now counted as paid.
    pub async fn recheck_pending(&self) -> Result<Vec<MessageHash>> {
        let filter = QueryFilter::all().pending_funding().live_at(now_secs());

        let mut verified = Vec::new();
        for stored in self.store.query(&filter).await? {
            match self.verify_paid(&stored.envelope).await {
                Ok(()) => {
                    self.store.set_paid(&stored.hash, true).await?;
                    debug!(hash = %stored.hash, "funding verified after arrival");
                    verified.push(stored.hash);
                }
                Err(e) => debug!(hash = %stored.hash, error = %e, "funding still unverified"),
            }
        }

        if !verified.is_empty() {
            info!(count = verified.len(), "pending envelopes now paid");
        }
        Ok(verified)
    }

    async fn verify_paid(&self, envelope: &Envelope) -> Result<()> {
        let txid = envelope
            .funding_txid
            .ok_or(ValidationError::MissingFunding)?;

        let confirmations = self
            .ledger
            .confirmations(&txid)
            .await?
            .ok_or_else(|| SmsgError::NetworkRejected(format!("unknown transaction {}", txid)))?;
        if confirmations < self.config.required_confirmations {
            return Err(SmsgError::NetworkRejected(format!(
                "transaction {} has {} confirmations",
                txid, confirmations
            )));
        }

        let tx = self
            .ledger
            .transaction(&txid)
            .await?
            .ok_or_else(|| SmsgError::NetworkRejected(format!("unknown transaction {}", txid)))?;

        match check_funding(envelope, &tx, &self.config.fee_schedule) {
            FundingCheck::Funded { .. } => Ok(()),
            FundingCheck::Underfunded { required, paid } => {
                Err(SmsgError::InsufficientFee { required, paid })
            }
            FundingCheck::MissingCommitment | FundingCheck::TxidMismatch => {
                Err(SmsgError::InsufficientFee {
                    required: self
                        .config
                        .fee_schedule
                        .required_fee(envelope.payload_size(), envelope.ttl_periods()),
                    paid: 0,
                })
            }
        }
    }

    /// Handle every message already queued on the transport, then recheck
    /// envelopes with pending funding.
    ///
    /// Returns the number of messages handled.
    pub async fn pump_network(&self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let (from, message) = match self.transport.try_recv().await {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(NetError::TransportError(reason)) => {
                    return Err(NetError::TransportError(reason).into())
                }
                Err(e) => {
                    warn!(error = %e, "dropping undecodable message");
                    continue;
                }
            };
            handled += 1;

            match message {
                NetMessage::Envelope(envelope) => {
                    let result = self.ingest(&envelope).await?;
                    debug!(peer = ?from, ?result, "ingested envelope");
                }
                NetMessage::KeyAnnouncement {
                    address,
                    public_key,
                } => match self.keystore.add_peer_key(&address, &public_key).await {
                    Ok(()) => debug!(peer = ?from, %address, "learned peer key"),
                    Err(e) => warn!(peer = ?from, %address, error = %e, "ignoring announcement"),
                },
            }
        }

        self.recheck_pending().await?;
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::send::SendResult;
    use crate::wallet::LocalWallet;
    use smsg_core::{build_funding_commitment, EnvelopeBuilder};
    use smsg_crypto::{KdfParams, SecretKey};
    use smsg_net::{memory::MemoryNetwork, NodeId};
    use smsg_store::MemoryStore;

    struct Node {
        engine: Engine<MemoryStore>,
        wallet: Arc<LocalWallet>,
    }

    async fn node(network: &Arc<MemoryNetwork>, ledger: &Arc<MemoryLedger>, name: &str) -> Node {
        let mut seed = [0u8; 32];
        seed[..name.len()].copy_from_slice(name.as_bytes());
        let wallet = Arc::new(LocalWallet::new(name, seed).with_kdf_params(KdfParams::fast()));
        let transport = Arc::new(network.create_transport(NodeId::random()).await);
        let engine = Engine::new(
            MemoryStore::new(),
            wallet.clone(),
            ledger.clone(),
            transport,
            EngineConfig::default(),
        );
        Node { engine, wallet }
    }

    #[tokio::test]
    async fn test_announcement_reaches_peer() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        let b = node(&network, &ledger, "b").await;

        let address = a.wallet.new_address().unwrap();
        let announcement = a.engine.enable_receiving(&address).await.unwrap();

        assert_eq!(b.engine.pump_network().await.unwrap(), 1);
        assert_eq!(
            b.engine.get_public_key(&address).await.unwrap(),
            Some(announcement.public_key)
        );
    }

    #[tokio::test]
    async fn test_free_message_delivery() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        let b = node(&network, &ledger, "b").await;

        let to = a.wallet.new_address().unwrap();
        a.engine.enable_receiving(&to).await.unwrap();
        b.engine.pump_network().await.unwrap();

        let from = b.wallet.new_address().unwrap();
        let outcome = b
            .engine
            .send(SendRequest::new(from, to, "hello a"))
            .await
            .unwrap();
        assert_eq!(outcome.result, SendResult::Sent);

        a.engine.pump_network().await.unwrap();
        let inbox = a.engine.inbox(Scope::New, None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        let message = inbox[0].as_message().unwrap();
        assert_eq!(message.text, "hello a");
        assert_eq!(message.from, Some(from));
        assert!(!message.paid);

        // Redelivery is deduplicated.
        let envelope = b
            .engine
            .store()
            .get_envelope(&outcome.hash)
            .await
            .unwrap()
            .unwrap()
            .envelope;
        assert_eq!(
            a.engine.ingest(&envelope).await.unwrap(),
            IngestResult::Duplicate
        );
    }

    #[tokio::test]
    async fn test_ingest_verifies_funding() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        ledger.fund("sender", 1_000_000).unwrap();

        let recipient = SecretKey::generate();
        let envelope = EnvelopeBuilder::new(&recipient.address(), vec![7u8; 200])
            .timestamp(now_secs())
            .ttl_periods(3)
            .paid(true)
            .build();
        let hash = envelope.compute_hash();
        let required = EngineConfig::default()
            .fee_schedule
            .required_fee(envelope.payload_size(), 3);

        let tx = ledger
            .create_funding("sender", vec![build_funding_commitment(&hash, required)])
            .await
            .unwrap();
        let txid = ledger.broadcast(&tx).await.unwrap();
        let envelope = envelope.with_funding(txid);

        // Unconfirmed funding is not trusted yet.
        assert!(matches!(
            a.engine.verify_paid(&envelope).await,
            Err(SmsgError::NetworkRejected(_))
        ));

        ledger.stake_block().unwrap();
        assert_eq!(
            a.engine.ingest(&envelope).await.unwrap(),
            IngestResult::Accepted { hash, paid: true }
        );
    }

    #[tokio::test]
    async fn test_funding_confirmed_after_arrival() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        ledger.fund("sender", 1_000_000).unwrap();

        let recipient = SecretKey::generate();
        let envelope = EnvelopeBuilder::new(&recipient.address(), vec![7u8; 200])
            .timestamp(now_secs())
            .ttl_periods(2)
            .paid(true)
            .build();
        let hash = envelope.compute_hash();
        let required = EngineConfig::default()
            .fee_schedule
            .required_fee(envelope.payload_size(), 2);
        let tx = ledger
            .create_funding("sender", vec![build_funding_commitment(&hash, required)])
            .await
            .unwrap();
        let envelope = envelope.with_funding(ledger.broadcast(&tx).await.unwrap());

        assert_eq!(
            a.engine.ingest(&envelope).await.unwrap(),
            IngestResult::Accepted { hash, paid: false }
        );
        assert!(a.engine.recheck_pending().await.unwrap().is_empty());

        ledger.stake_block().unwrap();
        assert_eq!(
            a.engine.ingest(&envelope).await.unwrap(),
            IngestResult::Duplicate
        );
        assert_eq!(a.engine.recheck_pending().await.unwrap(), vec![hash]);
        assert!(a.engine.store().get_envelope(&hash).await.unwrap().unwrap().paid);

        // Nothing left to recheck.
        assert!(a.engine.recheck_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pump_rechecks_pending_funding() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        let peer = network.create_transport(NodeId::random()).await;
        ledger.fund("sender", 1_000_000).unwrap();

        let to = a.wallet.new_address().unwrap();
        let envelope = EnvelopeBuilder::new(&to, vec![5u8; 120])
            .timestamp(now_secs())
            .ttl_periods(3)
            .paid(true)
            .build();
        let hash = envelope.compute_hash();
        let required = EngineConfig::default()
            .fee_schedule
            .required_fee(envelope.payload_size(), 3);
        let tx = ledger
            .create_funding("sender", vec![build_funding_commitment(&hash, required)])
            .await
            .unwrap();
        let envelope = envelope.with_funding(ledger.broadcast(&tx).await.unwrap());

        peer.broadcast(&NetMessage::Envelope(envelope)).await.unwrap();
        assert_eq!(a.engine.pump_network().await.unwrap(), 1);
        assert!(!a.engine.store().get_envelope(&hash).await.unwrap().unwrap().paid);

        ledger.stake_block().unwrap();
        assert_eq!(a.engine.pump_network().await.unwrap(), 0);
        assert!(a.engine.store().get_envelope(&hash).await.unwrap().unwrap().paid);
    }

    #[tokio::test]
    async fn test_paid_claim_without_funding_kept_unpaid() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;

        let envelope = EnvelopeBuilder::new(&SecretKey::generate().address(), vec![3u8; 50])
            .timestamp(now_secs())
            .ttl_periods(2)
            .paid(true)
            .build();
        let hash = envelope.compute_hash();

        assert!(matches!(
            a.engine.verify_paid(&envelope).await,
            Err(SmsgError::Validation(ValidationError::MissingFunding))
        ));
        assert_eq!(
            a.engine.ingest(&envelope).await.unwrap(),
            IngestResult::Accepted { hash, paid: false }
        );
        assert!(a.engine.recheck_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_underfunded_kept_unpaid() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        ledger.fund("sender", 1_000_000).unwrap();

        let recipient = SecretKey::generate();
        let envelope = EnvelopeBuilder::new(&recipient.address(), vec![7u8; 200])
            .timestamp(now_secs())
            .ttl_periods(4)
            .paid(true)
            .build();
        let hash = envelope.compute_hash();
        let required = EngineConfig::default()
            .fee_schedule
            .required_fee(envelope.payload_size(), 4);

        let tx = ledger
            .create_funding("sender", vec![build_funding_commitment(&hash, required - 1)])
            .await
            .unwrap();
        let txid = ledger.broadcast(&tx).await.unwrap();
        ledger.stake_block().unwrap();
        let envelope = envelope.with_funding(txid);

        assert!(matches!(
            a.engine.verify_paid(&envelope).await,
            Err(SmsgError::InsufficientFee { .. })
        ));
        assert_eq!(
            a.engine.ingest(&envelope).await.unwrap(),
            IngestResult::Accepted { hash, paid: false }
        );
        let stored = a.engine.store().get_envelope(&hash).await.unwrap().unwrap();
        assert!(!stored.paid);
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_and_expired() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        let to = SecretKey::generate().address();

        let empty = EnvelopeBuilder::new(&to, Vec::<u8>::new())
            .timestamp(now_secs())
            .ttl_periods(2)
            .build();
        assert_eq!(
            a.engine.ingest(&empty).await.unwrap(),
            IngestResult::Invalid(ValidationError::EmptyCiphertext)
        );

        let old = EnvelopeBuilder::new(&to, vec![1u8; 10])
            .timestamp(1_000)
            .ttl_periods(1)
            .build();
        assert_eq!(a.engine.ingest(&old).await.unwrap(), IngestResult::Expired);
    }

    #[tokio::test]
    async fn test_import_announces_key() {
        let network = MemoryNetwork::new();
        let ledger = Arc::new(MemoryLedger::new());
        let a = node(&network, &ledger, "a").await;
        let b = node(&network, &ledger, "b").await;

        let key = a
            .engine
            .import_private_key(&SecretKey::generate().to_wif(), "k")
            .await
            .unwrap();
        assert_eq!(b.engine.pump_network().await.unwrap(), 1);
        assert!(b.engine.get_public_key(&key.address).await.unwrap().is_some());

        let purged = b.engine.purge_expired().await.unwrap();
        assert_eq!(purged, 0);
    }
}
