//! SendPipeline: compose, fund and propagate outgoing messages.
//!
//! A paid send moves through
//!
//! ```text
//! COMPOSE -> FEE_COMPUTED -> FUNDING_BUILT -> BROADCAST -> CONFIRMED -> SENT
//!                 |                              |
//!              dry run                       rejected
//!                 v                              v
//!             NOT SENT                        REJECTED
//! ```
//!
//! [`SendPipeline::send`] runs up to BROADCAST and records the envelope in the
//! outbox. [`SendPipeline::poll_outbox`] follows confirmations and propagates
//! the envelope once its funding is confirmed. No lock is held while the
//! ledger or the transport is awaited.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use smsg_core::limits::{MAX_FREE_ENVELOPE_BYTES, MAX_PAID_ENVELOPE_BYTES};
use smsg_core::{
    build_funding_commitment, Address, Envelope, EnvelopeBuilder, MessageHash, Txid,
};
use smsg_crypto::{seal, MessageBody, SenderKey};
use smsg_net::{NetMessage, Transport};
use smsg_store::{OutboxEntry, OutboxState, Store};

use crate::config::EngineConfig;
use crate::error::{Result, SmsgError};
use crate::keystore::KeyStore;
use crate::ledger::Ledger;
use crate::now_secs;
use crate::wallet::Wallet;

/// A request to send one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub from: Address,
    pub to: Address,
    pub text: String,
    pub paid: bool,
    /// Retention periods. Only meaningful for paid sends.
    pub ttl_periods: u32,
    /// Compute the fee and stop before funding.
    pub dry_run: bool,
    /// Seal with an ephemeral key and leave the sender out of the header.
    pub anonymous: bool,
}

impl SendRequest {
    /// A free message.
    pub fn new(from: Address, to: Address, text: impl Into<String>) -> Self {
        Self {
            from,
            to,
            text: text.into(),
            paid: false,
            ttl_periods: 0,
            dry_run: false,
            anonymous: false,
        }
    }

    /// Pay for retention over `ttl_periods` periods.
    pub fn paid(mut self, ttl_periods: u32) -> Self {
        self.paid = true;
        self.ttl_periods = ttl_periods;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// Outcome vocabulary reported upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    NotSent,
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendResult::Sent => f.write_str("Sent."),
            SendResult::NotSent => f.write_str("Not Sent."),
        }
    }
}

/// What a send produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub result: SendResult,
    /// Fee charged, or that would be charged for a dry run. Zero for free sends.
    pub fee: u64,
    /// Funding transaction of a paid send.
    pub txid: Option<Txid>,
    pub hash: MessageHash,
}

/// A composed but not yet funded envelope.
#[derive(Debug, Clone)]
pub struct Composed {
    pub envelope: Envelope,
    pub fee: u64,
}

/// Progress made by one [`SendPipeline::poll_outbox`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxReport {
    pub confirmed: Vec<MessageHash>,
    pub sent: Vec<MessageHash>,
    pub rejected: Vec<MessageHash>,
}

impl OutboxReport {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.sent.is_empty() && self.rejected.is_empty()
    }
}

/// Orchestrates outgoing messages.
pub struct SendPipeline<S: Store> {
    keystore: Arc<KeyStore<S>>,
    store: Arc<S>,
    wallet: Arc<dyn Wallet>,
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl<S: Store> SendPipeline<S> {
    pub fn new(
        keystore: Arc<KeyStore<S>>,
        store: Arc<S>,
        wallet: Arc<dyn Wallet>,
        ledger: Arc<dyn Ledger>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            keystore,
            store,
            wallet,
            ledger,
            transport,
            config,
        }
    }

    /// Resolve keys, seal the text and build the envelope. Computes the fee
    /// for paid requests.
    pub async fn compose(&self, request: &SendRequest) -> Result<Composed> {
        let sender = self.keystore.sender_key(&request.from).await?;
        let recipient = self.keystore.recipient_public_key(&request.to).await?;

        let ttl_periods = if request.paid {
            self.config.check_ttl(request.ttl_periods)?;
            request.ttl_periods
        } else {
            self.config.free_ttl_periods
        };

        let body = MessageBody {
            from: (!request.anonymous).then_some(request.from),
            text: request.text.clone(),
        };
        let sender_key = if request.anonymous {
            SenderKey::Ephemeral
        } else {
            SenderKey::Static(&sender)
        };
        let ciphertext = seal(sender_key, &recipient, &body)?;

        let mut builder = EnvelopeBuilder::new(&request.to, ciphertext)
            .timestamp(now_secs())
            .ttl_periods(ttl_periods)
            .paid(request.paid);
        if !request.anonymous {
            builder = builder.sender(request.from);
        }
        let envelope = builder.build();

        let size = envelope.payload_size();
        let limit = if request.paid {
            MAX_PAID_ENVELOPE_BYTES
        } else {
            MAX_FREE_ENVELOPE_BYTES
        };
        if size > limit {
            return Err(SmsgError::MessageTooLarge { size, limit });
        }

        let fee = if request.paid {
            self.config.fee_schedule.required_fee(size, ttl_periods)
        } else {
            0
        };

        Ok(Composed { envelope, fee })
    }

    /// Send a message.
    ///
    /// Dry runs report `NotSent` with the fee. Paid sends are funded and
    /// broadcast to the ledger, then propagated by [`poll_outbox`](Self::poll_outbox)
    /// once confirmed. Free sends are stored and propagated right away.
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome> {
        let Composed { envelope, fee } = self.compose(&request).await?;
        let hash = envelope.compute_hash();

        if request.dry_run {
            info!(%hash, fee, "Not Sent. (dry run)");
            return Ok(SendOutcome {
                result: SendResult::NotSent,
                fee,
                txid: None,
                hash,
            });
        }

        if !request.paid {
            self.propagate(&envelope, false).await?;
            self.record_outbox(&envelope, OutboxState::Sent, 0, None)
                .await?;
            info!(%hash, to = %request.to, "Sent. (free)");
            return Ok(SendOutcome {
                result: SendResult::Sent,
                fee: 0,
                txid: None,
                hash,
            });
        }

        let commitment = build_funding_commitment(&hash, fee);
        let funding = self
            .ledger
            .create_funding(self.wallet.account(), vec![commitment])
            .await?;
        let txid = match self.ledger.broadcast(&funding).await {
            Ok(txid) => txid,
            Err(e) => {
                warn!(%hash, error = %e, "Not Sent. (funding rejected)");
                return Err(e);
            }
        };

        let envelope = envelope.with_funding(txid);
        self.record_outbox(&envelope, OutboxState::Broadcast, fee, Some(txid))
            .await?;

        info!(%hash, %txid, fee, "Sent.");
        Ok(SendOutcome {
            result: SendResult::Sent,
            fee,
            txid: Some(txid),
            hash,
        })
    }

    /// Advance paid sends: confirm, propagate or reject them.
    pub async fn poll_outbox(&self) -> Result<OutboxReport> {
        let mut report = OutboxReport::default();

        for entry in self.store.list_outbox(Some(OutboxState::Broadcast)).await? {
            let Some(txid) = entry.txid else {
                continue;
            };
            match self.ledger.confirmations(&txid).await? {
                None => {
                    warn!(hash = %entry.hash, %txid, "funding transaction dropped");
                    self.store
                        .set_outbox_state(&entry.hash, OutboxState::Rejected, now_secs())
                        .await?;
                    report.rejected.push(entry.hash);
                }
                Some(confirmations) if confirmations >= self.config.required_confirmations => {
                    self.store
                        .set_outbox_state(&entry.hash, OutboxState::Confirmed, now_secs())
                        .await?;
                    report.confirmed.push(entry.hash);
                }
                Some(_) => {}
            }
        }

        for entry in self.store.list_outbox(Some(OutboxState::Confirmed)).await? {
            self.propagate(&entry.envelope, true).await?;
            self.store
                .set_outbox_state(&entry.hash, OutboxState::Sent, now_secs())
                .await?;
            debug!(hash = %entry.hash, "propagated paid envelope");
            report.sent.push(entry.hash);
        }

        Ok(report)
    }

    /// Store locally and hand to the transport.
    async fn propagate(&self, envelope: &Envelope, paid: bool) -> Result<()> {
        let meta = self.config.envelope_meta(envelope, paid, now_secs());
        self.store.insert_envelope(envelope, meta).await?;

        if let Err(e) = self
            .transport
            .broadcast(&NetMessage::Envelope(envelope.clone()))
            .await
        {
            warn!(hash = %envelope.compute_hash(), error = %e, "broadcast failed");
        }
        Ok(())
    }

    async fn record_outbox(
        &self,
        envelope: &Envelope,
        state: OutboxState,
        fee: u64,
        txid: Option<Txid>,
    ) -> Result<()> {
        let now = now_secs();
        let entry = OutboxEntry {
            hash: envelope.compute_hash(),
            envelope: envelope.clone(),
            state,
            fee,
            txid,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_outbox(&entry).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::wallet::LocalWallet;
    use smsg_core::validate_envelope;
    use smsg_crypto::{open_envelope, KdfParams, SecretKey};
    use smsg_net::{memory::MemoryNetwork, NodeId};
    use smsg_store::{MemoryStore, QueryFilter};

    struct Fixture {
        pipeline: SendPipeline<MemoryStore>,
        store: Arc<MemoryStore>,
        ledger: Arc<MemoryLedger>,
        from: Address,
        recipient: SecretKey,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let wallet =
            Arc::new(LocalWallet::new("bob", [5u8; 32]).with_kdf_params(KdfParams::fast()));
        let from = wallet.new_address().unwrap();
        let keystore = Arc::new(KeyStore::new(store.clone(), wallet.clone()));

        let recipient = SecretKey::generate();
        keystore
            .add_peer_key(&recipient.address(), &recipient.public_key())
            .await
            .unwrap();

        let ledger = Arc::new(MemoryLedger::new());
        ledger.fund("bob", 10_000_000).unwrap();

        let network = MemoryNetwork::new();
        let transport = Arc::new(network.create_transport(NodeId::random()).await);

        let pipeline = SendPipeline::new(
            keystore,
            store.clone(),
            wallet,
            ledger.clone(),
            transport,
            EngineConfig::default(),
        );
        Fixture {
            pipeline,
            store,
            ledger,
            from,
            recipient,
        }
    }

    #[test]
    fn test_send_result_display() {
        assert_eq!(SendResult::Sent.to_string(), "Sent.");
        assert_eq!(SendResult::NotSent.to_string(), "Not Sent.");
    }

    #[tokio::test]
    async fn test_compose_paid_fee() {
        let f = fixture().await;
        let request = SendRequest::new(f.from, f.recipient.address(), "hello").paid(4);

        let composed = f.pipeline.compose(&request).await.unwrap();
        let expected = EngineConfig::default()
            .fee_schedule
            .required_fee(composed.envelope.payload_size(), 4);
        assert_eq!(composed.fee, expected);
        assert!(composed.fee > 0);
        assert_eq!(composed.envelope.ttl_periods(), 4);
        assert_eq!(composed.envelope.sender(), Some(&f.from));

        let opened = open_envelope(Some(&f.recipient), &composed.envelope).unwrap();
        assert_eq!(opened.body.text, "hello");
    }

    #[tokio::test]
    async fn test_dry_run_never_funds() {
        let f = fixture().await;
        let balance = f.ledger.balance("bob");
        let request = SendRequest::new(f.from, f.recipient.address(), "preview")
            .paid(4)
            .dry_run();

        let outcome = f.pipeline.send(request).await.unwrap();
        assert_eq!(outcome.result, SendResult::NotSent);
        assert!(outcome.fee > 0);
        assert_eq!(outcome.txid, None);
        assert_eq!(f.ledger.balance("bob"), balance);
        assert!(f.store.list_outbox(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paid_send_yields_txid() {
        let f = fixture().await;
        let request = SendRequest::new(f.from, f.recipient.address(), "paid").paid(2);

        let outcome = f.pipeline.send(request).await.unwrap();
        assert_eq!(outcome.result, SendResult::Sent);
        let txid = outcome.txid.unwrap();
        let txid_hex = txid.to_string();
        assert_eq!(txid_hex.len(), 64);
        assert!(txid_hex.chars().all(|c| c.is_ascii_hexdigit()));

        let entry = f.store.get_outbox(&outcome.hash).await.unwrap().unwrap();
        assert_eq!(entry.state, OutboxState::Broadcast);
        assert_eq!(entry.fee, outcome.fee);
        assert_eq!(entry.envelope.funding_txid, Some(txid));
        assert_eq!(validate_envelope(&entry.envelope, 31), Ok(()));

        // Not propagated until confirmed.
        assert!(!f.store.has_envelope(&outcome.hash).await.unwrap());
        assert!(f.pipeline.poll_outbox().await.unwrap().is_empty());

        f.ledger.stake_block().unwrap();
        let report = f.pipeline.poll_outbox().await.unwrap();
        assert_eq!(report.confirmed, vec![outcome.hash]);
        assert_eq!(report.sent, vec![outcome.hash]);

        let stored = f.store.get_envelope(&outcome.hash).await.unwrap().unwrap();
        assert!(stored.paid);
        let entry = f.store.get_outbox(&outcome.hash).await.unwrap().unwrap();
        assert_eq!(entry.state, OutboxState::Sent);
    }

    #[tokio::test]
    async fn test_dropped_funding_rejected() {
        let f = fixture().await;
        let outcome = f
            .pipeline
            .send(SendRequest::new(f.from, f.recipient.address(), "x").paid(1))
            .await
            .unwrap();

        f.ledger.evict(&outcome.txid.unwrap()).unwrap();
        let report = f.pipeline.poll_outbox().await.unwrap();
        assert_eq!(report.rejected, vec![outcome.hash]);

        let entry = f.store.get_outbox(&outcome.hash).await.unwrap().unwrap();
        assert_eq!(entry.state, OutboxState::Rejected);
    }

    #[tokio::test]
    async fn test_free_send_stored_immediately() {
        let f = fixture().await;
        let outcome = f
            .pipeline
            .send(SendRequest::new(f.from, f.recipient.address(), "free"))
            .await
            .unwrap();

        assert_eq!(outcome.result, SendResult::Sent);
        assert_eq!(outcome.fee, 0);
        assert_eq!(outcome.txid, None);

        let stored = f.store.get_envelope(&outcome.hash).await.unwrap().unwrap();
        assert!(!stored.paid);
        assert_eq!(stored.envelope.ttl_periods(), 2);
    }

    #[tokio::test]
    async fn test_anonymous_send() {
        let f = fixture().await;
        let request = SendRequest::new(f.from, f.recipient.address(), "psst").anonymous();

        let composed = f.pipeline.compose(&request).await.unwrap();
        assert_eq!(composed.envelope.sender(), None);

        let opened = open_envelope(Some(&f.recipient), &composed.envelope).unwrap();
        assert_eq!(opened.body.from, None);
        assert_eq!(opened.body.text, "psst");
    }

    #[tokio::test]
    async fn test_send_errors() {
        let f = fixture().await;
        let stranger = SecretKey::generate().address();

        let unknown_recipient = SendRequest::new(f.from, stranger, "x");
        assert!(matches!(
            f.pipeline.send(unknown_recipient).await,
            Err(SmsgError::UnknownRecipientKey(_))
        ));

        let unknown_sender = SendRequest::new(stranger, f.recipient.address(), "x");
        assert!(matches!(
            f.pipeline.send(unknown_sender).await,
            Err(SmsgError::UnknownAddress(_))
        ));

        let bad_ttl = SendRequest::new(f.from, f.recipient.address(), "x").paid(0);
        assert!(matches!(
            f.pipeline.send(bad_ttl).await,
            Err(SmsgError::InvalidTtl { .. })
        ));

        let too_large = SendRequest::new(f.from, f.recipient.address(), "x".repeat(30_000));
        assert!(matches!(
            f.pipeline.send(too_large).await,
            Err(SmsgError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let f = fixture().await;
        let big = "y".repeat(400_000);
        let request = SendRequest::new(f.from, f.recipient.address(), big).paid(31);

        assert!(matches!(
            f.pipeline.send(request).await,
            Err(SmsgError::InsufficientFunds { .. })
        ));
        assert!(f
            .store
            .query(&QueryFilter::all())
            .await
            .unwrap()
            .is_empty());
    }
}
