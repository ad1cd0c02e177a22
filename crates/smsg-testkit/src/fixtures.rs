//! Test fixtures and helpers.
//!
//! A [`TestNetwork`] is one shared ledger plus one in-memory network. Nodes
//! added to it get their own wallet, store and transport.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use rand::RngCore;

use smsg::ledger::memory::MemoryLedger;
use smsg::{Address, Engine, EngineConfig, LocalWallet, SendRequest};
use smsg_crypto::KdfParams;
use smsg_net::memory::MemoryNetwork;
use smsg_net::NodeId;
use smsg_store::{MemoryStore, SqliteStore, Store};

/// Upper bound on pump rounds in [`TestNetwork::settle`].
pub const MAX_SETTLE_ROUNDS: usize = 32;

/// One node: an engine and the wallet behind it.
pub struct TestNode<S: Store = MemoryStore> {
    pub name: String,
    pub engine: Engine<S>,
    pub wallet: Arc<LocalWallet>,
}

impl<S: Store> TestNode<S> {
    /// Derive a wallet address and enable it for receiving.
    pub async fn receiving_address(&self) -> Result<Address> {
        let address = self.wallet.new_address()?;
        self.engine.enable_receiving(&address).await?;
        Ok(address)
    }

    /// A fresh wallet address to send from.
    pub fn sending_address(&self) -> Result<Address> {
        Ok(self.wallet.new_address()?)
    }

    /// Send a free message.
    pub async fn send_free(&self, from: Address, to: Address, text: &str) -> Result<()> {
        self.engine.send(SendRequest::new(from, to, text)).await?;
        Ok(())
    }

    /// Texts of every decryptable inbox message, in arrival order.
    pub async fn inbox_texts(&self) -> Result<Vec<String>> {
        Ok(self
            .engine
            .inbox(smsg::Scope::All, None)
            .await?
            .into_iter()
            .filter_map(|item| item.as_message().map(|m| m.text.clone()))
            .collect())
    }
}

/// A shared ledger and network for multi-node tests.
pub struct TestNetwork {
    pub network: Arc<MemoryNetwork>,
    pub ledger: Arc<MemoryLedger>,
    pub config: EngineConfig,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            ledger: Arc::new(MemoryLedger::new()),
            config,
        }
    }

    /// Add a node with a random wallet seed and an in-memory store.
    pub async fn add_node(&self, name: &str) -> TestNode {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        self.add_node_with_seed(name, seed).await
    }

    /// Add a node with a deterministic wallet and an in-memory store.
    pub async fn add_node_with_seed(&self, name: &str, seed: [u8; 32]) -> TestNode {
        self.add_node_with_store(name, seed, MemoryStore::new()).await
    }

    /// Add a node persisting to SQLite at `path`.
    pub async fn add_sqlite_node(
        &self,
        name: &str,
        seed: [u8; 32],
        path: impl AsRef<Path>,
    ) -> Result<TestNode<SqliteStore>> {
        let store = SqliteStore::open(path)?;
        Ok(self.add_node_with_store(name, seed, store).await)
    }

    async fn add_node_with_store<S: Store>(
        &self,
        name: &str,
        seed: [u8; 32],
        store: S,
    ) -> TestNode<S> {
        let wallet = Arc::new(LocalWallet::new(name, seed).with_kdf_params(KdfParams::fast()));
        let transport = Arc::new(self.network.create_transport(NodeId::random()).await);
        let engine = Engine::new(
            store,
            wallet.clone(),
            self.ledger.clone(),
            transport,
            self.config.clone(),
        );
        TestNode {
            name: name.to_string(),
            engine,
            wallet,
        }
    }

    /// Credit a node's ledger account.
    pub fn fund<S: Store>(&self, node: &TestNode<S>, amount: u64) -> Result<()> {
        self.ledger.fund(&node.name, amount)?;
        Ok(())
    }

    /// Confirm the mempool and let every node follow up.
    pub async fn confirm(&self, nodes: &[&TestNode]) -> Result<usize> {
        self.ledger.stake_block()?;
        self.settle(nodes).await
    }

    /// Poll outboxes and pump transports until nothing is in flight.
    ///
    /// Returns the number of rounds that handled at least one message.
    pub async fn settle(&self, nodes: &[&TestNode]) -> Result<usize> {
        for round in 0..MAX_SETTLE_ROUNDS {
            let mut handled = 0;
            for node in nodes {
                handled += node.engine.poll_outbox().await?.sent.len();
                handled += node.engine.pump_network().await?;
            }
            if handled == 0 {
                return Ok(round);
            }
        }
        bail!("network did not settle after {} rounds", MAX_SETTLE_ROUNDS)
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic seed for the `index`-th party of a test.
pub fn party_seed(index: u8) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[0] = index;
    seed[31] = 0x5e;
    seed
}

/// Create `count` nodes with deterministic wallets.
pub async fn multi_node_network(count: usize) -> (TestNetwork, Vec<TestNode>) {
    let network = TestNetwork::new();
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("node-{}", i);
        nodes.push(network.add_node_with_seed(&name, party_seed(i as u8)).await);
    }
    (network, nodes)
}
