//! Ledger collaborator: funding transaction creation, broadcast and
//! confirmation queries.
//!
//! The engine never builds ledger-level structures beyond [`FundingTx`]; coin
//! selection and change belong to the ledger. [`memory::MemoryLedger`] is a
//! small in-process ledger for tests and local networks.

use async_trait::async_trait;

use smsg_core::{FundingTx, TxOutput, Txid};

use crate::error::Result;

/// The value-transfer ledger as seen by the messaging engine.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Build a transaction paying `outputs` from `account`, adding inputs
    /// and change as needed.
    ///
    /// Fails with `InsufficientFunds` if the account cannot cover the outputs.
    async fn create_funding(&self, account: &str, outputs: Vec<TxOutput>) -> Result<FundingTx>;

    /// Submit a transaction. Resubmitting a known transaction is a no-op.
    ///
    /// Fails with `NetworkRejected` if the ledger refuses it.
    async fn broadcast(&self, tx: &FundingTx) -> Result<Txid>;

    /// Number of confirmations, `Some(0)` while unconfirmed, `None` if unknown.
    async fn confirmations(&self, txid: &Txid) -> Result<Option<u32>>;

    /// Look up a transaction by id.
    async fn transaction(&self, txid: &Txid) -> Result<Option<FundingTx>>;
}

/// In-memory ledger.
pub mod memory {
    use super::*;

    use std::collections::{HashMap, HashSet};
    use std::sync::{Mutex, MutexGuard};

    use bytes::Bytes;
    use tracing::debug;

    use smsg_core::OutPoint;

    use crate::error::SmsgError;

    /// Script prefix for outputs owned by a ledger account.
    pub const ACCOUNT_SCRIPT_PREFIX: u8 = 0x51;

    /// Locking script for outputs owned by `account`.
    pub fn account_script(account: &str) -> Bytes {
        let mut script = Vec::with_capacity(1 + account.len());
        script.push(ACCOUNT_SCRIPT_PREFIX);
        script.extend_from_slice(account.as_bytes());
        Bytes::from(script)
    }

    fn script_owner(script: &[u8]) -> Option<String> {
        match script.split_first() {
            Some((&ACCOUNT_SCRIPT_PREFIX, rest)) => String::from_utf8(rest.to_vec()).ok(),
            _ => None,
        }
    }

    #[derive(Debug, Clone)]
    struct Coin {
        owner: Option<String>,
        amount: u64,
    }

    struct TxRecord {
        tx: FundingTx,
        height: Option<u64>,
        spent: Vec<(OutPoint, Coin)>,
    }

    #[derive(Default)]
    struct LedgerInner {
        utxos: HashMap<OutPoint, Coin>,
        txs: HashMap<Txid, TxRecord>,
        mempool: Vec<Txid>,
        height: u64,
        mint_counter: u32,
    }

    impl LedgerInner {
        fn accept(&mut self, tx: &FundingTx) -> Result<Txid> {
            let txid = tx.txid();
            if self.txs.contains_key(&txid) {
                return Ok(txid);
            }

            if tx.outputs.is_empty() {
                return Err(SmsgError::NetworkRejected(
                    "transaction has no outputs".into(),
                ));
            }

            let mut seen = HashSet::with_capacity(tx.inputs.len());
            let mut input_total = 0u64;
            for input in &tx.inputs {
                if !seen.insert(*input) {
                    return Err(SmsgError::NetworkRejected(format!(
                        "input {}:{} spent twice",
                        input.txid, input.index
                    )));
                }
                let coin = self.utxos.get(input).ok_or_else(|| {
                    SmsgError::NetworkRejected(format!(
                        "input {}:{} missing or already spent",
                        input.txid, input.index
                    ))
                })?;
                input_total = input_total.saturating_add(coin.amount);
            }

            if tx.total_output() > input_total {
                return Err(SmsgError::NetworkRejected(format!(
                    "outputs {} exceed inputs {}",
                    tx.total_output(),
                    input_total
                )));
            }

            self.insert(tx, txid, None);
            self.mempool.push(txid);
            Ok(txid)
        }

        fn insert(&mut self, tx: &FundingTx, txid: Txid, height: Option<u64>) {
            let spent = tx
                .inputs
                .iter()
                .filter_map(|input| self.utxos.remove(input).map(|coin| (*input, coin)))
                .collect();

            for (index, output) in tx.outputs.iter().enumerate() {
                if output.is_unspendable() {
                    continue;
                }
                self.utxos.insert(
                    OutPoint {
                        txid,
                        index: index as u32,
                    },
                    Coin {
                        owner: script_owner(&output.script),
                        amount: output.amount,
                    },
                );
            }

            self.txs.insert(
                txid,
                TxRecord {
                    tx: tx.clone(),
                    height,
                    spent,
                },
            );
        }

        fn mine(&mut self) -> u64 {
            self.height += 1;
            for txid in std::mem::take(&mut self.mempool) {
                if let Some(record) = self.txs.get_mut(&txid) {
                    record.height = Some(self.height);
                }
            }
            self.height
        }
    }

    /// A single-node in-memory ledger.
    ///
    /// Accepted transactions sit in the mempool until [`stake_block`](Self::stake_block)
    /// confirms them. Mempool outputs can be spent right away.
    #[derive(Default)]
    pub struct MemoryLedger {
        inner: Mutex<LedgerInner>,
    }

    impl MemoryLedger {
        /// Create an empty ledger.
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>> {
            self.inner
                .lock()
                .map_err(|e| SmsgError::LockPoisoned(e.to_string()))
        }

        /// Credit `amount` to `account` in a new block.
        pub fn fund(&self, account: &str, amount: u64) -> Result<OutPoint> {
            let mut inner = self.lock()?;
            let counter = inner.mint_counter;
            inner.mint_counter += 1;

            let tx = FundingTx::new(
                vec![OutPoint {
                    txid: Txid::from_bytes([0; 32]),
                    index: counter,
                }],
                vec![TxOutput {
                    amount,
                    script: account_script(account),
                }],
            );
            let txid = tx.txid();
            inner.insert(&tx, txid, None);
            inner.mempool.push(txid);
            let height = inner.mine();

            debug!(account, amount, height, "funded account");
            Ok(OutPoint { txid, index: 0 })
        }

        /// Spendable balance of `account`, mempool outputs included.
        pub fn balance(&self, account: &str) -> u64 {
            self.lock()
                .map(|inner| {
                    inner
                        .utxos
                        .values()
                        .filter(|coin| coin.owner.as_deref() == Some(account))
                        .map(|coin| coin.amount)
                        .sum()
                })
                .unwrap_or(0)
        }

        /// Confirm every mempool transaction in a new block. Returns the new height.
        pub fn stake_block(&self) -> Result<u64> {
            let mut inner = self.lock()?;
            let height = inner.mine();
            debug!(height, "staked block");
            Ok(height)
        }

        /// Current block height.
        pub fn height(&self) -> u64 {
            self.lock().map(|inner| inner.height).unwrap_or(0)
        }

        /// Drop an unconfirmed transaction, restoring the coins it spent.
        ///
        /// Returns false if the transaction is unknown or already confirmed.
        pub fn evict(&self, txid: &Txid) -> Result<bool> {
            let mut inner = self.lock()?;
            let Some(pos) = inner.mempool.iter().position(|t| t == txid) else {
                return Ok(false);
            };
            inner.mempool.remove(pos);

            let Some(record) = inner.txs.remove(txid) else {
                return Ok(false);
            };
            for index in 0..record.tx.outputs.len() {
                inner.utxos.remove(&OutPoint {
                    txid: *txid,
                    index: index as u32,
                });
            }
            inner.utxos.extend(record.spent);

            debug!(%txid, "evicted transaction");
            Ok(true)
        }
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn create_funding(
            &self,
            account: &str,
            outputs: Vec<TxOutput>,
        ) -> Result<FundingTx> {
            let inner = self.lock()?;
            let needed = outputs
                .iter()
                .fold(0u64, |acc, output| acc.saturating_add(output.amount));

            let mut coins: Vec<(&OutPoint, &Coin)> = inner
                .utxos
                .iter()
                .filter(|(_, coin)| coin.owner.as_deref() == Some(account))
                .collect();
            coins.sort_by(|(a_point, a), (b_point, b)| {
                b.amount
                    .cmp(&a.amount)
                    .then_with(|| a_point.txid.as_bytes().cmp(b_point.txid.as_bytes()))
                    .then_with(|| a_point.index.cmp(&b_point.index))
            });

            let mut inputs = Vec::new();
            let mut gathered = 0u64;
            for (point, coin) in coins {
                if gathered >= needed && !inputs.is_empty() {
                    break;
                }
                inputs.push(*point);
                gathered = gathered.saturating_add(coin.amount);
            }

            if gathered < needed || inputs.is_empty() {
                return Err(SmsgError::InsufficientFunds {
                    needed,
                    available: gathered,
                });
            }

            let mut outputs = outputs;
            let change = gathered - needed;
            if change > 0 {
                outputs.push(TxOutput {
                    amount: change,
                    script: account_script(account),
                });
            }

            Ok(FundingTx::new(inputs, outputs))
        }

        async fn broadcast(&self, tx: &FundingTx) -> Result<Txid> {
            let mut inner = self.lock()?;
            let txid = inner.accept(tx)?;
            debug!(%txid, "accepted transaction");
            Ok(txid)
        }

        async fn confirmations(&self, txid: &Txid) -> Result<Option<u32>> {
            let inner = self.lock()?;
            Ok(inner.txs.get(txid).map(|record| match record.height {
                Some(height) => u32::try_from(inner.height - height + 1).unwrap_or(u32::MAX),
                None => 0,
            }))
        }

        async fn transaction(&self, txid: &Txid) -> Result<Option<FundingTx>> {
            let inner = self.lock()?;
            Ok(inner.txs.get(txid).map(|record| record.tx.clone()))
        }
    }

}
