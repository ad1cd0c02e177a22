//! Funding commitments and the transactions that carry them.
//!
//! A paid message is funded by a ledger transaction with an unspendable
//! output whose script embeds the message hash:
//!
//! ```text
//! OP_RETURN(0x6a) || "SMSG" || version(0x01) || message_hash(32)
//! ```
//!
//! The output amount is the fee. Verification never errors: any mismatch is
//! reported as a [`FundingCheck`] failure and the caller decides how to treat
//! the message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_tx_bytes;
use crate::crypto::Blake3Hash;
use crate::envelope::Envelope;
use crate::fee::FeeSchedule;
use crate::types::{MessageHash, Txid};

/// Script opcode marking an output as provably unspendable.
pub const OP_RETURN: u8 = 0x6a;

/// Marker following `OP_RETURN` in a funding commitment.
pub const COMMITMENT_MAGIC: &[u8; 4] = b"SMSG";

/// Commitment layout version.
pub const COMMITMENT_VERSION: u8 = 1;

/// Length of a commitment script.
pub const COMMITMENT_SCRIPT_LEN: usize = 1 + 4 + 1 + 32;

/// Current transaction format version.
pub const TX_VERSION: u8 = 1;

/// Reference to a previous transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub index: u32,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in base units.
    pub amount: u64,
    /// Locking script.
    pub script: Bytes,
}

impl TxOutput {
    /// Whether this output can never be spent.
    pub fn is_unspendable(&self) -> bool {
        self.script.first() == Some(&OP_RETURN)
    }

    /// The message hash this output commits to, if it is a funding commitment.
    pub fn commitment(&self) -> Option<MessageHash> {
        let script = &self.script;
        if script.len() != COMMITMENT_SCRIPT_LEN
            || script[0] != OP_RETURN
            || &script[1..5] != COMMITMENT_MAGIC
            || script[5] != COMMITMENT_VERSION
        {
            return None;
        }
        MessageHash::try_from(&script[6..]).ok()
    }
}

/// Build the unspendable output funding `message_hash` with `fee`.
pub fn build_funding_commitment(message_hash: &MessageHash, fee: u64) -> TxOutput {
    let mut script = Vec::with_capacity(COMMITMENT_SCRIPT_LEN);
    script.push(OP_RETURN);
    script.extend_from_slice(COMMITMENT_MAGIC);
    script.push(COMMITMENT_VERSION);
    script.extend_from_slice(message_hash.as_bytes());

    TxOutput {
        amount: fee,
        script: Bytes::from(script),
    }
}

/// A ledger transaction carrying one or more funding commitments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingTx {
    pub version: u8,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOutput>,
}

impl FundingTx {
    /// Create a transaction from inputs and outputs.
    pub fn new(inputs: Vec<OutPoint>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
        }
    }

    /// Transaction id: Blake3 of the canonical encoding.
    pub fn txid(&self) -> Txid {
        Txid(Blake3Hash::hash(&canonical_tx_bytes(self)).0)
    }

    /// The commitment output for `message_hash`, if any.
    pub fn commitment_for(&self, message_hash: &MessageHash) -> Option<&TxOutput> {
        self.outputs
            .iter()
            .find(|output| output.commitment().as_ref() == Some(message_hash))
    }

    /// Sum of all output amounts.
    pub fn total_output(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, output| acc.saturating_add(output.amount))
    }
}

/// Outcome of checking an envelope against its funding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingCheck {
    /// Commitment present and sufficient.
    Funded { required: u64, paid: u64 },
    /// The envelope names a different transaction.
    TxidMismatch,
    /// No output commits to the envelope hash.
    MissingCommitment,
    /// The commitment pays less than the required fee.
    Underfunded { required: u64, paid: u64 },
}

impl FundingCheck {
    /// Whether the envelope is funded.
    pub fn is_funded(&self) -> bool {
        matches!(self, FundingCheck::Funded { .. })
    }
}

/// Check an envelope against a funding transaction.
pub fn check_funding(
    envelope: &Envelope,
    funding_tx: &FundingTx,
    schedule: &FeeSchedule,
) -> FundingCheck {
    if let Some(txid) = envelope.funding_txid {
        if txid != funding_tx.txid() {
            return FundingCheck::TxidMismatch;
        }
    }

    let hash = envelope.compute_hash();
    let Some(output) = funding_tx.commitment_for(&hash) else {
        return FundingCheck::MissingCommitment;
    };

    let required = schedule.required_fee(envelope.payload_size(), envelope.ttl_periods());
    if output.amount < required {
        return FundingCheck::Underfunded {
            required,
            paid: output.amount,
        };
    }

    FundingCheck::Funded {
        required,
        paid: output.amount,
    }
}

/// Whether `funding_tx` pays at least the required fee for `envelope`.
pub fn verify_funding(envelope: &Envelope, funding_tx: &FundingTx, schedule: &FeeSchedule) -> bool {
    check_funding(envelope, funding_tx, schedule).is_funded()
}
