//! # SMSG Core
//!
//! Pure primitives for the paid secure messaging engine: envelopes,
//! addresses, fee computation and funding commitments.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over the data structures that travel between nodes and onto the ledger.
//!
//! ## Key Types
//!
//! - [`Envelope`] - The wire/storage unit: one encrypted message plus metadata
//! - [`MessageHash`] - Content-addressed identifier (Blake3 over header and ciphertext)
//! - [`Address`] - Base58check encoding of a messaging key's hash
//! - [`FeeSchedule`] - The versioned network-wide fee formula
//! - [`FundingTx`] - A ledger transaction carrying a funding commitment
//!
//! ## Canonicalization
//!
//! Envelope headers and funding transactions are hashed over deterministic
//! CBOR. See [`canonical`] module.

pub mod address;
pub mod canonical;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod fee;
pub mod funding;
pub mod limits;
pub mod types;
pub mod validation;
pub mod wif;

pub use address::{Address, KeyId, RecipientTag, ADDRESS_VERSION};
pub use canonical::{canonical_header_bytes, canonical_tx_bytes};
pub use crypto::{Blake3Hash, PublicKey};
pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeHeader, ENVELOPE_VERSION};
pub use error::{CoreError, ValidationError};
pub use fee::{format_amount, required_fee, FeeSchedule, COIN};
pub use funding::{
    build_funding_commitment, check_funding, verify_funding, FundingCheck, FundingTx, OutPoint,
    TxOutput,
};
pub use types::{MessageHash, Txid};
pub use validation::validate_envelope;
pub use wif::{decode_wif, encode_wif, SECRET_VERSION};
