//! # SMSG Testkit
//!
//! Testing utilities for SMSG.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fee values every implementation must reproduce exactly
//! - **Generators**: Proptest strategies for keys, envelopes and message text
//! - **Fixtures**: Multi-node networks sharing one in-memory ledger
//!
//! ## Golden Vectors
//!
//! ```rust
//! use smsg_core::FeeSchedule;
//! use smsg_testkit::vectors::verify_fee_vectors;
//!
//! for (name, matches, fee) in verify_fee_vectors(&FeeSchedule::V1) {
//!     assert!(matches, "{}: {}", name, fee);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use smsg_testkit::generators::{envelope_from_params, EnvelopeParams};
//!
//! proptest! {
//!     #[test]
//!     fn hash_is_deterministic(params: EnvelopeParams) {
//!         let e1 = envelope_from_params(&params);
//!         let e2 = envelope_from_params(&params);
//!         prop_assert_eq!(e1.compute_hash(), e2.compute_hash());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use smsg_testkit::fixtures::TestNetwork;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let net = TestNetwork::new();
//!     let alice = net.add_node("alice").await;
//!     let bob = net.add_node("bob").await;
//!
//!     let to = alice.receiving_address().await?;
//!     net.settle(&[&alice, &bob]).await?;
//!
//!     bob.send_free(bob.sending_address()?, to, "hi").await?;
//!     net.settle(&[&alice, &bob]).await?;
//!     assert_eq!(alice.inbox_texts().await?, vec!["hi"]);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{multi_node_network, TestNetwork, TestNode};
pub use generators::{envelope_from_params, EnvelopeParams};
pub use vectors::{all_fee_vectors, verify_fee_vectors, FeeVector};
