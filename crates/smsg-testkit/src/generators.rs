//! Proptest generators for property-based testing.

use proptest::prelude::*;

use smsg_core::limits::{MAX_FREE_ENVELOPE_BYTES, MAX_TTL_PERIODS, MIN_TTL_PERIODS};
use smsg_core::{Address, Envelope, EnvelopeBuilder, MessageHash, PublicKey, Txid};
use smsg_crypto::SecretKey;

/// Generate a random messaging secret key.
pub fn secret_key() -> impl Strategy<Value = SecretKey> {
    any::<[u8; 32]>().prop_map(SecretKey::from_bytes)
}

/// Generate a public key that belongs to some secret key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    secret_key().prop_map(|secret| secret.public_key())
}

/// Generate a valid address.
pub fn address() -> impl Strategy<Value = Address> {
    public_key().prop_map(|pk| Address::from_public_key(&pk))
}

/// Generate a random MessageHash.
pub fn message_hash() -> impl Strategy<Value = MessageHash> {
    any::<[u8; 32]>().prop_map(MessageHash::from_bytes)
}

/// Generate a random Txid.
pub fn txid() -> impl Strategy<Value = Txid> {
    any::<[u8; 32]>().prop_map(Txid::from_bytes)
}

/// Generate a ttl within the accepted range.
pub fn ttl_periods() -> impl Strategy<Value = u32> {
    MIN_TTL_PERIODS..=MAX_TTL_PERIODS
}

/// Generate a payload size within the free envelope limit.
pub fn payload_size() -> impl Strategy<Value = usize> {
    0..=MAX_FREE_ENVELOPE_BYTES
}

/// Generate message text, including non-ASCII characters.
pub fn message_text(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..=max_len).prop_map(|chars| chars.into_iter().collect())
}

/// Generate a reasonable timestamp (Unix seconds).
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_000_000_000i64
}

/// Parameters for generating an envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeParams {
    pub recipient: Address,
    pub sender: Option<Address>,
    pub timestamp: i64,
    pub ttl_periods: u32,
    pub ciphertext: Vec<u8>,
    pub funding: Option<Txid>,
}

impl Arbitrary for EnvelopeParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            address(),
            prop::option::of(address()),
            timestamp(),
            ttl_periods(),
            prop::collection::vec(any::<u8>(), 1..=512),
            prop::option::of(txid()),
        )
            .prop_map(
                |(recipient, sender, timestamp, ttl_periods, ciphertext, funding)| {
                    EnvelopeParams {
                        recipient,
                        sender,
                        timestamp,
                        ttl_periods,
                        ciphertext,
                        funding,
                    }
                },
            )
            .boxed()
    }
}

/// Build an envelope from parameters. Paid exactly when funding is present.
pub fn envelope_from_params(params: &EnvelopeParams) -> Envelope {
    let mut builder = EnvelopeBuilder::new(&params.recipient, params.ciphertext.clone())
        .timestamp(params.timestamp)
        .ttl_periods(params.ttl_periods)
        .paid(params.funding.is_some());

    if let Some(sender) = params.sender {
        builder = builder.sender(sender);
    }

    let envelope = builder.build();
    match params.funding {
        Some(txid) => envelope.with_funding(txid),
        None => envelope,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smsg_core::{
        build_funding_commitment, validate_envelope, verify_funding, FeeSchedule, FundingTx,
    };
    use smsg_crypto::{open, seal, MessageBody, SenderKey};

    proptest! {
        #[test]
        fn test_hash_deterministic(params: EnvelopeParams) {
            let e1 = envelope_from_params(&params);
            let e2 = envelope_from_params(&params);
            prop_assert_eq!(e1.compute_hash(), e2.compute_hash());
        }

        #[test]
        fn test_funding_excluded_from_hash(params: EnvelopeParams, other in txid()) {
            let envelope = envelope_from_params(&params);
            let refunded = envelope.clone().with_funding(other);
            prop_assert_eq!(envelope.compute_hash(), refunded.compute_hash());
        }

        #[test]
        fn test_generated_envelopes_validate(params: EnvelopeParams) {
            let envelope = envelope_from_params(&params);
            prop_assert_eq!(validate_envelope(&envelope, MAX_TTL_PERIODS), Ok(()));
        }

        #[test]
        fn test_fee_monotonic(
            size in payload_size(),
            extra in 0usize..10_000,
            ttl in ttl_periods(),
        ) {
            let schedule = FeeSchedule::default();
            prop_assert!(schedule.required_fee(size, ttl) <= schedule.required_fee(size + extra, ttl));
            if ttl < MAX_TTL_PERIODS {
                prop_assert!(schedule.required_fee(size, ttl) <= schedule.required_fee(size, ttl + 1));
            }
        }

        #[test]
        fn test_exact_fee_verifies(params: EnvelopeParams, shortfall in 1u64..1_000) {
            let envelope = envelope_from_params(&params);
            let schedule = FeeSchedule::default();
            let hash = envelope.compute_hash();
            let required = schedule.required_fee(envelope.payload_size(), envelope.ttl_periods());

            let exact = FundingTx::new(vec![], vec![build_funding_commitment(&hash, required)]);
            let paid = envelope.clone().with_funding(exact.txid());
            prop_assert!(verify_funding(&paid, &exact, &schedule));

            let short = FundingTx::new(
                vec![],
                vec![build_funding_commitment(&hash, required.saturating_sub(shortfall))],
            );
            let underpaid = envelope.with_funding(short.txid());
            prop_assert_eq!(verify_funding(&underpaid, &short, &schedule), required == 0);
        }

        #[test]
        fn test_seal_roundtrip(
            sender in secret_key(),
            recipient in secret_key(),
            text in message_text(64),
        ) {
            let body = MessageBody { from: Some(sender.address()), text };
            let sealed = seal(SenderKey::Static(&sender), &recipient.public_key(), &body).unwrap();
            let opened = open(Some(&recipient), &sealed).unwrap();
            prop_assert_eq!(opened.body, body);
            prop_assert_eq!(opened.sender_public, sender.public_key());
        }
    }
}
