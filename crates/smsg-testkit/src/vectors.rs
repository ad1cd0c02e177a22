//! Golden fee vectors.
//!
//! Senders and verifiers must agree on the fee to the base unit, so these
//! vectors pin the network-wide formula. Any implementation of the fee
//! schedule must reproduce every expected value exactly.

use serde::{Deserialize, Serialize};

use smsg_core::{format_amount, FeeSchedule};

/// A golden fee vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeVector {
    /// Human-readable name for the vector.
    pub name: String,
    /// Schedule version the vector applies to.
    pub schedule: u8,
    /// Envelope payload size in bytes.
    pub payload_size: usize,
    /// Retention periods.
    pub ttl_periods: u32,
    /// Expected fee in base units.
    pub expected_fee: u64,
    /// Expected fee as a coin amount.
    pub expected_amount: String,
}

fn vector(name: &str, payload_size: usize, ttl_periods: u32, expected_fee: u64) -> FeeVector {
    FeeVector {
        name: name.to_string(),
        schedule: 1,
        payload_size,
        ttl_periods,
        expected_fee,
        expected_amount: format_amount(expected_fee),
    }
}

/// Get all golden fee vectors.
pub fn all_fee_vectors() -> Vec<FeeVector> {
    vec![
        vector("short message kept four periods", 429, 4, 85_800),
        vector("one kilobyte for one period", 1_000, 1, 50_000),
        vector("rounds down per period", 999, 3, 149_850),
        vector("tiny envelope", 7, 1, 350),
        vector("maximum ttl", 20, 31, 31_000),
        vector("free size limit", 24_000, 2, 2_400_000),
        vector("empty payload", 0, 5, 0),
    ]
}

/// Check every vector against `schedule`.
///
/// Returns `(name, matches, computed_fee)` per vector.
pub fn verify_fee_vectors(schedule: &FeeSchedule) -> Vec<(String, bool, u64)> {
    all_fee_vectors()
        .iter()
        .filter(|v| v.schedule == schedule.version())
        .map(|v| {
            let fee = schedule.required_fee(v.payload_size, v.ttl_periods);
            (v.name.clone(), fee == v.expected_fee, fee)
        })
        .collect()
}

/// All vectors as pretty JSON, for other implementations to consume.
pub fn fee_vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&all_fee_vectors())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        let results = verify_fee_vectors(&FeeSchedule::V1);
        assert_eq!(results.len(), all_fee_vectors().len());
        for (name, matches, fee) in results {
            assert!(matches, "vector '{}' computed {}", name, fee);
        }
    }

    #[test]
    fn test_golden_amount_formatting() {
        let golden = &all_fee_vectors()[0];
        assert_eq!(golden.expected_fee, 85_800);
        assert_eq!(golden.expected_amount, "0.00085800");
    }

    #[test]
    fn test_json_roundtrip() {
        let json = fee_vectors_json().unwrap();
        let parsed: Vec<FeeVector> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, all_fee_vectors());
    }
}
