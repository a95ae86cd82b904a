//! Cohen cardinality estimator over MinHash signatures.
//!
//! Given signatures of one or more sets, the per-slot minimum across all
//! signatures is the signature of their union. Each normalized minimum is
//! roughly `1 / (n + 1)` for a union of `n` objects, so
//! `k / Σ(min_i / 2^32) - 1` estimates `n`.

use homopa_core::hashing::MAX_HASH_32;
use homopa_core::{HomopaError, Result};

/// Estimate the size of the union of the sets behind `signatures`.
///
/// Fails on an empty collection, on signatures of differing lengths, and
/// when every slot minimum is zero.
pub fn estimate_cardinality<S: AsRef<[u32]>>(
    signatures: &[S],
    num_permutations: usize,
) -> Result<u64> {
    let first = signatures
        .first()
        .ok_or_else(|| HomopaError::Estimator("no signatures supplied".into()))?
        .as_ref();
    if first.is_empty() {
        return Err(HomopaError::Estimator("signature has no slots".into()));
    }

    let mut minima: Vec<u32> = first.to_vec();
    for signature in &signatures[1..] {
        let signature = signature.as_ref();
        if signature.len() != minima.len() {
            return Err(HomopaError::Estimator(format!(
                "signature length mismatch: expected {}, got {}",
                minima.len(),
                signature.len()
            )));
        }
        for (slot, &value) in minima.iter_mut().zip(signature) {
            *slot = (*slot).min(value);
        }
    }

    let total: f64 = minima.iter().map(|&v| f64::from(v)).sum();
    if total <= 0.0 {
        return Err(HomopaError::Estimator("all slot minima are zero".into()));
    }

    let estimate = num_permutations as f64 / (total / MAX_HASH_32 as f64) - 1.0;
    Ok(estimate.round().max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHasher;
    use homopa_core::ObjectId;

    #[test]
    fn test_empty_collection_fails() {
        let signatures: Vec<Vec<u32>> = Vec::new();
        assert!(estimate_cardinality(&signatures, 128).is_err());
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let signatures = vec![vec![1u32, 2, 3], vec![1u32, 2]];
        let err = estimate_cardinality(&signatures, 3).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn test_identical_signatures_estimate_true_size() {
        let true_size = 1000u64;
        let objects: Vec<ObjectId> = (1..=true_size).collect();
        let mut estimates = Vec::new();

        for seed in 1..=5u64 {
            let hasher = MinHasher::with_seed(128, seed);
            let sig = hasher.signature(&objects);
            let signatures = vec![sig.clone(), sig.clone(), sig];

            let estimate = estimate_cardinality(&signatures, 128).unwrap();
            let relative = (estimate as f64 - true_size as f64).abs() / true_size as f64;
            assert!(
                relative < 0.35,
                "seed {seed}: estimate {estimate} too far from {true_size}"
            );
            estimates.push(estimate as f64);
        }

        let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
        assert!((mean - true_size as f64).abs() / (true_size as f64) < 0.15);
    }

    #[test]
    fn test_union_of_disjoint_sets() {
        let hasher = MinHasher::with_seed(256, 7);
        let left: Vec<ObjectId> = (1..=500).collect();
        let right: Vec<ObjectId> = (501..=1000).collect();

        let signatures = vec![hasher.signature(&left), hasher.signature(&right)];
        let estimate = estimate_cardinality(&signatures, 256).unwrap() as f64;

        assert!((estimate - 1000.0).abs() / 1000.0 < 0.3, "estimate {estimate}");
    }
}
