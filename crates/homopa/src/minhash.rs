//! MinHash signature generation for per-edge object sets.
//!
//! Sensors that cannot afford to ship raw object ids send a fixed-length
//! signature instead: for every permutation, the minimum 32-bit hash over
//! the objects seen on the edge.

use homopa_core::hashing::hash32_with_seed;
use homopa_core::ObjectId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default number of permutations for MinHash signatures.
pub const DEFAULT_NUM_PERMUTATIONS: usize = 128;

/// MinHash signature - a compact representation of an edge's object set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinHashSignature {
    /// The minimum hash values for each permutation.
    pub values: Vec<u32>,
}

impl MinHashSignature {
    /// Create a new signature with the given values.
    #[must_use]
    pub fn new(values: Vec<u32>) -> Self {
        Self { values }
    }

    /// Get the number of permutations in this signature.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the signature is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AsRef<[u32]> for MinHashSignature {
    fn as_ref(&self) -> &[u32] {
        &self.values
    }
}

/// MinHash signature generator.
///
/// Uses multiple hash functions (simulated via seeds) to generate
/// compact signatures whose per-slot minima feed the Cohen estimator.
pub struct MinHasher {
    /// Number of hash permutations.
    num_permutations: usize,
    /// Seeds for each hash permutation.
    seeds: Vec<u64>,
}

impl MinHasher {
    /// Create a new MinHasher with the specified number of permutations.
    ///
    /// Uses a fixed seed for reproducibility.
    #[must_use]
    pub fn new(num_permutations: usize) -> Self {
        Self::with_seed(num_permutations, 42)
    }

    /// Create a new MinHasher with a specific random seed.
    #[must_use]
    pub fn with_seed(num_permutations: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let seeds: Vec<u64> = (0..num_permutations).map(|_| rng.gen()).collect();

        Self {
            num_permutations,
            seeds,
        }
    }

    /// Get the number of permutations.
    #[must_use]
    pub fn num_permutations(&self) -> usize {
        self.num_permutations
    }

    /// Generate a MinHash signature from a set of object ids.
    ///
    /// Each object id is hashed with each seed, and the minimum
    /// hash value is kept for each permutation.
    #[must_use]
    pub fn signature<'a, I>(&self, objects: I) -> MinHashSignature
    where
        I: IntoIterator<Item = &'a ObjectId>,
    {
        let mut min_hashes = vec![u32::MAX; self.num_permutations];

        for &object in objects {
            let object_bytes = object.to_le_bytes();
            for (slot, &seed) in min_hashes.iter_mut().zip(self.seeds.iter()) {
                *slot = (*slot).min(hash32_with_seed(&object_bytes, seed));
            }
        }

        MinHashSignature::new(min_hashes)
    }
}

impl Default for MinHasher {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_PERMUTATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_signature_length() {
        for num_perms in [2, 64, 128, 256] {
            let hasher = MinHasher::new(num_perms);
            let sig = hasher.signature(&[1u64, 2, 3]);
            assert_eq!(sig.len(), num_perms);
        }
    }

    #[test]
    fn test_empty_set_yields_max_slots() {
        let hasher = MinHasher::new(16);
        let empty: BTreeSet<ObjectId> = BTreeSet::new();
        let sig = hasher.signature(&empty);

        assert!(sig.values.iter().all(|&v| v == u32::MAX));
    }

    #[test]
    fn test_reproducibility() {
        let objects: Vec<ObjectId> = (1..=50).collect();
        let sig1 = MinHasher::with_seed(128, 12345).signature(&objects);
        let sig2 = MinHasher::with_seed(128, 12345).signature(&objects);
        let sig3 = MinHasher::with_seed(128, 54321).signature(&objects);

        assert_eq!(sig1, sig2, "Same seed should produce same signature");
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn test_order_independent() {
        let hasher = MinHasher::new(32);
        let forward: Vec<ObjectId> = (1..=20).collect();
        let backward: Vec<ObjectId> = (1..=20).rev().collect();

        assert_eq!(hasher.signature(&forward), hasher.signature(&backward));
    }

    #[test]
    fn test_superset_never_raises_a_slot() {
        let hasher = MinHasher::new(64);
        let small: Vec<ObjectId> = (1..=10).collect();
        let large: Vec<ObjectId> = (1..=40).collect();

        let sig_small = hasher.signature(&small);
        let sig_large = hasher.signature(&large);

        for (s, l) in sig_small.values.iter().zip(sig_large.values.iter()) {
            assert!(l <= s);
        }
    }
}
