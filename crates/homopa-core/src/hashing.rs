//! Hashing functions.

/// Largest value a 32-bit MinHash slot can hold.
pub const MAX_HASH_32: u64 = (1 << 32) - 1;

/// Hash with seed for MinHash-style algorithms.
#[inline]
pub fn hash_with_seed(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(data, seed)
}

/// Hash with seed, folded into the 32-bit range used by signatures.
#[inline]
pub fn hash32_with_seed(data: &[u8], seed: u64) -> u32 {
    (hash_with_seed(data, seed) & MAX_HASH_32) as u32
}
