//! # homopa-core
//!
//! Shared foundations for homopath discovery.
//!
//! Provides:
//! - Identifier types for edges, objects and regions
//! - The observation mode switch (raw object ids vs. MinHash signatures)
//! - Seeded hashing used by the MinHash signer
//! - Frame compression for the region RPC channel
//! - The common error type

pub mod compression;
pub mod error;
pub mod hashing;
pub mod types;

pub use compression::{Compressor, ZstdCompressor};
pub use error::{HomopaError, Result};
pub use hashing::hash_with_seed;
pub use types::{format_path, EdgeId, EdgePath, ObjectId, ObservationMode, RegionId};
