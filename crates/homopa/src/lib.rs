//! # homopa
//!
//! Distributed homopath discovery over partitioned sensor networks.
//!
//! A road network is split into regions. Every region knows which objects
//! were observed on each of its edges. A *homopath* is a walk of edges whose
//! shared objects still make up at least a threshold fraction of the
//! region's objects. Each region finds its own homopaths; a coordinator then
//! extends them across region boundaries.
//!
//! Observations are either raw object ids or MinHash signatures, in which
//! case the region total is a Cohen estimate.
//!
//! ## Quick Start
//!
//! ```rust
//! use homopa::{EngineConfig, HomopathEngine, Observation, RegionInput};
//! use homopa_core::ObservationMode;
//! use std::collections::BTreeSet;
//!
//! let objects: BTreeSet<u64> = (1..=4).collect();
//! let adjacency = [(1, vec![2]), (2, vec![])].into_iter().collect();
//! let observations = [
//!     (1, Observation::Raw(objects.clone())),
//!     (2, Observation::Raw(objects)),
//! ]
//! .into_iter()
//! .collect();
//!
//! let input = RegionInput::from_parts(10, ObservationMode::Raw, adjacency, observations).unwrap();
//! let table = HomopathEngine::new(EngineConfig::default()).discover(&input);
//! assert_eq!(table.max_length(), 2);
//! ```
//!
//! ## Modules
//!
//! - [`engine`] - Per-region homopath discovery
//! - [`distributed`] - Region workers, coordinator, barrier and transport
//! - [`experiment`] - One full run in a single process
//! - [`io`] - Region input files
//! - [`report`] - Append-only result logs and cost accounting

pub mod cohen;
pub mod config;
pub mod connections;
pub mod distributed;
pub mod engine;
pub mod experiment;
pub mod io;
pub mod minhash;
pub mod observation;
pub mod report;

// Re-export main types
pub use cohen::estimate_cardinality;
pub use config::{EngineConfig, RpcConfig, RunConfig};
pub use connections::RegionConnectionMap;
pub use engine::{HomopathEngine, HomopathListing, HomopathTable, PathRecord};
pub use experiment::{run_experiment, ExperimentError, RunReport};
pub use io::{
    discover_region_ids, read_adjacency, read_observations, write_hashed_observations,
    EdgeAdjacency, LoadError, RegionFiles, RegionInput,
};
pub use minhash::{MinHashSignature, MinHasher};
pub use observation::{HashedIntersection, Members, Observation};
pub use report::{CostLedger, ResultLog};

pub use homopa_core::{EdgeId, EdgePath, HomopaError, ObjectId, ObservationMode, RegionId};
