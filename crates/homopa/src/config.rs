//! Run configuration.
//!
//! Everything one experiment run needs, loadable from a JSON file and
//! overridable field by field from the command line.

use crate::minhash::DEFAULT_NUM_PERMUTATIONS;
use crate::observation::HashedIntersection;
use homopa_core::{HomopaError, ObservationMode, RegionId, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default homopath threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Default ceiling on engine rounds.
pub const DEFAULT_MAX_ROUNDS: usize = 100;

/// Default port of region 0; region `r` listens on `base_port + r`.
pub const DEFAULT_BASE_PORT: u16 = 5011;

/// Settings for the per-region homopath engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum intersection ratio for a path to qualify.
    pub threshold: f64,
    /// Hard ceiling on the number of rounds (path lengths) explored.
    pub max_rounds: usize,
    /// How hashed member sets are intersected.
    pub hashed_intersection: HashedIntersection,
    /// Also retire every shorter contiguous window of a new path, not just
    /// its prefix.
    pub retire_subpaths: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_rounds: DEFAULT_MAX_ROUNDS,
            hashed_intersection: HashedIntersection::default(),
            retire_subpaths: false,
        }
    }
}

impl EngineConfig {
    /// Set the threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the round ceiling.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Set the hashed intersection rule.
    pub fn with_hashed_intersection(mut self, rule: HashedIntersection) -> Self {
        self.hashed_intersection = rule;
        self
    }

    /// Retire all sub-windows of new paths.
    pub fn with_retire_subpaths(mut self, retire: bool) -> Self {
        self.retire_subpaths = retire;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(HomopaError::Config(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.max_rounds == 0 {
            return Err(HomopaError::Config("max_rounds must be positive".into()));
        }
        Ok(())
    }
}

/// Settings for the region RPC channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Interface every region binds and the coordinator dials.
    pub host: String,
    /// Port of region 0.
    pub base_port: u16,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout for one full request/response exchange in milliseconds.
    pub request_timeout_ms: u64,
    /// Compress frame bodies with zstd.
    pub compress_transfers: bool,
    /// Largest accepted frame body.
    pub max_frame_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: DEFAULT_BASE_PORT,
            connect_timeout_ms: 2_000,
            request_timeout_ms: 30_000,
            compress_transfers: false,
            max_frame_bytes: 256 * 1024 * 1024,
        }
    }
}

impl RpcConfig {
    /// Port a region listens on.
    pub fn port_for(&self, region: RegionId) -> Result<u16> {
        u16::try_from(u32::from(self.base_port) + region).map_err(|_| {
            HomopaError::Config(format!(
                "region {region} does not fit above base port {}",
                self.base_port
            ))
        })
    }

    /// `host:port` for a region.
    pub fn address_for(&self, region: RegionId) -> Result<String> {
        Ok(format!("{}:{}", self.host, self.port_for(region)?))
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration of one experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Raw object ids or MinHash signatures.
    pub mode: ObservationMode,
    /// Seed of the data-preparation stage, echoed into `seeds.txt`.
    pub seed: u64,
    /// Compression level of the data-preparation stage (log column).
    pub compression_level: u32,
    /// Signature length in hashed mode.
    pub num_permutations: usize,
    /// Number of simulated objects (log column).
    pub object_count: u64,
    /// Trace path length of the data-preparation stage (log column).
    pub path_length: u32,
    /// Regions with ids below `10^partition_depth` are ignored.
    pub partition_depth: u32,
    /// Explicit region ids; empty means discover from `data_dir`.
    pub regions: Vec<RegionId>,
    /// Directory holding the region input files.
    pub data_dir: PathBuf,
    /// Directory receiving result logs.
    pub output_dir: PathBuf,
    /// Edge total for log columns; defaults to the adjacency entries seen.
    pub total_edges: Option<usize>,
    /// Engine settings.
    pub engine: EngineConfig,
    /// RPC settings.
    pub rpc: RpcConfig,
    /// How long the coordinator waits for all regions; `None` waits forever.
    pub barrier_timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: ObservationMode::Raw,
            seed: 0,
            compression_level: 0,
            num_permutations: DEFAULT_NUM_PERMUTATIONS,
            object_count: 0,
            path_length: 0,
            partition_depth: 0,
            regions: Vec::new(),
            data_dir: PathBuf::from("."),
            output_dir: PathBuf::from("results"),
            total_edges: None,
            engine: EngineConfig::default(),
            rpc: RpcConfig::default(),
            barrier_timeout_secs: None,
        }
    }
}

impl RunConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| HomopaError::Config(format!("{}: {e}", path.display())))
    }

    pub fn with_mode(mut self, mode: ObservationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.engine.threshold = threshold;
        self
    }

    pub fn with_num_permutations(mut self, num_permutations: usize) -> Self {
        self.num_permutations = num_permutations;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_regions(mut self, regions: Vec<RegionId>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_partition_depth(mut self, depth: u32) -> Self {
        self.partition_depth = depth;
        self
    }

    pub fn with_base_port(mut self, port: u16) -> Self {
        self.rpc.base_port = port;
        self
    }

    pub fn with_barrier_timeout(mut self, secs: u64) -> Self {
        self.barrier_timeout_secs = Some(secs);
        self
    }

    /// Homopath threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.engine.threshold
    }

    /// Smallest region id kept by the partition-depth filter.
    #[must_use]
    pub fn min_region_id(&self) -> u64 {
        10u64.saturating_pow(self.partition_depth)
    }

    #[must_use]
    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_secs.map(Duration::from_secs)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.num_permutations == 0 {
            return Err(HomopaError::Config(
                "num_permutations must be positive".into(),
            ));
        }
        if self.rpc.max_frame_bytes == 0 {
            return Err(HomopaError::Config("max_frame_bytes must be positive".into()));
        }
        for &region in &self.regions {
            self.rpc.port_for(region)?;
        }
        Ok(())
    }
}
