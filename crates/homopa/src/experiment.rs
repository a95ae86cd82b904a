//! One experiment run: every region worker plus the coordinator in a single
//! process.

use crate::config::RunConfig;
use crate::connections::RegionConnectionMap;
use crate::distributed::{
    BarrierError, Coordinator, CoordinatorOutcome, ReadinessBarrier, RegionWorker, WorkerError,
    WorkerReport,
};
use crate::io::{discover_region_ids, read_adjacency, EdgeAdjacency, LoadError, RegionFiles};
use crate::report::{LogColumns, ResultLog};
use homopa_core::{HomopaError, RegionId};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type WorkerHandle = JoinHandle<std::result::Result<WorkerReport, WorkerError>>;

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Configuration error: {0}")]
    Config(#[from] HomopaError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Barrier error: {0}")]
    Barrier(#[from] BarrierError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for experiment runs.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Regions the coordinator waited for.
    pub regions: Vec<RegionId>,
    /// Regions dropped before start because a file was missing.
    pub skipped: Vec<RegionId>,
    /// Regions whose worker failed.
    pub failed: Vec<RegionId>,
    pub workers: Vec<WorkerReport>,
    pub total_edges: usize,
    pub outcome: CoordinatorOutcome,
    pub elapsed_secs: f64,
}

impl RunReport {
    /// The final result: regions that found homopaths.
    #[must_use]
    pub fn regions_with_homopaths(&self) -> usize {
        self.outcome.regions_with_homopaths()
    }
}

/// Regions selected for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSelection {
    pub active: Vec<RegionFiles>,
    pub skipped: Vec<RegionId>,
}

/// Pick the regions of a run: explicit ids or those found in `data_dir`,
/// minus leftover partitions below `10^partition_depth`, minus regions with
/// a missing file.
pub fn select_regions(config: &RunConfig) -> Result<RegionSelection> {
    let ids = if config.regions.is_empty() {
        discover_region_ids(&config.data_dir)?
    } else {
        let mut ids = config.regions.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    };

    let min_id = config.min_region_id();
    let mut selection = RegionSelection::default();
    for region in ids.into_iter().filter(|&id| u64::from(id) >= min_id) {
        let files = RegionFiles::in_dir(&config.data_dir, region, config.mode);
        if let Some(missing) = files.missing() {
            warn!(region, file = %missing.display(), "input file missing, region skipped");
            selection.skipped.push(region);
            continue;
        }
        selection.active.push(files);
    }
    Ok(selection)
}

/// Run one experiment and write its result logs.
pub async fn run_experiment(config: RunConfig) -> Result<RunReport> {
    config.validate()?;
    let started = Instant::now();

    let selection = select_regions(&config)?;
    let regions: Vec<RegionId> = selection.active.iter().map(|f| f.region).collect();
    info!(
        regions = regions.len(),
        skipped = selection.skipped.len(),
        mode = %config.mode,
        threshold = config.threshold(),
        "starting experiment"
    );

    let log = ResultLog::new(&config.output_dir)?;

    let adjacencies: Vec<(RegionId, EdgeAdjacency)> = selection
        .active
        .iter()
        .filter_map(|files| match read_adjacency(&files.adjacency) {
            Ok(adjacency) => Some((files.region, adjacency)),
            Err(e) => {
                warn!(region = files.region, error = %e, "adjacency unreadable, no connections");
                None
            }
        })
        .collect();
    let total_edges = config
        .total_edges
        .unwrap_or_else(|| adjacencies.iter().map(|(_, a)| a.len()).sum());
    let connections = RegionConnectionMap::build(&adjacencies);
    log.record_connections(&connections)?;
    info!(links = connections.len(), "connection map built");

    let barrier = ReadinessBarrier::new(regions.iter().copied());
    let workers: Vec<(RegionId, WorkerHandle)> = selection
        .active
        .into_iter()
        .map(|files| {
            let region = files.region;
            let worker = RegionWorker::new(files, config.clone(), barrier.clone())
                .with_log(log.clone());
            (region, tokio::spawn(worker.run()))
        })
        .collect();

    let coordinator = Coordinator::new(config.clone(), connections, barrier);
    let outcome = match coordinator.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            for (_, handle) in &workers {
                handle.abort();
            }
            return Err(e.into());
        }
    };

    let (reports, failed) = join_workers(workers, config.rpc.request_timeout()).await;

    let columns = LogColumns {
        objects: outcome.global_objects as u64,
        threshold: config.threshold(),
        edges: total_edges,
        permutations: config.num_permutations,
        compression: config.compression_level,
    };
    log.record_coordinator(&columns, config.seed, &outcome)?;
    log.write_output(outcome.regions_with_homopaths())?;

    let report = RunReport {
        regions,
        skipped: selection.skipped,
        failed,
        workers: reports,
        total_edges,
        outcome,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    info!(
        result = report.regions_with_homopaths(),
        spanning = report.outcome.spanning.len(),
        failed = report.failed.len(),
        elapsed_secs = report.elapsed_secs,
        "experiment finished"
    );
    Ok(report)
}

/// Wait for every worker. Workers share one deadline `grace` from now; a
/// worker still serving then lost its terminate request and is aborted.
async fn join_workers(
    workers: Vec<(RegionId, WorkerHandle)>,
    grace: Duration,
) -> (Vec<WorkerReport>, Vec<RegionId>) {
    let mut reports = Vec::new();
    let mut failed = Vec::new();
    let deadline = tokio::time::Instant::now() + grace;

    for (region, mut handle) in workers {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(report))) => reports.push(report),
            Ok(Ok(Err(e))) => {
                warn!(region, error = %e, "worker failed");
                failed.push(region);
            }
            Ok(Err(e)) => {
                warn!(region, error = %e, "worker task panicked");
                failed.push(region);
            }
            Err(_) => {
                warn!(region, "worker never terminated, aborting");
                handle.abort();
                failed.push(region);
            }
        }
    }
    (reports, failed)
}
