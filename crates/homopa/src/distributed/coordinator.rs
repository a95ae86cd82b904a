//! Coordinator ("top leader").
//!
//! Waits for every region at the barrier, pulls each region's homopath table
//! and object listing, then stitches homopaths across region boundaries:
//! a homopath `p1` ending in region A is extended edge by edge with a
//! homopath `p2` of region B whenever the connection map links `p1`'s last
//! edge to `p2`'s first edge and the running intersection still meets the
//! threshold.

use super::barrier::{BarrierError, ReadinessBarrier, ReadinessState, WorkerStatus};
use super::transport::RegionClient;
use crate::config::RunConfig;
use crate::connections::RegionConnectionMap;
use crate::engine::HomopathListing;
use crate::observation::{HashedIntersection, Members};
use crate::report::CostLedger;
use homopa_core::{EdgeId, EdgePath, ObservationMode, RegionId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A homopath continued from region `from` into region `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanningHomopath {
    pub from: RegionId,
    pub to: RegionId,
    /// `p1` followed by the appended prefix of `p2`.
    pub edges: EdgePath,
    /// How many edges of `p2` were appended.
    pub appended: usize,
    /// Members surviving the whole path.
    pub object_count: usize,
}

/// A path owned by a single region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RegionPath {
    pub region: RegionId,
    pub edges: EdgePath,
}

/// What the coordinator learned about one region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionSummary {
    pub region: RegionId,
    pub status: WorkerStatus,
    /// Live homopaths, shortest first.
    pub homopaths: Vec<EdgePath>,
    pub distinct_objects: usize,
    pub observation_integers: Option<u64>,
}

/// Result of one coordinator run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorOutcome {
    /// Ready regions when the barrier released.
    pub ready_count: usize,
    pub regions: Vec<RegionSummary>,
    pub spanning: Vec<SpanningHomopath>,
    /// Homopaths paired with a region they have no link into.
    pub same_region: Vec<RegionPath>,
    /// Remainders of `p2` that were not appended.
    pub unspanned: Vec<RegionPath>,
    /// Distinct objects over all regions.
    pub global_objects: usize,
    pub costs: CostLedger,
    pub elapsed_secs: f64,
}

impl CoordinatorOutcome {
    /// The run's headline number.
    #[must_use]
    pub fn regions_with_homopaths(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| r.status.has_homopaths())
            .count()
    }

    /// Homopaths reported by all regions.
    #[must_use]
    pub fn total_homopaths(&self) -> usize {
        self.regions.iter().map(|r| r.homopaths.len()).sum()
    }

    /// Every edge on some region homopath.
    #[must_use]
    pub fn distinct_edges(&self) -> BTreeSet<EdgeId> {
        self.regions
            .iter()
            .flat_map(|r| r.homopaths.iter().flatten().copied())
            .collect()
    }
}

/// Outcome of extending one `p1` with one `p2`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Extension {
    members: Members,
    appended: Vec<EdgeId>,
}

impl Extension {
    fn new(members: Members) -> Self {
        Self {
            members,
            appended: Vec::new(),
        }
    }

    /// Try to append `edge`. On failure nothing changes.
    fn step(
        &mut self,
        edge: EdgeId,
        edge_members: &Members,
        rule: HashedIntersection,
        denominator: usize,
        threshold: f64,
    ) -> bool {
        let candidate = self.members.intersect(edge_members, rule);
        if ratio(candidate.len(), denominator) < threshold {
            return false;
        }
        self.members = candidate;
        self.appended.push(edge);
        true
    }
}

fn ratio(count: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        count as f64 / denominator as f64
    }
}

/// Listing shape measured for transfer cost.
fn listing_payload(listing: &HomopathListing) -> BTreeMap<usize, Vec<(&EdgePath, Vec<u64>)>> {
    listing
        .iter()
        .map(|(len, entries)| {
            let entries = entries
                .iter()
                .map(|(path, members)| (path, members.values()))
                .collect();
            (*len, entries)
        })
        .collect()
}

/// Everything the collection phase gathered.
#[derive(Debug, Default)]
struct Collected {
    tables: BTreeMap<RegionId, HomopathListing>,
    objects: BTreeMap<RegionId, BTreeSet<u64>>,
    to_terminate: Vec<RegionId>,
}

/// Drives the collection and spanning phases.
pub struct Coordinator {
    config: RunConfig,
    connections: RegionConnectionMap,
    barrier: ReadinessBarrier,
    client: RegionClient,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        config: RunConfig,
        connections: RegionConnectionMap,
        barrier: ReadinessBarrier,
    ) -> Self {
        let client = RegionClient::new(config.rpc.clone());
        Self {
            config,
            connections,
            barrier,
            client,
        }
    }

    /// Run all phases. Only the barrier can fail; RPC failures count as
    /// "no data".
    pub async fn run(&self) -> Result<CoordinatorOutcome, BarrierError> {
        let started = Instant::now();
        let state = match self.config.barrier_timeout() {
            Some(timeout) => self.barrier.wait_timeout(timeout).await?,
            None => self.barrier.wait().await,
        };
        info!(
            ready = state.ready_count(),
            with_homopaths = state.with_homopaths().len(),
            without_homopaths = ?state.without_homopaths(),
            "all regions settled"
        );

        let mut outcome = CoordinatorOutcome {
            ready_count: state.ready_count(),
            ..CoordinatorOutcome::default()
        };

        let collected = self.collect(&state, &mut outcome).await;
        if collected.tables.len() >= 2 {
            self.span(&collected, &mut outcome).await;
        } else {
            info!(
                regions = collected.tables.len(),
                "fewer than two regions with homopaths, no spanning phase"
            );
        }

        for &region in &collected.to_terminate {
            self.terminate(region).await;
        }

        outcome.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            regions_with_homopaths = outcome.regions_with_homopaths(),
            spanning = outcome.spanning.len(),
            transfer_bytes = outcome.costs.transfer_bytes,
            "coordinator finished"
        );
        Ok(outcome)
    }

    async fn collect(&self, state: &ReadinessState, outcome: &mut CoordinatorOutcome) -> Collected {
        let raw = !self.config.mode.is_hashed();
        let mut collected = Collected::default();
        let mut union = BTreeSet::new();

        for region in state.expected() {
            let Some(status) = state.status(region) else { continue };
            match status {
                WorkerStatus::ReadyWithHomopaths => {
                    let table = match self.client.homopath_table(region).await {
                        Ok(table) => {
                            let payload = table.as_ref().map(listing_payload);
                            outcome.costs.record_transfer(&payload);
                            table
                        }
                        Err(e) => {
                            warn!(region, code = 3, error = %e, "table request failed");
                            None
                        }
                    };

                    let objects = self.fetch_objects(region).await;
                    if raw {
                        outcome.costs.record_transfer(&objects);
                    }

                    let integers = match self.client.observation_integers(region).await {
                        Ok(count) => {
                            outcome.costs.record_first_level(count);
                            Some(count)
                        }
                        Err(e) => {
                            warn!(region, code = 5, error = %e, "integer count request failed");
                            None
                        }
                    };

                    let homopaths = table
                        .iter()
                        .flat_map(|listing| listing.values().flatten())
                        .map(|(path, _)| path.clone())
                        .collect();
                    outcome.regions.push(RegionSummary {
                        region,
                        status,
                        homopaths,
                        distinct_objects: objects.len(),
                        observation_integers: integers,
                    });

                    union.extend(objects.iter().copied());
                    if raw {
                        collected.objects.insert(region, objects.into_iter().collect());
                    }
                    if let Some(listing) = table {
                        collected.tables.insert(region, listing);
                    }
                    collected.to_terminate.push(region);
                }
                WorkerStatus::ReadyWithoutHomopaths => {
                    let objects = self.fetch_objects(region).await;
                    outcome.regions.push(RegionSummary {
                        region,
                        status,
                        homopaths: Vec::new(),
                        distinct_objects: objects.len(),
                        observation_integers: None,
                    });
                    union.extend(objects);
                    self.terminate(region).await;
                }
                WorkerStatus::Pending => {
                    warn!(region, "region still pending after barrier");
                }
            }
        }

        outcome.global_objects = union.len();
        collected
    }

    async fn span(&self, collected: &Collected, outcome: &mut CoordinatorOutcome) {
        let threshold = self.config.threshold();
        let mut spanning_seen = HashSet::new();
        let mut same_region = BTreeSet::new();
        let mut unspanned = BTreeSet::new();

        for (&a, listing_a) in &collected.tables {
            for (&b, listing_b) in &collected.tables {
                if a == b {
                    continue;
                }
                let denominator = match self.config.mode {
                    ObservationMode::Raw => match (collected.objects.get(&a), collected.objects.get(&b)) {
                        (Some(oa), Some(ob)) => oa.intersection(ob).count(),
                        _ => 0,
                    },
                    ObservationMode::Hashed => self.config.num_permutations,
                };

                for (p1, _) in listing_a.values().flatten() {
                    let Some(&last) = p1.last() else { continue };
                    for (p2, _) in listing_b.values().flatten() {
                        let Some(&first) = p2.first() else { continue };
                        if !self.connections.connects(a, last, b, first) {
                            same_region.insert(RegionPath {
                                region: a,
                                edges: p1.clone(),
                            });
                            continue;
                        }

                        let Some(extension) = self
                            .extend(a, p1, b, p2, denominator, threshold, &mut outcome.costs)
                            .await
                        else {
                            continue;
                        };

                        let appended = extension.appended.len();
                        if appended < p2.len() {
                            unspanned.insert(RegionPath {
                                region: b,
                                edges: p2[appended..].to_vec(),
                            });
                        }
                        if appended == 0 {
                            continue;
                        }
                        let mut edges = p1.clone();
                        edges.extend_from_slice(&extension.appended);
                        if spanning_seen.insert((a, b, edges.clone())) {
                            debug!(from = a, to = b, ?edges, "spanning homopath");
                            outcome.spanning.push(SpanningHomopath {
                                from: a,
                                to: b,
                                edges,
                                appended,
                                object_count: extension.members.len(),
                            });
                        }
                    }
                }
            }
        }

        outcome.same_region = same_region.into_iter().collect();
        outcome.unspanned = unspanned.into_iter().collect();
    }

    /// Extend `p1` of region `a` with the edges of `p2` of region `b`.
    /// `None` when the members of `p1` are unavailable.
    #[allow(clippy::too_many_arguments)]
    async fn extend(
        &self,
        a: RegionId,
        p1: &[EdgeId],
        b: RegionId,
        p2: &[EdgeId],
        denominator: usize,
        threshold: f64,
        costs: &mut CostLedger,
    ) -> Option<Extension> {
        let path_members = self.fetch_path(a, p1, costs).await?;
        let mut extension = Extension::new(path_members);
        let rule = self.config.engine.hashed_intersection;

        for &edge in p2 {
            let Some(edge_members) = self.fetch_edge(b, edge, costs).await else {
                break;
            };
            if !extension.step(edge, &edge_members, rule, denominator, threshold) {
                break;
            }
        }

        Some(extension)
    }

    async fn fetch_path(&self, region: RegionId, path: &[EdgeId], costs: &mut CostLedger) -> Option<Members> {
        match self.client.path_members(region, path).await {
            Ok(members) => {
                record_members(costs, members.as_ref());
                members
            }
            Err(e) => {
                warn!(region, code = 1, error = %e, "path lookup failed");
                None
            }
        }
    }

    async fn fetch_edge(&self, region: RegionId, edge: EdgeId, costs: &mut CostLedger) -> Option<Members> {
        match self.client.edge_members(region, edge).await {
            Ok(members) => {
                record_members(costs, members.as_ref());
                members
            }
            Err(e) => {
                warn!(region, code = 2, error = %e, "edge lookup failed");
                None
            }
        }
    }

    async fn fetch_objects(&self, region: RegionId) -> Vec<u64> {
        self.client
            .distinct_objects(region)
            .await
            .unwrap_or_else(|e| {
                warn!(region, code = 4, error = %e, "object request failed");
                Vec::new()
            })
    }

    async fn terminate(&self, region: RegionId) {
        if let Err(e) = self.client.terminate(region).await {
            warn!(region, code = -1, error = %e, "terminate failed");
        }
    }
}

fn record_members(costs: &mut CostLedger, members: Option<&Members>) {
    let values = members.map(Members::values);
    costs.record_transfer(&values);
    costs.record_lookup(values.as_ref().map_or(0, Vec::len));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects(ids: &[u64]) -> Members {
        Members::Objects(ids.iter().copied().collect())
    }

    #[test]
    fn test_extension_stops_at_first_failure() {
        let mut extension = Extension::new(objects(&[1, 2, 3, 4, 5, 6]));
        let rule = HashedIntersection::default();

        assert!(extension.step(20, &objects(&[1, 2, 3, 4, 5]), rule, 10, 0.5));
        assert!(!extension.step(21, &objects(&[1, 2]), rule, 10, 0.5));

        assert_eq!(extension.appended, vec![20]);
        assert_eq!(extension.members.len(), 5);
    }

    #[test]
    fn test_zero_denominator_never_passes() {
        let mut extension = Extension::new(objects(&[1]));
        assert!(!extension.step(2, &objects(&[1]), HashedIntersection::default(), 0, 0.1));
        assert!(extension.appended.is_empty());
    }

    #[test]
    fn test_listing_payload_uses_plain_values() {
        let mut listing = HomopathListing::new();
        listing.insert(1, vec![(vec![7], objects(&[3, 4]))]);
        let json = serde_json::to_string(&listing_payload(&listing)).unwrap();
        assert_eq!(json, r#"{"1":[[[7],[3,4]]]}"#);
    }

    #[test]
    fn test_outcome_counts() {
        let outcome = CoordinatorOutcome {
            regions: vec![
                RegionSummary {
                    region: 1,
                    status: WorkerStatus::ReadyWithHomopaths,
                    homopaths: vec![vec![1, 2], vec![5]],
                    distinct_objects: 3,
                    observation_integers: Some(10),
                },
                RegionSummary {
                    region: 2,
                    status: WorkerStatus::ReadyWithoutHomopaths,
                    homopaths: Vec::new(),
                    distinct_objects: 1,
                    observation_integers: None,
                },
            ],
            ..CoordinatorOutcome::default()
        };

        assert_eq!(outcome.regions_with_homopaths(), 1);
        assert_eq!(outcome.total_homopaths(), 2);
        assert_eq!(outcome.distinct_edges().into_iter().collect::<Vec<_>>(), vec![1, 2, 5]);
    }
}
