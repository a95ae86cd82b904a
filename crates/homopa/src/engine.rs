//! Homopath discovery within one region.
//!
//! The engine grows paths one edge per round. Round 1 keeps every edge whose
//! object share of the region meets the threshold (the homoedges). Each later
//! round extends the previous round's paths by successor homoedges as long as
//! the accumulated intersection still meets the threshold.
//!
//! Paths live in an arena. Extending a path marks its prefix superseded
//! instead of removing it, so only maximal paths are listed per branch.

use crate::config::EngineConfig;
use crate::io::RegionInput;
use crate::observation::{Members, Observation};
use homopa_core::{EdgeId, EdgePath, ObservationMode, RegionId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Live homopaths grouped by length, as shipped to the coordinator.
pub type HomopathListing = BTreeMap<usize, Vec<(EdgePath, Members)>>;

/// One discovered path and the members common to all its edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    edges: EdgePath,
    members: Members,
    superseded: bool,
}

impl PathRecord {
    #[must_use]
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    #[must_use]
    pub fn members(&self) -> &Members {
        &self.members
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether a longer path has replaced this one.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    #[must_use]
    pub fn last_edge(&self) -> Option<EdgeId> {
        self.edges.last().copied()
    }
}

/// A region's homopaths of every length.
#[derive(Debug, Clone)]
pub struct HomopathTable {
    region: RegionId,
    mode: ObservationMode,
    records: Vec<PathRecord>,
    by_length: BTreeMap<usize, Vec<usize>>,
    index: HashMap<EdgePath, usize>,
    homoedges: BTreeMap<EdgeId, Members>,
    total_objects: u64,
    num_permutations: usize,
    rounds: usize,
}

impl HomopathTable {
    fn new(input: &RegionInput) -> Self {
        Self {
            region: input.region,
            mode: input.mode,
            records: Vec::new(),
            by_length: BTreeMap::new(),
            index: HashMap::new(),
            homoedges: BTreeMap::new(),
            total_objects: input.total_objects,
            num_permutations: input.num_permutations,
            rounds: 0,
        }
    }

    fn push(&mut self, edges: EdgePath, members: Members) -> usize {
        let id = self.records.len();
        self.by_length.entry(edges.len()).or_default().push(id);
        self.index.insert(edges.clone(), id);
        self.records.push(PathRecord {
            edges,
            members,
            superseded: false,
        });
        id
    }

    fn retire(&mut self, id: usize) {
        if let Some(record) = self.records.get_mut(id) {
            record.superseded = true;
        }
    }

    /// Retire every contiguous window one edge shorter than `edges`.
    fn retire_windows(&mut self, edges: &[EdgeId]) {
        if edges.len() < 2 {
            return;
        }
        for window in edges.windows(edges.len() - 1) {
            if let Some(&id) = self.index.get(window) {
                self.retire(id);
            }
        }
    }

    #[must_use]
    pub fn region(&self) -> RegionId {
        self.region
    }

    #[must_use]
    pub fn mode(&self) -> ObservationMode {
        self.mode
    }

    /// Distinct objects in the region (estimated in hashed mode).
    #[must_use]
    pub fn total_objects(&self) -> u64 {
        self.total_objects
    }

    #[must_use]
    pub fn num_permutations(&self) -> usize {
        self.num_permutations
    }

    /// Rounds the engine ran, including the homoedge round.
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Number of live homopaths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.iter().filter(|r| !r.superseded).count()
    }

    /// True when the region has no homoedges at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.homoedges.is_empty()
    }

    /// Live homopaths of one length, in discovery order.
    pub fn paths_of_length(&self, length: usize) -> impl Iterator<Item = &PathRecord> + '_ {
        self.by_length
            .get(&length)
            .into_iter()
            .flatten()
            .map(|&id| &self.records[id])
            .filter(|r| !r.superseded)
    }

    /// All live homopaths, shortest first.
    pub fn homopaths(&self) -> impl Iterator<Item = &PathRecord> + '_ {
        self.by_length
            .values()
            .flatten()
            .map(|&id| &self.records[id])
            .filter(|r| !r.superseded)
    }

    /// Lengths that still hold a live homopath.
    #[must_use]
    pub fn lengths(&self) -> Vec<usize> {
        self.by_length
            .keys()
            .copied()
            .filter(|&len| self.paths_of_length(len).next().is_some())
            .collect()
    }

    /// Length of the longest live homopath, zero when empty.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.lengths().last().copied().unwrap_or(0)
    }

    /// Members of a live homopath matching `edges` exactly.
    #[must_use]
    pub fn path_members(&self, edges: &[EdgeId]) -> Option<&Members> {
        self.index
            .get(edges)
            .map(|&id| &self.records[id])
            .filter(|r| !r.superseded)
            .map(|r| &r.members)
    }

    /// Members of a homoedge. Homoedges stay addressable after being extended.
    #[must_use]
    pub fn edge_members(&self, edge: EdgeId) -> Option<&Members> {
        self.homoedges.get(&edge)
    }

    /// Homoedge ids, ascending.
    pub fn homoedges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.homoedges.keys().copied()
    }

    /// Live homopaths grouped by length.
    #[must_use]
    pub fn listing(&self) -> HomopathListing {
        let mut listing = HomopathListing::new();
        for record in self.homopaths() {
            listing
                .entry(record.len())
                .or_default()
                .push((record.edges.clone(), record.members.clone()));
        }
        listing
    }

    /// Every edge on some live homopath.
    #[must_use]
    pub fn distinct_edges(&self) -> BTreeSet<EdgeId> {
        self.homopaths()
            .flat_map(|r| r.edges.iter().copied())
            .collect()
    }
}

/// Threshold-driven path grower.
#[derive(Debug, Clone, Default)]
pub struct HomopathEngine {
    config: EngineConfig,
}

impl HomopathEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Share of the region's objects seen on a single edge.
    fn homoedge_ratio(observation: &Observation, total_objects: u64) -> f64 {
        if total_objects == 0 {
            return 0.0;
        }
        observation.count() as f64 / total_objects as f64
    }

    /// Share retained by an accumulated intersection of `count` members.
    fn extension_ratio(count: usize, input: &RegionInput) -> f64 {
        let denominator = match input.mode {
            ObservationMode::Raw => input.total_objects,
            ObservationMode::Hashed => input.num_permutations as u64,
        };
        if denominator == 0 {
            return 0.0;
        }
        count as f64 / denominator as f64
    }

    /// Children of one path: each successor homoedge not already on the path
    /// whose intersection keeps the ratio at or above the threshold.
    fn expand(
        &self,
        record: &PathRecord,
        input: &RegionInput,
        homoedges: &BTreeMap<EdgeId, Members>,
    ) -> Vec<(EdgePath, Members)> {
        let Some(successors) = record.last_edge().and_then(|e| input.adjacency.get(&e)) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        successors
            .iter()
            .copied()
            .filter(|s| seen.insert(*s))
            .filter(|s| !record.edges.contains(s))
            .filter_map(|s| {
                let edge_members = homoedges.get(&s)?;
                let members = record
                    .members
                    .intersect(edge_members, self.config.hashed_intersection);
                let ratio = Self::extension_ratio(members.len(), input);
                (ratio >= self.config.threshold).then(|| {
                    let mut edges = record.edges.clone();
                    edges.push(s);
                    (edges, members)
                })
            })
            .collect()
    }

    /// Discover all homopaths of a region.
    #[must_use]
    pub fn discover(&self, input: &RegionInput) -> HomopathTable {
        let mut table = HomopathTable::new(input);
        let threshold = self.config.threshold;

        let mut frontier = Vec::new();
        for (&edge, observation) in &input.observations {
            if !input.adjacency.contains_key(&edge) {
                continue;
            }
            if Self::homoedge_ratio(observation, input.total_objects) >= threshold {
                let members = observation.members();
                table.homoedges.insert(edge, members.clone());
                frontier.push(table.push(vec![edge], members));
            }
        }
        table.rounds = 1;
        debug!(region = input.region, round = 1, paths = frontier.len(), "homoedges");

        while !frontier.is_empty() && table.rounds < self.config.max_rounds {
            let expansions: Vec<Vec<(EdgePath, Members)>> = frontier
                .par_iter()
                .map(|&id| self.expand(&table.records[id], input, &table.homoedges))
                .collect();

            let mut next = Vec::new();
            for (&parent, children) in frontier.iter().zip(expansions) {
                for (edges, members) in children {
                    if self.config.retire_subpaths {
                        table.retire_windows(&edges);
                    } else {
                        table.retire(parent);
                    }
                    next.push(table.push(edges, members));
                }
            }

            if next.is_empty() {
                break;
            }
            table.rounds += 1;
            debug!(
                region = input.region,
                round = table.rounds,
                paths = next.len(),
                "extended paths"
            );
            frontier = next;
        }

        table
    }
}
