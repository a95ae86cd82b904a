//! Result logs and cost accounting.
//!
//! Every log is append-only with one comma-separated line per experiment
//! step. Column order is fixed; downstream analysis depends on it.

use crate::connections::RegionConnectionMap;
use crate::distributed::CoordinatorOutcome;
use crate::engine::HomopathTable;
use crate::io::cost_of_bytes;
use homopa_core::{format_path, EdgeId};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const REGION_HOMOPATHS: &str = "region_homopaths.txt";
pub const REGION_HOMOPATHS_WITH_COSTS: &str = "region_homopaths_with_costs.txt";
pub const REGION_HOMOPATHS_MULTI_EDGE: &str = "region_homopaths_multi_edge.txt";
pub const REGION_HOMOPATHS_BY_LENGTH: &str = "region_homopaths_by_length.txt";
pub const TOP_LEADER_PER_REGION: &str = "top_leader_per_region.txt";
pub const TOP_LEADER_ALL_EDGES: &str = "top_leader_all_edges.txt";
pub const SPANNING_HOMOPATHS: &str = "spanning_homopaths.txt";
pub const SEEDS: &str = "seeds.txt";
pub const SPANNING_PATHS_COSTS: &str = "spanning_paths_costs.txt";
pub const SPANNING_EDGES_COSTS: &str = "spanning_edges_costs.txt";
pub const EXPERIMENT_RESULTS: &str = "experiment_results.txt";
pub const CONNECTIONS: &str = "connections.txt";
pub const OUTPUT: &str = "output.txt";

/// Bytes and integers moved between regions and the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CostLedger {
    /// JSON-encoded size of every counted response.
    pub transfer_bytes: u64,
    /// Four per lookup request plus four per returned element.
    pub request_integers: u64,
    /// Four per integer the regions read from their observation files.
    pub first_level_integers: u64,
}

impl CostLedger {
    /// Count the JSON size of a response payload.
    pub fn record_transfer<T: Serialize + ?Sized>(&mut self, payload: &T) {
        if let Ok(bytes) = serde_json::to_vec(payload) {
            self.transfer_bytes += bytes.len() as u64;
        }
    }

    /// Count one path or edge lookup returning `elements` values.
    pub fn record_lookup(&mut self, elements: usize) {
        self.request_integers += 4 + 4 * elements as u64;
    }

    /// Count a region's observation integers.
    pub fn record_first_level(&mut self, integers: u64) {
        self.first_level_integers += 4 * integers;
    }

    #[must_use]
    pub fn transfer_cost(&self) -> f64 {
        cost_of_bytes(self.transfer_bytes)
    }
}

/// Leading columns shared by most logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogColumns {
    pub objects: u64,
    pub threshold: f64,
    pub edges: usize,
    pub permutations: usize,
    pub compression: u32,
}

impl LogColumns {
    /// `objects,threshold,edges,permutations,compression`
    #[must_use]
    pub fn prefix(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.objects, self.threshold, self.edges, self.permutations, self.compression
        )
    }
}

/// `[1,2],[3]`, or `[0]` when there are no paths.
pub fn format_paths<'a, I>(paths: I) -> String
where
    I: IntoIterator<Item = &'a [EdgeId]>,
{
    let rendered: Vec<String> = paths.into_iter().map(format_path).collect();
    if rendered.is_empty() {
        "[0]".to_string()
    } else {
        rendered.join(",")
    }
}

/// Directory of append-only result logs.
#[derive(Debug, Clone)]
pub struct ResultLog {
    dir: PathBuf,
}

impl ResultLog {
    /// Open (and create) the log directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Append one line. Workers share log files, so the line goes out in a
    /// single write.
    pub fn append(&self, name: &str, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())
    }

    /// Overwrite a file with the final result integer.
    pub fn write_output(&self, result: usize) -> io::Result<()> {
        fs::write(self.path(OUTPUT), result.to_string())
    }

    /// Region logs. Written only for regions that found homopaths.
    pub fn record_region(
        &self,
        columns: &LogColumns,
        table: &HomopathTable,
        ingest_bytes: u64,
        ingest_cost: f64,
    ) -> io::Result<()> {
        if table.is_empty() {
            return Ok(());
        }
        let region = table.region();
        let prefix = columns.prefix();

        let all = format_paths(table.homopaths().map(|r| r.edges()));
        let multi = format_paths(table.homopaths().filter(|r| r.len() > 1).map(|r| r.edges()));

        self.append(REGION_HOMOPATHS, &format!("{prefix},{region},{all}"))?;
        self.append(
            REGION_HOMOPATHS_WITH_COSTS,
            &format!("{ingest_bytes},{ingest_cost},{prefix},{region},{all}"),
        )?;
        self.append(REGION_HOMOPATHS_MULTI_EDGE, &format!("{prefix},{region},{multi}"))?;
        for length in table.lengths() {
            let paths = format_paths(table.paths_of_length(length).map(|r| r.edges()));
            self.append(
                REGION_HOMOPATHS_BY_LENGTH,
                &format!("{prefix},{region},{length},{paths}"),
            )?;
        }
        Ok(())
    }

    /// Coordinator logs. `columns.objects` is the global object count.
    pub fn record_coordinator(
        &self,
        columns: &LogColumns,
        seed: u64,
        outcome: &CoordinatorOutcome,
    ) -> io::Result<()> {
        let prefix = columns.prefix();

        for summary in outcome.regions.iter().filter(|r| !r.homopaths.is_empty()) {
            let paths = format_paths(summary.homopaths.iter().map(Vec::as_slice));
            self.append(
                TOP_LEADER_PER_REGION,
                &format!("{prefix},{},{paths}", summary.region),
            )?;
        }

        let edges: Vec<EdgeId> = outcome.distinct_edges().into_iter().collect();
        let all_edges = format_path(&edges);
        self.append(TOP_LEADER_ALL_EDGES, &format!("{prefix},0,{all_edges}"))?;

        let mut spanning_line = format!("{prefix},0");
        for span in &outcome.spanning {
            spanning_line.push(',');
            spanning_line.push_str(&format_path(&span.edges));
        }
        self.append(SPANNING_HOMOPATHS, &spanning_line)?;
        self.append(SEEDS, &format!("{seed};{spanning_line}"))?;

        let cost_prefix = format!(
            "{},{},{},{},{},{},{},0",
            columns.objects,
            outcome.costs.transfer_bytes,
            outcome.costs.first_level_integers,
            columns.threshold,
            columns.edges,
            columns.permutations,
            columns.compression
        );
        let mut paths_line = cost_prefix.clone();
        for span in &outcome.spanning {
            paths_line.push(',');
            paths_line.push_str(&format_path(&span.edges));
        }
        self.append(SPANNING_PATHS_COSTS, &paths_line)?;
        self.append(SPANNING_EDGES_COSTS, &format!("{cost_prefix},{all_edges}"))?;

        self.append(EXPERIMENT_RESULTS, &experiment_block(columns, outcome))
    }

    /// Connection map, one line per boundary edge.
    pub fn record_connections(&self, map: &RegionConnectionMap) -> io::Result<()> {
        for line in map.log_lines() {
            self.append(CONNECTIONS, &line)?;
        }
        Ok(())
    }
}

fn experiment_block(columns: &LogColumns, outcome: &CoordinatorOutcome) -> String {
    let mut block = String::from("TOP LEADER\n");
    block.push_str(&format!("Span-HoMoPaths : {}\n", outcome.spanning.len()));
    block.push_str(&format!("Total HoMoPaths : {}\n", outcome.total_homopaths()));
    block.push_str(&format!("Exec Time : {:.3}\n", outcome.elapsed_secs));
    block.push_str(&format!("Threshold : {}\n", columns.threshold));
    block.push_str(&format!("Compression : {}\n", columns.compression));
    for summary in &outcome.regions {
        let paths = format_paths(summary.homopaths.iter().map(Vec::as_slice));
        block.push_str(&format!("Region {} : {paths}\n", summary.region));
    }
    for span in &outcome.spanning {
        block.push_str(&format!(
            "Region {} -> {} : {} ({} objects)\n",
            span.from,
            span.to,
            format_path(&span.edges),
            span.object_count
        ));
    }
    block.push_str("#########################################################\n");
    block
}
