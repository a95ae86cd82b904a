//! Region input files.
//!
//! Each region owns two comma-separated text files:
//!
//! - `Regional_2_edgeconnections<ID>.txt`: `edgeId, succ1, succ2, ...`
//! - `Regional_4_sensors<ID>.txt` (raw): `edgeId, obj1, ..., objN`, or
//!   `Regional_4_sensors_HASHED<ID>.txt` (hashed): `edgeId, rawCount, sig1, ..., sigK`
//!
//! Any malformed line rejects the whole file; a silently skipped line would
//! change the object totals the threshold is measured against.

use crate::cohen::estimate_cardinality;
use crate::minhash::{MinHashSignature, MinHasher};
use crate::observation::Observation;
use homopa_core::{EdgeId, HomopaError, ObjectId, ObservationMode, RegionId};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Fixed per-byte cost factor used in cost columns.
pub const COST_PER_BYTE: f64 = 0.0001;

/// Edge id to the edges reachable from its terminal node.
pub type EdgeAdjacency = BTreeMap<EdgeId, Vec<EdgeId>>;

const ADJACENCY_PREFIX: &str = "Regional_2_edgeconnections";
const RAW_OBSERVATION_PREFIX: &str = "Regional_4_sensors";
const HASHED_OBSERVATION_PREFIX: &str = "Regional_4_sensors_HASHED";

/// Errors while reading or writing region files.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in {} at line {line}: {message}", file.display())]
    Parse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Edge {edge} listed twice in {} (line {line})", file.display())]
    DuplicateEdge {
        file: PathBuf,
        line: usize,
        edge: EdgeId,
    },

    #[error("Missing input file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Region {region} signatures have {found} permutations, expected {expected}")]
    PermutationMismatch {
        region: RegionId,
        expected: usize,
        found: usize,
    },

    #[error("Cannot estimate object total for {}: {source}", file.display())]
    Estimate {
        file: PathBuf,
        #[source]
        source: HomopaError,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Round a cost to four decimals.
#[must_use]
pub fn cost_of_bytes(bytes: u64) -> f64 {
    (bytes as f64 * COST_PER_BYTE * 10_000.0).round() / 10_000.0
}

/// File name of a region's adjacency table.
#[must_use]
pub fn adjacency_file_name(region: RegionId) -> String {
    format!("{ADJACENCY_PREFIX}{region}.txt")
}

/// File name of a region's observation file.
#[must_use]
pub fn observation_file_name(region: RegionId, mode: ObservationMode) -> String {
    match mode {
        ObservationMode::Raw => format!("{RAW_OBSERVATION_PREFIX}{region}.txt"),
        ObservationMode::Hashed => format!("{HASHED_OBSERVATION_PREFIX}{region}.txt"),
    }
}

/// Where one region's input lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFiles {
    pub region: RegionId,
    pub adjacency: PathBuf,
    pub observations: PathBuf,
}

impl RegionFiles {
    /// Conventional file locations inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path, region: RegionId, mode: ObservationMode) -> Self {
        Self {
            region,
            adjacency: dir.join(adjacency_file_name(region)),
            observations: dir.join(observation_file_name(region, mode)),
        }
    }

    /// First file that does not exist, if any.
    #[must_use]
    pub fn missing(&self) -> Option<&Path> {
        [&self.adjacency, &self.observations]
            .into_iter()
            .find(|p| !p.is_file())
            .map(PathBuf::as_path)
    }
}

/// Region ids with an adjacency file in `dir`, ascending.
pub fn discover_region_ids(dir: &Path) -> Result<Vec<RegionId>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let id = name
            .strip_prefix(ADJACENCY_PREFIX)
            .and_then(|rest| rest.strip_suffix(".txt"))
            .and_then(|digits| digits.parse::<RegionId>().ok());
        if let Some(id) = id {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Split one comma-separated line into integers.
fn parse_fields(file: &Path, line: usize, text: &str) -> Result<Vec<u64>> {
    text.split(',')
        .map(str::trim)
        .map(|field| {
            field.parse::<u64>().map_err(|_| LoadError::Parse {
                file: file.to_path_buf(),
                line,
                message: format!("'{field}' is not a non-negative integer"),
            })
        })
        .collect()
}

/// Non-blank lines with their 1-based line numbers, parsed into integers.
fn read_records(path: &Path) -> Result<Vec<(usize, Vec<u64>)>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadError::MissingFile(path.to_path_buf()),
        _ => LoadError::Io(e),
    })?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        records.push((idx + 1, parse_fields(path, idx + 1, trimmed)?));
    }
    Ok(records)
}

/// Read an adjacency table.
pub fn read_adjacency<P: AsRef<Path>>(path: P) -> Result<EdgeAdjacency> {
    let path = path.as_ref();
    let mut adjacency = EdgeAdjacency::new();

    for (line, fields) in read_records(path)? {
        let (&edge, successors) = fields.split_first().ok_or_else(|| LoadError::Parse {
            file: path.to_path_buf(),
            line,
            message: "empty record".into(),
        })?;
        if adjacency.insert(edge, successors.to_vec()).is_some() {
            return Err(LoadError::DuplicateEdge {
                file: path.to_path_buf(),
                line,
                edge,
            });
        }
    }

    debug!(file = %path.display(), edges = adjacency.len(), "read adjacency");
    Ok(adjacency)
}

/// Read an observation file in the given mode.
///
/// Hashed signatures must all have the same length.
pub fn read_observations<P: AsRef<Path>>(
    path: P,
    mode: ObservationMode,
) -> Result<BTreeMap<EdgeId, Observation>> {
    let path = path.as_ref();
    let mut observations = BTreeMap::new();
    let mut signature_len: Option<usize> = None;

    for (line, fields) in read_records(path)? {
        let parse_err = |message: String| LoadError::Parse {
            file: path.to_path_buf(),
            line,
            message,
        };

        let observation = match mode {
            ObservationMode::Raw => {
                let objects: BTreeSet<ObjectId> = fields[1..].iter().copied().collect();
                Observation::Raw(objects)
            }
            ObservationMode::Hashed => {
                if fields.len() < 3 {
                    return Err(parse_err(format!(
                        "expected edge, count and at least one signature value, got {} fields",
                        fields.len()
                    )));
                }
                let values = fields[2..]
                    .iter()
                    .map(|&v| {
                        u32::try_from(v)
                            .map_err(|_| parse_err(format!("signature value {v} exceeds 32 bits")))
                    })
                    .collect::<Result<Vec<u32>>>()?;
                match signature_len {
                    Some(expected) if expected != values.len() => {
                        return Err(parse_err(format!(
                            "signature has {} values, earlier lines have {expected}",
                            values.len()
                        )));
                    }
                    _ => signature_len = Some(values.len()),
                }
                Observation::Hashed {
                    signature: MinHashSignature::new(values),
                    raw_count: fields[1],
                }
            }
        };

        let edge = fields[0];
        if observations.insert(edge, observation).is_some() {
            return Err(LoadError::DuplicateEdge {
                file: path.to_path_buf(),
                line,
                edge,
            });
        }
    }

    debug!(file = %path.display(), edges = observations.len(), %mode, "read observations");
    Ok(observations)
}

/// Everything a region worker knows about its partition.
#[derive(Debug, Clone)]
pub struct RegionInput {
    pub region: RegionId,
    pub mode: ObservationMode,
    pub adjacency: EdgeAdjacency,
    pub observations: BTreeMap<EdgeId, Observation>,
    /// Distinct object ids (raw) or distinct signature values (hashed).
    pub distinct: BTreeSet<u64>,
    /// Distinct objects in the region; a Cohen estimate in hashed mode.
    pub total_objects: u64,
    /// Signature length in hashed mode, zero in raw mode.
    pub num_permutations: usize,
    /// Integers read from the observation file.
    pub integers_read: u64,
}

impl RegionInput {
    /// Load a region from its files.
    pub fn load(files: &RegionFiles, mode: ObservationMode) -> Result<Self> {
        if let Some(missing) = files.missing() {
            return Err(LoadError::MissingFile(missing.to_path_buf()));
        }
        let adjacency = read_adjacency(&files.adjacency)?;
        let observations = read_observations(&files.observations, mode)?;
        Self::from_parts(files.region, mode, adjacency, observations).map_err(|e| match e {
            LoadError::Estimate { source, .. } => LoadError::Estimate {
                file: files.observations.clone(),
                source,
            },
            other => other,
        })
    }

    /// Assemble a region from in-memory tables.
    pub fn from_parts(
        region: RegionId,
        mode: ObservationMode,
        adjacency: EdgeAdjacency,
        observations: BTreeMap<EdgeId, Observation>,
    ) -> Result<Self> {
        let mut distinct = BTreeSet::new();
        let mut integers_read = 0u64;
        let mut signatures: Vec<&MinHashSignature> = Vec::new();

        for observation in observations.values() {
            match observation {
                Observation::Raw(objects) => {
                    integers_read += 1 + objects.len() as u64;
                    distinct.extend(objects.iter().copied());
                }
                Observation::Hashed { signature, .. } => {
                    integers_read += 2 + signature.len() as u64;
                    distinct.extend(signature.values.iter().map(|&v| u64::from(v)));
                    signatures.push(signature);
                }
            }
        }

        let num_permutations = signatures.first().map_or(0, |s| s.len());
        let total_objects = match mode {
            ObservationMode::Raw => distinct.len() as u64,
            ObservationMode::Hashed if signatures.is_empty() => 0,
            ObservationMode::Hashed => estimate_cardinality(&signatures, num_permutations)
                .map_err(|source| LoadError::Estimate {
                    file: PathBuf::from(observation_file_name(region, mode)),
                    source,
                })?,
        };

        Ok(Self {
            region,
            mode,
            adjacency,
            observations,
            distinct,
            total_objects,
            num_permutations,
            integers_read,
        })
    }

    /// Reject hashed signatures whose length differs from `expected`.
    /// Regions without signatures pass.
    pub fn check_permutations(&self, expected: usize) -> Result<()> {
        if self.mode.is_hashed() && self.num_permutations != 0 && self.num_permutations != expected {
            return Err(LoadError::PermutationMismatch {
                region: self.region,
                expected,
                found: self.num_permutations,
            });
        }
        Ok(())
    }

    /// Bytes read, counting four per integer.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        4 * self.integers_read
    }

    /// Ingest cost of this region.
    #[must_use]
    pub fn ingest_cost(&self) -> f64 {
        cost_of_bytes(self.bytes_read())
    }
}

/// Counts from converting a raw observation file to hashed form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashSummary {
    pub edges_written: usize,
    pub edges_skipped: usize,
}

/// Convert a raw observation file to the hashed format.
///
/// Edge order is preserved. Edges with no objects are skipped. The raw count
/// is the number of ids on the line.
pub fn write_hashed_observations<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    hasher: &MinHasher,
) -> Result<HashSummary> {
    let input = input.as_ref();
    let records = read_records(input)?;
    let mut writer = BufWriter::new(File::create(output.as_ref())?);
    let mut summary = HashSummary::default();
    let mut seen = BTreeSet::new();

    for (line, fields) in records {
        let (&edge, objects) = fields
            .split_first()
            .ok_or_else(|| LoadError::Parse {
                file: input.to_path_buf(),
                line,
                message: "empty record".into(),
            })?;
        if !seen.insert(edge) {
            return Err(LoadError::DuplicateEdge {
                file: input.to_path_buf(),
                line,
                edge,
            });
        }
        if objects.is_empty() {
            summary.edges_skipped += 1;
            continue;
        }

        let raw_count = objects.iter().collect::<BTreeSet<_>>().len();
        let signature = hasher.signature(objects);
        let values: Vec<String> = signature.values.iter().map(ToString::to_string).collect();
        writeln!(writer, "{edge},{raw_count},{}", values.join(","))?;
        summary.edges_written += 1;
    }

    writer.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_read_adjacency() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "adj.txt", "1,2,3\n2,3\n\n3\n");
        let adjacency = read_adjacency(&path).unwrap();

        assert_eq!(adjacency.len(), 3);
        assert_eq!(adjacency[&1], vec![2, 3]);
        assert!(adjacency[&3].is_empty());
    }

    #[test]
    fn test_read_raw_observations() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "obs.txt", "1, 10, 11, 10\n2,12\n");
        let observations = read_observations(&path, ObservationMode::Raw).unwrap();

        assert_eq!(observations[&1].count(), 2);
        assert_eq!(observations[&2].count(), 1);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "obs.txt", "1,10\n2,abc\n");
        let err = read_observations(&path, ObservationMode::Raw).unwrap_err();

        match err {
            LoadError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_edge_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "obs.txt", "1,10\n1,11\n");
        let err = read_observations(&path, ObservationMode::Raw).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateEdge { edge: 1, .. }));
    }

    #[test]
    fn test_hashed_signature_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "obs.txt", "1,5,10,20,30\n2,3,10,20\n");
        assert!(read_observations(&path, ObservationMode::Hashed).is_err());
    }

    #[test]
    fn test_hashed_value_too_large() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "obs.txt", "1,5,4294967296\n");
        assert!(read_observations(&path, ObservationMode::Hashed).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let files = RegionFiles::in_dir(dir.path(), 10, ObservationMode::Raw);
        let err = RegionInput::load(&files, ObservationMode::Raw).unwrap_err();
        assert!(matches!(err, LoadError::MissingFile(_)));
    }

    #[test]
    fn test_region_input_totals() {
        let dir = TempDir::new().unwrap();
        write(&dir, &adjacency_file_name(10), "1,2\n2\n");
        write(&dir, &observation_file_name(10, ObservationMode::Raw), "1,5,6\n2,6,7\n");

        let files = RegionFiles::in_dir(dir.path(), 10, ObservationMode::Raw);
        let input = RegionInput::load(&files, ObservationMode::Raw).unwrap();

        assert_eq!(input.total_objects, 3);
        assert_eq!(input.integers_read, 6);
        assert_eq!(input.bytes_read(), 24);
        assert!((input.ingest_cost() - 0.0024).abs() < 1e-12);
    }

    #[test]
    fn test_discover_region_ids() {
        let dir = TempDir::new().unwrap();
        write(&dir, &adjacency_file_name(12), "");
        write(&dir, &adjacency_file_name(3), "");
        write(&dir, "Regional_2_edgeconnectionsX.txt", "");
        write(&dir, "unrelated.txt", "");

        assert_eq!(discover_region_ids(dir.path()).unwrap(), vec![3, 12]);
    }

    #[test]
    fn test_write_hashed_round_trip() {
        let dir = TempDir::new().unwrap();
        let raw = write(&dir, "raw.txt", "7,1,2,3\n8\n9,4\n");
        let hashed = dir.path().join("hashed.txt");
        let hasher = MinHasher::with_seed(16, 1);

        let summary = write_hashed_observations(&raw, &hashed, &hasher).unwrap();
        assert_eq!(summary.edges_written, 2);
        assert_eq!(summary.edges_skipped, 1);

        let observations = read_observations(&hashed, ObservationMode::Hashed).unwrap();
        let keys: Vec<_> = observations.keys().copied().collect();
        assert_eq!(keys, vec![7, 9]);
        assert_eq!(observations[&7].count(), 3);
        match &observations[&9] {
            Observation::Hashed { signature, .. } => assert_eq!(signature.len(), 16),
            other => panic!("unexpected observation: {other:?}"),
        }
    }

    #[test]
    fn test_write_hashed_counts_distinct_objects() {
        let dir = TempDir::new().unwrap();
        let raw = write(&dir, "raw.txt", "1,10,11,10
");
        let hashed = dir.path().join("hashed.txt");
        let hasher = MinHasher::with_seed(8, 3);

        write_hashed_observations(&raw, &hashed, &hasher).unwrap();
        let written = fs::read_to_string(&hashed).unwrap();
        assert!(written.starts_with("1,2,"));

        let observations = read_observations(&hashed, ObservationMode::Hashed).unwrap();
        assert_eq!(observations[&1].count(), 2);
    }

    #[test]
    fn test_check_permutations() {
        let dir = TempDir::new().unwrap();
        write(&dir, &adjacency_file_name(10), "1
");
        write(&dir, &observation_file_name(10, ObservationMode::Hashed), "1,5,10,20,30
");

        let files = RegionFiles::in_dir(dir.path(), 10, ObservationMode::Hashed);
        let input = RegionInput::load(&files, ObservationMode::Hashed).unwrap();
        assert_eq!(input.num_permutations, 3);
        assert!(input.check_permutations(3).is_ok());

        let err = input.check_permutations(128).unwrap_err();
        assert!(matches!(
            err,
            LoadError::PermutationMismatch {
                region: 10,
                expected: 128,
                found: 3
            }
        ));
    }

    #[test]
    fn test_check_permutations_ignores_raw_regions() {
        let dir = TempDir::new().unwrap();
        write(&dir, &adjacency_file_name(10), "1
");
        write(&dir, &observation_file_name(10, ObservationMode::Raw), "1,5,6
");

        let files = RegionFiles::in_dir(dir.path(), 10, ObservationMode::Raw);
        let input = RegionInput::load(&files, ObservationMode::Raw).unwrap();
        assert!(input.check_permutations(128).is_ok());
    }

    #[test]
    fn test_cost_rounding() {
        assert!((cost_of_bytes(12_345) - 1.2345).abs() < 1e-12);
        assert!((cost_of_bytes(3) - 0.0003).abs() < 1e-12);
    }
}
