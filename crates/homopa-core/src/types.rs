//! Common types for homopath discovery.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a directed network edge.
pub type EdgeId = u64;

/// Identifier of a moving object sensed on an edge.
pub type ObjectId = u64;

/// Identifier of a network partition owned by one regional worker.
pub type RegionId = u32;

/// Ordered chain of adjacent edges.
pub type EdgePath = Vec<EdgeId>;

/// How per-edge observations are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationMode {
    /// Exact object-id sets per edge.
    #[default]
    Raw,
    /// MinHash signatures plus the raw object count per edge.
    Hashed,
}

impl ObservationMode {
    /// Whether observations are MinHash signatures.
    #[must_use]
    pub const fn is_hashed(&self) -> bool {
        matches!(self, Self::Hashed)
    }
}

impl fmt::Display for ObservationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Hashed => write!(f, "hashed"),
        }
    }
}

/// Render a path the way result logs expect it: `[e1,e2,e3]`.
#[must_use]
pub fn format_path(path: &[EdgeId]) -> String {
    let inner: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("[{}]", inner.join(","))
}
