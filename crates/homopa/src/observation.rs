//! Per-edge observations and the intersected member sets carried by paths.

use crate::minhash::MinHashSignature;
use homopa_core::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// What one edge's sensor saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Observation {
    /// Exact object ids.
    Raw(BTreeSet<ObjectId>),
    /// MinHash signature of the object ids plus how many ids produced it.
    Hashed {
        signature: MinHashSignature,
        raw_count: u64,
    },
}

impl Observation {
    /// Number of raw objects behind this observation.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Raw(objects) => objects.len() as u64,
            Self::Hashed { raw_count, .. } => *raw_count,
        }
    }

    /// Whether the sensor saw nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Raw(objects) => objects.is_empty(),
            Self::Hashed {
                signature,
                raw_count,
            } => signature.is_empty() || *raw_count == 0,
        }
    }

    /// Starting member set for a path beginning at this edge.
    #[must_use]
    pub fn members(&self) -> Members {
        match self {
            Self::Raw(objects) => Members::Objects(objects.clone()),
            Self::Hashed { signature, .. } => {
                Members::Signature(signature.values.iter().copied().map(Some).collect())
            }
        }
    }
}

/// How two hashed member sets are intersected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashedIntersection {
    /// A slot survives if its value occurs anywhere in the other signature.
    #[default]
    ValueSet,
    /// A slot survives only if the other signature holds the same value in
    /// the same slot.
    Positional,
}

/// Objects common to every edge of a path so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Members {
    Objects(BTreeSet<ObjectId>),
    /// Masked signature; `None` marks a slot that no longer agrees.
    Signature(Vec<Option<u32>>),
}

impl Members {
    /// Objects (raw) or surviving slots (hashed).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Objects(objects) => objects.len(),
            Self::Signature(slots) => slots.iter().filter(|s| s.is_some()).count(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat listing as sent over the wire and written to logs.
    #[must_use]
    pub fn values(&self) -> Vec<u64> {
        match self {
            Self::Objects(objects) => objects.iter().copied().collect(),
            Self::Signature(slots) => slots.iter().flatten().map(|&v| u64::from(v)).collect(),
        }
    }

    /// Intersect with another member set of the same kind.
    ///
    /// Sets of different kinds have nothing in common.
    #[must_use]
    pub fn intersect(&self, other: &Members, mode: HashedIntersection) -> Members {
        match (self, other) {
            (Self::Objects(a), Self::Objects(b)) => {
                Self::Objects(a.intersection(b).copied().collect())
            }
            (Self::Signature(a), Self::Signature(b)) => match mode {
                HashedIntersection::ValueSet => {
                    let present: HashSet<u32> = b.iter().flatten().copied().collect();
                    Self::Signature(
                        a.iter()
                            .map(|slot| slot.filter(|v| present.contains(v)))
                            .collect(),
                    )
                }
                HashedIntersection::Positional => Self::Signature(
                    a.iter()
                        .enumerate()
                        .map(|(i, slot)| match (slot, b.get(i).copied().flatten()) {
                            (Some(x), Some(y)) if *x == y => Some(*x),
                            _ => None,
                        })
                        .collect(),
                ),
            },
            (Self::Objects(_), Self::Signature(_)) => Self::Objects(BTreeSet::new()),
            (Self::Signature(a), Self::Objects(_)) => Self::Signature(vec![None; a.len()]),
        }
    }
}
