//! Message types exchanged between the coordinator and region workers.
//!
//! Every request travels on its own connection and gets at most one
//! response frame back.

use crate::engine::HomopathListing;
use crate::observation::Members;
use homopa_core::{EdgeId, EdgePath};
use serde::{Deserialize, Serialize};

/// Coordinator to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Members of one of the region's homopaths.
    PathMembers(EdgePath),
    /// Members of one of the region's homoedges.
    EdgeMembers(EdgeId),
    /// Every live homopath with its members.
    HomopathTable,
    /// Distinct object ids (raw) or signature values (hashed).
    DistinctObjects,
    /// Integers the region read from its observation file.
    ObservationIntegers,
    /// Stop serving. No response follows.
    Terminate,
}

impl Request {
    /// Numeric request code used in logs.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::PathMembers(_) => 1,
            Self::EdgeMembers(_) => 2,
            Self::HomopathTable => 3,
            Self::DistinctObjects => 4,
            Self::ObservationIntegers => 5,
            Self::Terminate => -1,
        }
    }

    /// Whether the worker answers this request.
    #[must_use]
    pub const fn expects_response(&self) -> bool {
        !matches!(self, Self::Terminate)
    }
}

/// Worker to coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Answer to path and edge lookups; `None` when the region has no such entry.
    Members(Option<Members>),
    /// Homopath listing; `None` when the region found no homopaths.
    Table(Option<HomopathListing>),
    DistinctObjects(Vec<u64>),
    IntegerCount(u64),
}

impl Response {
    /// Short name used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Members(_) => "members",
            Self::Table(_) => "table",
            Self::DistinctObjects(_) => "distinct objects",
            Self::IntegerCount(_) => "integer count",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes() {
        assert_eq!(Request::PathMembers(vec![1, 2]).code(), 1);
        assert_eq!(Request::EdgeMembers(1).code(), 2);
        assert_eq!(Request::HomopathTable.code(), 3);
        assert_eq!(Request::DistinctObjects.code(), 4);
        assert_eq!(Request::ObservationIntegers.code(), 5);
        assert_eq!(Request::Terminate.code(), -1);
    }

    #[test]
    fn test_only_terminate_is_fire_and_forget() {
        assert!(!Request::Terminate.expects_response());
        assert!(Request::HomopathTable.expects_response());
    }

    #[test]
    fn test_bincode_table_response() {
        let mut listing = HomopathListing::new();
        listing.insert(
            2,
            vec![(vec![4, 5], Members::Signature(vec![Some(1), None, Some(3)]))],
        );
        let response = Response::Table(Some(listing));

        let bytes = bincode::serialize(&response).unwrap();
        let decoded: Response = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, response);
    }
}
