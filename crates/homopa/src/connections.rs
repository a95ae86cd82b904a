//! Cross-region edge links.
//!
//! An edge `e` of region A links into region B when one of its successors
//! is an edge that B owns.

use crate::io::EdgeAdjacency;
use homopa_core::{EdgeId, RegionId};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// For each ordered region pair, boundary edge of the first region to the
/// edges of the second it continues into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionConnectionMap {
    links: BTreeMap<(RegionId, RegionId), BTreeMap<EdgeId, Vec<EdgeId>>>,
}

impl RegionConnectionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive links from every region's adjacency table.
    #[must_use]
    pub fn build(regions: &[(RegionId, EdgeAdjacency)]) -> Self {
        let mut map = Self::new();
        for (from, adjacency) in regions {
            for (&edge, successors) in adjacency {
                for &successor in successors {
                    for (to, other) in regions {
                        if to != from && other.contains_key(&successor) {
                            map.insert(*from, *to, edge, successor);
                        }
                    }
                }
            }
        }
        map
    }

    /// Record that `edge` in `from` continues into `target` in `to`.
    pub fn insert(&mut self, from: RegionId, to: RegionId, edge: EdgeId, target: EdgeId) {
        let targets = self
            .links
            .entry((from, to))
            .or_default()
            .entry(edge)
            .or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    /// Links from `from` into `to`.
    #[must_use]
    pub fn links(&self, from: RegionId, to: RegionId) -> Option<&BTreeMap<EdgeId, Vec<EdgeId>>> {
        self.links.get(&(from, to))
    }

    /// Whether `last` in `from` continues into `first` in `to`.
    #[must_use]
    pub fn connects(&self, from: RegionId, last: EdgeId, to: RegionId, first: EdgeId) -> bool {
        self.links(from, to)
            .and_then(|edges| edges.get(&last))
            .is_some_and(|targets| targets.contains(&first))
    }

    /// Number of linked region pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Log lines, one per boundary edge:
    /// `Region: A, connects with region: B, Connections: e s1, s2`.
    #[must_use]
    pub fn log_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (&(from, to), edges) in &self.links {
            for (edge, targets) in edges {
                let mut line = String::new();
                let _ = write!(
                    line,
                    "Region: {from}, connects with region: {to}, Connections: {edge} "
                );
                let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
                line.push_str(&targets.join(", "));
                lines.push(line);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(links: &[(EdgeId, Vec<EdgeId>)]) -> EdgeAdjacency {
        links.iter().cloned().collect()
    }

    #[test]
    fn test_build_links_boundary_edges() {
        let regions = vec![
            (10, adjacency(&[(1, vec![2]), (2, vec![3, 4])])),
            (11, adjacency(&[(3, vec![4]), (4, vec![])])),
        ];

        let map = RegionConnectionMap::build(&regions);
        assert_eq!(map.len(), 1);
        assert!(map.connects(10, 2, 11, 3));
        assert!(map.connects(10, 2, 11, 4));
        assert!(!map.connects(10, 1, 11, 2));
        assert!(!map.connects(11, 3, 10, 4));
        assert_eq!(map.links(10, 11).unwrap()[&2], vec![3, 4]);
    }

    #[test]
    fn test_links_in_both_directions() {
        let regions = vec![
            (1, adjacency(&[(1, vec![5])])),
            (2, adjacency(&[(5, vec![1])])),
        ];

        let map = RegionConnectionMap::build(&regions);
        assert!(map.connects(1, 1, 2, 5));
        assert!(map.connects(2, 5, 1, 1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_insert_ignores_duplicates() {
        let mut map = RegionConnectionMap::new();
        map.insert(1, 2, 7, 8);
        map.insert(1, 2, 7, 8);
        assert_eq!(map.links(1, 2).unwrap()[&7], vec![8]);
    }

    #[test]
    fn test_log_lines() {
        let mut map = RegionConnectionMap::new();
        map.insert(10, 11, 2, 3);
        map.insert(10, 11, 2, 4);
        assert_eq!(
            map.log_lines(),
            vec!["Region: 10, connects with region: 11, Connections: 2 3, 4".to_string()]
        );
    }
}
