//! Startup barrier between region workers and the coordinator.
//!
//! All readiness state sits behind one `watch` channel, so every transition
//! is serialized and the coordinator wakes on each change.

use homopa_core::RegionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Where a region worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Still loading or running the engine.
    Pending,
    /// Serving and found at least one homoedge.
    ReadyWithHomopaths,
    /// Serving, found nothing.
    ReadyWithoutHomopaths,
}

impl WorkerStatus {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn has_homopaths(&self) -> bool {
        matches!(self, Self::ReadyWithHomopaths)
    }
}

/// Barrier failures.
#[derive(Error, Debug)]
pub enum BarrierError {
    #[error("Timed out after {after:?} with {pending} region(s) still pending")]
    Timeout { after: Duration, pending: usize },
}

/// Snapshot of every expected region's status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessState {
    statuses: BTreeMap<RegionId, WorkerStatus>,
}

impl ReadinessState {
    #[must_use]
    pub fn status(&self, region: RegionId) -> Option<WorkerStatus> {
        self.statuses.get(&region).copied()
    }

    /// Regions still expected, ascending.
    #[must_use]
    pub fn expected(&self) -> Vec<RegionId> {
        self.statuses.keys().copied().collect()
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.statuses.values().filter(|s| s.is_ready()).count()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.statuses.len() - self.ready_count()
    }

    /// No expected region is pending.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending_count() == 0
    }

    /// Ready regions that found homopaths, ascending.
    #[must_use]
    pub fn with_homopaths(&self) -> Vec<RegionId> {
        self.filtered(WorkerStatus::ReadyWithHomopaths)
    }

    /// Ready regions that found nothing, ascending.
    #[must_use]
    pub fn without_homopaths(&self) -> Vec<RegionId> {
        self.filtered(WorkerStatus::ReadyWithoutHomopaths)
    }

    fn filtered(&self, wanted: WorkerStatus) -> Vec<RegionId> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == wanted)
            .map(|(r, _)| *r)
            .collect()
    }
}

/// Shared handle; clone one into every worker and the coordinator.
#[derive(Debug, Clone)]
pub struct ReadinessBarrier {
    state: Arc<watch::Sender<ReadinessState>>,
}

impl ReadinessBarrier {
    /// Barrier expecting `regions`, all pending.
    pub fn new(regions: impl IntoIterator<Item = RegionId>) -> Self {
        let statuses = regions
            .into_iter()
            .map(|r| (r, WorkerStatus::Pending))
            .collect();
        let (tx, _rx) = watch::channel(ReadinessState { statuses });
        Self {
            state: Arc::new(tx),
        }
    }

    /// Leave pending. Returns false if the region is unknown or already
    /// settled; a region transitions exactly once.
    pub fn mark_ready(&self, region: RegionId, has_homopaths: bool) -> bool {
        let status = if has_homopaths {
            WorkerStatus::ReadyWithHomopaths
        } else {
            WorkerStatus::ReadyWithoutHomopaths
        };
        let changed = self.state.send_if_modified(|state| match state.statuses.get_mut(&region) {
            Some(current @ WorkerStatus::Pending) => {
                *current = status;
                true
            }
            _ => false,
        });
        if changed {
            debug!(region, ?status, "region ready");
        } else {
            warn!(region, "ignored readiness signal");
        }
        changed
    }

    /// Stop expecting a region that cannot start.
    pub fn withdraw(&self, region: RegionId) -> bool {
        let changed = self.state.send_if_modified(|state| {
            matches!(state.statuses.get(&region), Some(WorkerStatus::Pending))
                && state.statuses.remove(&region).is_some()
        });
        if changed {
            warn!(region, "region withdrawn from barrier");
        }
        changed
    }

    #[must_use]
    pub fn snapshot(&self) -> ReadinessState {
        self.state.borrow().clone()
    }

    /// Wait until no expected region is pending.
    pub async fn wait(&self) -> ReadinessState {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let state = match rx.wait_for(ReadinessState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        state
    }

    /// Wait, giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<ReadinessState, BarrierError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| BarrierError::Timeout {
                after: timeout,
                pending: self.snapshot().pending_count(),
            })
    }
}
