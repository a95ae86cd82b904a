//! Coordinator and region workers for one experiment run.
//!
//! Every region gets its own worker task that loads the region, discovers
//! its homopaths and then serves lookups on `base_port + region`. The
//! coordinator waits at a readiness barrier until every region is settled,
//! collects the region tables and stitches homopaths across boundaries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐
//! │  Region 10  │     │  Region 11  │
//! │  homopaths  │     │  homopaths  │
//! └──────┬──────┘     └──────┬──────┘
//!        │ ready             │ ready
//!        └─────────┬─────────┘
//!             barrier
//!           ┌──────┴──────┐
//!           │ Coordinator │──── requests 1..5, terminate
//!           └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use homopa::distributed::{Coordinator, ReadinessBarrier, RegionWorker};
//!
//! let barrier = ReadinessBarrier::new(regions.iter().map(|f| f.region));
//! for files in regions {
//!     tokio::spawn(RegionWorker::new(files, config.clone(), barrier.clone()).run());
//! }
//! let outcome = Coordinator::new(config, connections, barrier).run().await?;
//! ```

mod barrier;
mod coordinator;
mod messages;
mod transport;
mod worker;

pub use barrier::{BarrierError, ReadinessBarrier, ReadinessState, WorkerStatus};
pub use coordinator::{
    Coordinator, CoordinatorOutcome, RegionPath, RegionSummary, SpanningHomopath,
};
pub use messages::{Request, Response};
pub use transport::{FrameCodec, RegionClient, RpcError};
pub use worker::{RegionService, RegionWorker, WorkerError, WorkerReport};
