//! Placement and fan-out across slices.
//!
//! # Components
//!
//! - **Policies**: choose the owning slice of a new instance
//! - **Router**: bins a batch of instances into per-slice subsets
//! - **ParallelExecutor**: runs one task per slice on a bounded pool
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    DistributedStoreManager                   │
//! │                                                              │
//! │   batch ──► SliceRouter ──► SliceBins ──► ParallelExecutor   │
//! │                 │                          │     │     │     │
//! │       DistributionPolicy               ┌───▼┐ ┌──▼─┐ ┌─▼──┐  │
//! │                                        │ A  │ │ B  │ │ C  │  │
//! │                                        └────┘ └────┘ └────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod parallel;
mod policy;
mod router;

pub use parallel::{AggregatedError, ParallelExecutor, RunOutcome, ShardFailure};
pub use policy::{
    AllSlices, DistributionPolicy, HashPolicy, PolicyContext, PolicyFactory, PolicyRegistry,
    QueryTargetPolicy, RoundRobinPolicy, TypeAffinityPolicy,
};
pub use router::{RoutingHint, SliceBins, SliceRouter};
