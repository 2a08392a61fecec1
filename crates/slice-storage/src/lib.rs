//! Distributed store manager over independently configured slices.
//!
//! A [`DistributedStoreManager`] looks like a single store but fans every
//! flush, query and extent scan out to a set of slices, runs the per-slice
//! work on a bounded worker pool and merges the answers back together.
//! Transactions span every active slice, using two-phase commit when all of
//! them support it.

pub mod config;
pub mod distributed;
pub mod logging;
pub mod mapper;
pub mod memory;
pub mod merge;
pub mod registry;
pub mod sharding;
pub mod slice;
pub mod store;
pub mod transaction;

// Re-exports
pub use config::{ConfigError, SliceDefinition, SliceStoreConfig};
pub use distributed::{DistributedStoreManager, DistributedStoreManagerBuilder, QueryResult};
pub use mapper::{
    AggregateKind, LogicalQuery, Mapper, MapperError, PassThroughMapper, Projection, QueryRange,
    ShardStatement, SortKey, TargetHint,
};
pub use merge::{MergeContext, MergeError, MergeStrategy, ResultMerger, ShardResult};
pub use registry::StoreRegistry;
pub use sharding::{
    AggregatedError, DistributionPolicy, ParallelExecutor, PolicyRegistry, QueryTargetPolicy,
    ShardFailure, SliceRouter,
};
pub use slice::{Slice, SliceStatus};
pub use store::{Connection, ConnectionProvider, ResultProvider, SliceStoreManager, StoreError};
pub use transaction::{
    DistributedTransaction, TransactionCoordinator, TransactionError, TransactionMode,
    TransactionState,
};

use slice_core::{CoreError, ObjectId, SliceName};
use thiserror::Error;

/// Errors surfaced by the distributed store.
#[derive(Debug, Error)]
pub enum SliceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("slice '{slice}' failed: {source}")]
    Store { slice: SliceName, source: StoreError },

    #[error(transparent)]
    ShardExecution(#[from] AggregatedError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("query translation failed: {0}")]
    Mapper(#[from] MapperError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("instance {oid} is tagged with slice '{slice}', which is not active")]
    UnavailableSlice { oid: ObjectId, slice: SliceName },

    #[error("unknown slice '{0}'")]
    UnknownSlice(String),

    #[error("no active slices")]
    NoActiveSlices,

    #[error("distributed store is closed")]
    Closed,
}

impl SliceError {
    /// Wraps a single slice's store failure.
    pub fn store(slice: &SliceName, source: StoreError) -> Self {
        SliceError::Store {
            slice: slice.clone(),
            source,
        }
    }
}

/// Result type for distributed store operations.
pub type Result<T> = std::result::Result<T, SliceError>;
