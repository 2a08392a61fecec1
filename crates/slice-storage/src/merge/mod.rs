//! Merging of per-slice query results.
//!
//! Every slice answers a query independently. A [`ResultMerger`] turns those
//! per-slice cursors into one logical cursor:
//!
//! - [`ConcatMerger`]: slice 0 fully, then slice 1, ...
//! - [`OrderedMerger`]: k-way merge honoring the query's sort keys
//! - [`UniqueAggregateMerger`]: combines one aggregate row per slice into one row
//! - [`RangeMerger`]: applies the query's offset/limit after merging
//!
//! Mergers are consumed by one thread. Any slice error is returned at once,
//! closes the merger and drops whatever was merged so far.

mod aggregate;
mod concat;
mod ordered;
mod range;

pub use aggregate::UniqueAggregateMerger;
pub use concat::ConcatMerger;
pub use ordered::OrderedMerger;
pub use range::RangeMerger;

use crate::mapper::{AggregateKind, QueryRange, SortKey};
use crate::store::{ResultProvider, StoreError};
use slice_core::{Row, SliceName, Value};
use std::fmt;
use thiserror::Error;

/// Errors raised while combining slice results.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    #[error("slice '{slice}' failed during merge: {source}")]
    Shard { slice: SliceName, source: StoreError },

    #[error("column {column} differs across slices: {first} vs {second}")]
    InconsistentProjection {
        column: usize,
        first: Value,
        second: Value,
    },

    #[error("slice '{0}' returned more than one row for a unique result")]
    NotUnique(SliceName),

    #[error("column {column} holds non-numeric value {value} in a {kind:?} aggregate")]
    NonNumeric {
        column: usize,
        kind: AggregateKind,
        value: Value,
    },

    #[error("integer overflow while combining column {0}")]
    Overflow(usize),

    #[error("merger is not open")]
    NotOpen,

    #[error("merger is closed")]
    Closed,
}

/// One logical cursor over several slices' results.
pub trait ResultMerger: Send {
    fn open(&mut self) -> Result<(), MergeError>;
    fn next(&mut self) -> Result<bool, MergeError>;
    fn current(&self) -> Option<&Row>;
    fn close(&mut self) -> Result<(), MergeError>;
}

/// The cursor one slice returned for a query.
pub struct ShardResult {
    pub slice: SliceName,
    pub provider: Box<dyn ResultProvider>,
}

impl ShardResult {
    pub fn new(slice: SliceName, provider: Box<dyn ResultProvider>) -> Self {
        Self { slice, provider }
    }
}

impl fmt::Debug for ShardResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardResult").field("slice", &self.slice).finish()
    }
}

/// How per-slice results are combined.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStrategy {
    Concat,
    Ordered(Vec<SortKey>),
    UniqueAggregate(Vec<AggregateKind>),
    /// Sums a single count column (update/delete row counts).
    SumAggregate,
}

/// Everything needed to merge one query execution. Consumed once.
#[derive(Debug)]
pub struct MergeContext {
    pub shards: Vec<ShardResult>,
    pub strategy: MergeStrategy,
    pub range: Option<QueryRange>,
}

impl MergeContext {
    pub fn new(shards: Vec<ShardResult>, strategy: MergeStrategy) -> Self {
        Self {
            shards,
            strategy,
            range: None,
        }
    }

    pub fn with_range(mut self, range: Option<QueryRange>) -> Self {
        self.range = range;
        self
    }

    /// Builds the merger for this context.
    pub fn into_merger(self) -> Box<dyn ResultMerger> {
        let merger: Box<dyn ResultMerger> = match self.strategy {
            MergeStrategy::Concat => Box::new(ConcatMerger::new(self.shards)),
            MergeStrategy::Ordered(keys) => Box::new(OrderedMerger::new(self.shards, keys)),
            MergeStrategy::UniqueAggregate(kinds) => {
                Box::new(UniqueAggregateMerger::new(self.shards, kinds))
            }
            MergeStrategy::SumAggregate => Box::new(UniqueAggregateMerger::new(
                self.shards,
                vec![AggregateKind::Sum],
            )),
        };
        match self.range {
            Some(range) if range.offset > 0 || range.limit.is_some() => {
                Box::new(RangeMerger::new(merger, range))
            }
            _ => merger,
        }
    }
}

// =============================================================================
// Shared cursor lifecycle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Open,
    Closed,
}

/// The per-slice cursors behind a merger, with the open/close discipline
/// every merger shares.
pub(crate) struct ShardSet {
    shards: Vec<ShardResult>,
    phase: Phase,
}

impl ShardSet {
    pub(crate) fn new(shards: Vec<ShardResult>) -> Self {
        Self {
            shards,
            phase: Phase::Ready,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn slice(&self, index: usize) -> &SliceName {
        &self.shards[index].slice
    }

    /// Opens every cursor. Opening an open set does nothing.
    pub(crate) fn open(&mut self) -> Result<(), MergeError> {
        match self.phase {
            Phase::Open => return Ok(()),
            Phase::Closed => return Err(MergeError::Closed),
            Phase::Ready => {}
        }
        for i in 0..self.shards.len() {
            if let Err(source) = self.shards[i].provider.open() {
                let slice = self.shards[i].slice.clone();
                self.abort();
                return Err(MergeError::Shard { slice, source });
            }
        }
        self.phase = Phase::Open;
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<(), MergeError> {
        match self.phase {
            Phase::Open => Ok(()),
            Phase::Ready => Err(MergeError::NotOpen),
            Phase::Closed => Err(MergeError::Closed),
        }
    }

    /// Advances cursor `index`, returning its next row tagged with its slice.
    ///
    /// A cursor error closes the whole set.
    pub(crate) fn advance(&mut self, index: usize) -> Result<Option<Row>, MergeError> {
        let shard = &mut self.shards[index];
        match shard.provider.next() {
            Ok(true) => Ok(shard.provider.current().cloned().map(|mut row| {
                row.origin = Some(shard.slice.clone());
                row
            })),
            Ok(false) => Ok(None),
            Err(source) => {
                let slice = shard.slice.clone();
                tracing::error!(slice = %slice, error = %source, "Slice cursor failed during merge");
                self.abort();
                Err(MergeError::Shard { slice, source })
            }
        }
    }

    /// Closes every cursor and reports the first failure.
    pub(crate) fn close(&mut self) -> Result<(), MergeError> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        self.phase = Phase::Closed;
        let mut first = None;
        for shard in &mut self.shards {
            if let Err(source) = shard.provider.close() {
                tracing::warn!(slice = %shard.slice, error = %source, "Closing slice cursor failed");
                first.get_or_insert(MergeError::Shard {
                    slice: shard.slice.clone(),
                    source,
                });
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Closes every cursor after a failure, ignoring close errors.
    pub(crate) fn abort(&mut self) {
        for shard in &mut self.shards {
            let _ = shard.provider.close();
        }
        self.phase = Phase::Closed;
    }
}

// =============================================================================
// Test helpers
// =============================================================================
