//! The mapping boundary.
//!
//! A [`Mapper`] turns one logical operation into the statements each slice
//! must run. This crate never interprets statement text: it only reads the
//! query shape (sort keys, aggregate projections, range) to pick a merger.

use crate::slice::Slice;
use serde::{Deserialize, Serialize};
use slice_core::{SliceName, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised while translating a logical operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MapperError {
    #[error("cannot translate '{statement}' for slice '{slice}': {reason}")]
    Untranslatable {
        statement: String,
        slice: SliceName,
        reason: String,
    },

    #[error("unsupported query shape: {0}")]
    Unsupported(String),
}

// =============================================================================
// Query Shape
// =============================================================================

/// The aggregate function attached to one projected column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    /// A plain (non-aggregate) column.
    #[default]
    None,
}

impl AggregateKind {
    /// Returns true for every kind except [`AggregateKind::None`].
    #[inline]
    pub fn is_aggregate(self) -> bool {
        !matches!(self, AggregateKind::None)
    }
}

/// One projected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub name: String,
    pub aggregate: AggregateKind,
}

impl Projection {
    /// A plain column.
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aggregate: AggregateKind::None,
        }
    }

    /// An aggregate column.
    pub fn aggregate(name: impl Into<String>, aggregate: AggregateKind) -> Self {
        Self {
            name: name.into(),
            aggregate,
        }
    }
}

/// One ORDER BY key, addressed by result column index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: usize) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Row window applied to the merged result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl QueryRange {
    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    /// Rows each slice must produce so the merged window is complete.
    pub fn per_slice_limit(&self) -> Option<usize> {
        self.limit.map(|limit| self.offset.saturating_add(limit))
    }
}

/// Set of slice names a query is narrowed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHint {
    slices: BTreeSet<SliceName>,
}

impl TargetHint {
    pub fn new<I, S>(slices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SliceName>,
    {
        Self {
            slices: slices.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, slice: &SliceName) -> bool {
        self.slices.contains(slice)
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> impl Iterator<Item = &SliceName> {
        self.slices.iter()
    }
}

/// A query or bulk update as issued by the persistence runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogicalQuery {
    pub statement: String,
    pub params: Vec<Value>,
    pub sort_keys: Vec<SortKey>,
    pub projections: Vec<Projection>,
    pub range: Option<QueryRange>,
    pub target: Option<TargetHint>,
}

impl LogicalQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_sort_key(mut self, key: SortKey) -> Self {
        self.sort_keys.push(key);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn with_range(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.range = Some(QueryRange::new(offset, limit));
        self
    }

    pub fn with_target(mut self, target: TargetHint) -> Self {
        self.target = Some(target);
        self
    }

    /// True when at least one projection is an aggregate.
    pub fn is_aggregate(&self) -> bool {
        self.projections.iter().any(|p| p.aggregate.is_aggregate())
    }

    /// Aggregate kinds in projection order.
    pub fn aggregate_kinds(&self) -> Vec<AggregateKind> {
        self.projections.iter().map(|p| p.aggregate).collect()
    }
}

/// One executable statement for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStatement {
    pub text: String,
    pub params: Vec<Value>,
    /// Upper bound on rows the slice needs to return.
    pub limit: Option<usize>,
}

impl ShardStatement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
            limit: None,
        }
    }
}

// =============================================================================
// Mapper
// =============================================================================

/// Translates logical operations into per-slice statements.
///
/// Returning no statements for a slice skips it. Several statements for one
/// slice run in order on that slice and their rows are concatenated.
pub trait Mapper: Send + Sync {
    fn translate(&self, query: &LogicalQuery, slice: &Slice) -> Result<Vec<ShardStatement>, MapperError>;
}

/// Sends the logical statement unchanged to every slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughMapper;

impl Mapper for PassThroughMapper {
    fn translate(&self, query: &LogicalQuery, _slice: &Slice) -> Result<Vec<ShardStatement>, MapperError> {
        Ok(vec![ShardStatement {
            text: query.statement.clone(),
            params: query.params.clone(),
            limit: query.range.and_then(|r| r.per_slice_limit()),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_query_shape() {
        let plain = LogicalQuery::new("select name from Customer");
        assert!(!plain.is_aggregate());

        let agg = LogicalQuery::new("select count(*), max(age) from Customer")
            .with_projection(Projection::aggregate("n", AggregateKind::Count))
            .with_projection(Projection::aggregate("oldest", AggregateKind::Max));
        assert!(agg.is_aggregate());
        assert_eq!(
            agg.aggregate_kinds(),
            vec![AggregateKind::Count, AggregateKind::Max]
        );
    }

    #[test]
    fn test_pass_through_carries_range_limit() {
        let slice = Slice::new("A", BTreeMap::new(), true);
        let query = LogicalQuery::new("select * from Customer")
            .with_param(3)
            .with_range(10, Some(5));
        let statements = PassThroughMapper.translate(&query, &slice).unwrap();

        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].text, "select * from Customer");
        assert_eq!(statements[0].params, vec![Value::Int(3)]);
        assert_eq!(statements[0].limit, Some(15));
    }

    #[test]
    fn test_range_without_limit() {
        assert_eq!(QueryRange::new(4, None).per_slice_limit(), None);
    }

    #[test]
    fn test_target_hint() {
        let hint = TargetHint::new(["A", "C"]);
        assert!(hint.contains(&SliceName::new("A")));
        assert!(!hint.contains(&SliceName::new("B")));
        assert!(TargetHint::default().is_empty());
    }
}
