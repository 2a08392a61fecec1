use super::{MergeError, ResultMerger, ShardResult, ShardSet};
use crate::mapper::SortKey;
use slice_core::cmp::compare_optional;
use slice_core::Row;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Lookahead row of one slice.
struct MergeEntry {
    row: Row,
    shard_idx: usize,
    sort_keys: Arc<[SortKey]>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        for key in self.sort_keys.iter() {
            let ord = compare_optional(self.row.get(key.column), other.row.get(key.column));
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        // Equal keys: earlier slice first
        self.shard_idx.cmp(&other.shard_idx)
    }
}

/// K-way merge of slices that are each sorted on the query's sort keys.
///
/// Holds one lookahead row per slice and always emits the smallest. Rows
/// with equal keys come out in slice submission order, and rows of one slice
/// keep their relative order. Nothing is materialized beyond the lookaheads.
pub struct OrderedMerger {
    shards: ShardSet,
    sort_keys: Arc<[SortKey]>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    primed: bool,
    /// Slice whose lookahead was emitted last and must be refilled.
    refill: Option<usize>,
    current: Option<Row>,
}

impl OrderedMerger {
    pub fn new(shards: Vec<ShardResult>, sort_keys: Vec<SortKey>) -> Self {
        let capacity = shards.len();
        Self {
            shards: ShardSet::new(shards),
            sort_keys: sort_keys.into(),
            heap: BinaryHeap::with_capacity(capacity),
            primed: false,
            refill: None,
            current: None,
        }
    }

    fn pull(&mut self, shard_idx: usize) -> Result<(), MergeError> {
        if let Some(row) = self.shards.advance(shard_idx)? {
            self.heap.push(Reverse(MergeEntry {
                row,
                shard_idx,
                sort_keys: Arc::clone(&self.sort_keys),
            }));
        }
        Ok(())
    }

    fn step(&mut self) -> Result<bool, MergeError> {
        if !self.primed {
            for i in 0..self.shards.len() {
                self.pull(i)?;
            }
            self.primed = true;
        }
        if let Some(i) = self.refill.take() {
            self.pull(i)?;
        }

        match self.heap.pop() {
            Some(Reverse(entry)) => {
                self.refill = Some(entry.shard_idx);
                self.current = Some(entry.row);
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }
}

impl ResultMerger for OrderedMerger {
    fn open(&mut self) -> Result<(), MergeError> {
        self.shards.open()
    }

    fn next(&mut self) -> Result<bool, MergeError> {
        self.shards.ensure_open()?;
        self.step().map_err(|e| {
            self.heap.clear();
            self.refill = None;
            self.current = None;
            e
        })
    }

    fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    fn close(&mut self) -> Result<(), MergeError> {
        self.heap.clear();
        self.current = None;
        self.shards.close()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use slice_core::{SliceName, Value};

    #[test]
    fn test_ascending_merge() {
        let mut merger = OrderedMerger::new(
            vec![
                shard("A", int_rows(&[1, 4, 7])),
                shard("B", int_rows(&[2, 5, 8])),
                shard("C", int_rows(&[3, 6, 9])),
            ],
            vec![SortKey::asc(0)],
        );
        merger.open().unwrap();
        assert_eq!(drain_ints(&mut merger).unwrap(), (1..=9).collect::<Vec<_>>());
        merger.close().unwrap();
    }

    #[test]
    fn test_descending_merge() {
        let mut merger = OrderedMerger::new(
            vec![shard("A", int_rows(&[9, 3])), shard("B", int_rows(&[8, 4, 1]))],
            vec![SortKey::desc(0)],
        );
        merger.open().unwrap();
        assert_eq!(drain_ints(&mut merger).unwrap(), vec![9, 8, 4, 3, 1]);
    }

    #[test]
    fn test_ties_keep_slice_order() {
        let row = |k: i64, tag: &str| Row::new(vec![Value::Int(k), Value::from(tag)]);
        let mut merger = OrderedMerger::new(
            vec![
                shard("A", vec![row(1, "a1"), row(2, "a2")]),
                shard("B", vec![row(1, "b1"), row(2, "b2")]),
            ],
            vec![SortKey::asc(0)],
        );
        merger.open().unwrap();

        let mut tags = Vec::new();
        while merger.next().unwrap() {
            let current = merger.current().unwrap();
            tags.push(current.get(1).and_then(Value::as_str).unwrap_or_default().to_string());
        }
        assert_eq!(tags, vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_secondary_key_and_origin() {
        let row = |a: i64, b: &str| Row::new(vec![Value::Int(a), Value::from(b)]);
        let mut merger = OrderedMerger::new(
            vec![
                shard("A", vec![row(1, "z"), row(2, "a")]),
                shard("B", vec![row(1, "m"), row(2, "b")]),
            ],
            vec![SortKey::asc(0), SortKey::desc(1)],
        );
        merger.open().unwrap();

        let mut seen = Vec::new();
        while merger.next().unwrap() {
            let current = merger.current().unwrap();
            seen.push((
                current.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
                current.origin.clone(),
            ));
        }
        assert_eq!(
            seen,
            vec![
                ("z".to_string(), Some(SliceName::new("A"))),
                ("m".to_string(), Some(SliceName::new("B"))),
                ("b".to_string(), Some(SliceName::new("B"))),
                ("a".to_string(), Some(SliceName::new("A"))),
            ]
        );
    }

    #[test]
    fn test_nulls_sort_first() {
        let mut merger = OrderedMerger::new(
            vec![
                shard("A", vec![Row::new(vec![Value::Int(2)])]),
                shard("B", vec![Row::new(vec![Value::Null]), Row::new(vec![Value::Int(1)])]),
            ],
            vec![SortKey::asc(0)],
        );
        merger.open().unwrap();
        assert!(merger.next().unwrap());
        assert!(merger.current().unwrap().values[0].is_null());
        assert_eq!(drain_ints(&mut merger).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_mixed_numeric_keys() {
        let mut merger = OrderedMerger::new(
            vec![
                shard("A", vec![Row::new(vec![Value::Float(1.5)]), Row::new(vec![Value::Int(3)])]),
                shard("B", vec![Row::new(vec![Value::Int(2)])]),
            ],
            vec![SortKey::asc(0)],
        );
        merger.open().unwrap();
        let mut floats = Vec::new();
        while merger.next().unwrap() {
            floats.push(merger.current().unwrap().values[0].as_float().unwrap_or(f64::NAN));
        }
        assert_eq!(floats, vec![1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_error_discards_lookaheads() {
        let mut merger = OrderedMerger::new(
            vec![shard("A", int_rows(&[1, 5])), failing_shard("B", int_rows(&[2]))],
            vec![SortKey::asc(0)],
        );
        merger.open().unwrap();

        assert!(merger.next().unwrap()); // 1 from A
        assert!(merger.next().unwrap()); // 2 from B
        let err = merger.next().unwrap_err(); // refilling B fails
        assert!(matches!(err, MergeError::Shard { ref slice, .. } if slice.as_str() == "B"));
        assert!(merger.current().is_none());
        assert_eq!(merger.next(), Err(MergeError::Closed));
    }

    #[test]
    fn test_empty_slices() {
        let mut merger = OrderedMerger::new(
            vec![shard("A", Vec::new()), shard("B", Vec::new())],
            vec![SortKey::asc(0)],
        );
        merger.open().unwrap();
        assert!(!merger.next().unwrap());
    }
}
