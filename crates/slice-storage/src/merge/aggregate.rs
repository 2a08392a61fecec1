use super::{MergeError, ResultMerger, ShardResult, ShardSet};
use crate::mapper::AggregateKind;
use slice_core::cmp::{compare_values, values_equal};
use slice_core::{Row, Value};
use std::cmp::Ordering;

/// Combines singleton aggregate rows, one per slice, into a single row.
///
/// Per column:
/// - `Count`, `Sum`: added (integers with overflow checking, floats otherwise)
/// - `Min`, `Max`: smallest / largest non-null value
/// - `None`: must be equal on every slice
///
/// Nulls never contribute. Slices that return no row are skipped. With no
/// contributing slice the row holds 0 for counts and null elsewhere. Exactly
/// one row is produced.
pub struct UniqueAggregateMerger {
    shards: ShardSet,
    kinds: Vec<AggregateKind>,
    done: bool,
    current: Option<Row>,
}

impl UniqueAggregateMerger {
    pub fn new(shards: Vec<ShardResult>, kinds: Vec<AggregateKind>) -> Self {
        Self {
            shards: ShardSet::new(shards),
            kinds,
            done: false,
            current: None,
        }
    }

    fn kind(&self, column: usize) -> AggregateKind {
        self.kinds.get(column).copied().unwrap_or(AggregateKind::None)
    }

    fn combine_all(&mut self) -> Result<Row, MergeError> {
        let mut acc: Option<Vec<Value>> = None;

        for i in 0..self.shards.len() {
            let row = match self.shards.advance(i)? {
                Some(row) => row,
                None => continue,
            };
            if self.shards.advance(i)?.is_some() {
                let slice = self.shards.slice(i).clone();
                self.shards.abort();
                return Err(MergeError::NotUnique(slice));
            }

            acc = Some(match acc {
                None => self.seed(row.values)?,
                Some(mut values) => {
                    for (column, value) in row.values.into_iter().enumerate() {
                        if column < values.len() {
                            let merged = self.combine(column, &values[column], value)?;
                            values[column] = merged;
                        } else {
                            values.push(value);
                        }
                    }
                    values
                }
            });
        }

        let mut values = acc.unwrap_or_else(|| vec![Value::Null; self.kinds.len()]);
        for (column, value) in values.iter_mut().enumerate() {
            if self.kind(column) == AggregateKind::Count && value.is_null() {
                *value = Value::Int(0);
            }
        }
        Ok(Row::new(values))
    }

    /// Validates the first contributing row.
    fn seed(&self, values: Vec<Value>) -> Result<Vec<Value>, MergeError> {
        for (column, value) in values.iter().enumerate() {
            let kind = self.kind(column);
            if matches!(kind, AggregateKind::Count | AggregateKind::Sum)
                && !value.is_null()
                && !value.is_numeric()
            {
                return Err(MergeError::NonNumeric {
                    column,
                    kind,
                    value: value.clone(),
                });
            }
        }
        Ok(values)
    }

    fn combine(&self, column: usize, acc: &Value, value: Value) -> Result<Value, MergeError> {
        let kind = self.kind(column);
        match kind {
            AggregateKind::Count | AggregateKind::Sum => add(column, kind, acc, value),
            AggregateKind::Min => Ok(pick(acc, value, Ordering::Less)),
            AggregateKind::Max => Ok(pick(acc, value, Ordering::Greater)),
            AggregateKind::None => {
                if values_equal(acc, &value) {
                    Ok(acc.clone())
                } else {
                    Err(MergeError::InconsistentProjection {
                        column,
                        first: acc.clone(),
                        second: value,
                    })
                }
            }
        }
    }
}

fn add(column: usize, kind: AggregateKind, acc: &Value, value: Value) -> Result<Value, MergeError> {
    match (acc, value) {
        (acc, Value::Null) => Ok(acc.clone()),
        (Value::Null, v) if v.is_numeric() => Ok(v),
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or(MergeError::Overflow(column)),
        (a, b) if a.is_numeric() && b.is_numeric() => {
            let sum = a.as_float().unwrap_or(0.0) + b.as_float().unwrap_or(0.0);
            Ok(Value::Float(sum))
        }
        (_, v) => Err(MergeError::NonNumeric {
            column,
            kind,
            value: v,
        }),
    }
}

/// Keeps `acc` unless `value` compares as `wanted` against it. Nulls never win.
fn pick(acc: &Value, value: Value, wanted: Ordering) -> Value {
    if value.is_null() {
        return acc.clone();
    }
    if acc.is_null() || compare_values(&value, acc) == wanted {
        value
    } else {
        acc.clone()
    }
}

impl ResultMerger for UniqueAggregateMerger {
    fn open(&mut self) -> Result<(), MergeError> {
        self.shards.open()
    }

    fn next(&mut self) -> Result<bool, MergeError> {
        self.shards.ensure_open()?;
        if self.done {
            self.current = None;
            return Ok(false);
        }
        self.done = true;
        match self.combine_all() {
            Ok(row) => {
                self.current = Some(row);
                Ok(true)
            }
            Err(e) => {
                self.shards.abort();
                self.current = None;
                Err(e)
            }
        }
    }

    fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    fn close(&mut self) -> Result<(), MergeError> {
        self.current = None;
        self.shards.close()
    }
}
