//! Value comparison utilities.
//!
//! Centralized ordering and equality used when merging per-slice results:
//! ORDER BY k-way merges and MIN/MAX combination.

use crate::Value;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;

// =============================================================================
// Ordering Comparison (for sorting)
// =============================================================================

/// Compares two values for ordering purposes.
///
/// Nulls sort before non-null values. Int and Float compare numerically.
/// Floats use a total order (NaN sorts after every other float).
/// Values of unrelated types order by type rank so the result is a total order.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,

        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
        (Value::String(a), Value::String(b)) => a.cmp(b),

        // Cross-type numeric comparisons
        (Value::Int(a), Value::Float(b)) => OrderedFloat(*a as f64).cmp(&OrderedFloat(*b)),
        (Value::Float(a), Value::Int(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b as f64)),

        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compares two optional values; `None` sorts first.
pub fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
    }
}

// =============================================================================
// Equality Comparison
// =============================================================================

/// Checks if two values are equal, treating `Int(n)` and `Float(n)` as equal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            ((*a as f64) - b).abs() < f64::EPSILON
        }
        (Value::Float(a), Value::Float(b)) => OrderedFloat(*a) == OrderedFloat(*b),
        _ => left == right,
    }
}

// =============================================================================
// Tests
// =============================================================================
