//! # Slice Core
//!
//! Core types shared by every slice-rs crate.
//!
//! This crate provides the fundamental building blocks:
//! - [`SliceName`] and [`ObjectId`] - Type-safe identifiers
//! - [`Value`] and [`Row`] - Query result values, with per-row origin markers
//! - [`ManagedInstance`] - A persistent instance carrying its slice tag
//! - [`cmp`] - Value ordering used by result merging

pub mod cmp;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// Identifiers (Newtypes for type safety)
// =============================================================================

/// The name of one slice (a physical data store in the distributed deployment).
///
/// Slice names are unique within a deployment and never change once configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliceName(String);

impl SliceName {
    /// Creates a new slice name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SliceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SliceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SliceName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SliceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The identity of a persistent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Creates a new ObjectId from a u64.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

impl From<u64> for ObjectId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Values
// =============================================================================

/// A single column value, either stored on an instance or returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Null/missing value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
}

impl Value {
    /// Returns true if the value is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for Int and Float values.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Attempts to get the value as a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to get the value as an i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to get the value as an f64.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Attempts to get the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// One query result row.
///
/// `origin` names the slice that produced the row. Merged results keep it so
/// that instances materialized from a row can later be routed back to the
/// same slice without consulting the distribution policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    /// Column values in projection order.
    pub values: Vec<Value>,
    /// Slice the row was read from, if known.
    pub origin: Option<SliceName>,
}

impl Row {
    /// Creates a row without an origin marker.
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            origin: None,
        }
    }

    /// Sets the origin slice.
    pub fn with_origin(mut self, origin: SliceName) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Returns the value at a column index.
    #[inline]
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.values.get(column)
    }

    /// Returns the number of columns.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no columns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

// =============================================================================
// Managed Instances
// =============================================================================

/// Lifecycle state of a managed instance, as seen by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceState {
    /// Not yet persisted.
    New,
    /// Persisted and modified since.
    Dirty,
    /// Persisted and scheduled for deletion.
    Deleted,
    /// Persisted and unchanged.
    Clean,
}

/// The write a flush issues for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushOperation {
    Insert,
    Update,
    Delete,
    None,
}

impl InstanceState {
    /// Returns the write a flush must perform for this state.
    pub fn flush_operation(self) -> FlushOperation {
        match self {
            InstanceState::New => FlushOperation::Insert,
            InstanceState::Dirty => FlushOperation::Update,
            InstanceState::Deleted => FlushOperation::Delete,
            InstanceState::Clean => FlushOperation::None,
        }
    }
}

/// A persistent instance managed by the distributed store.
///
/// Once an instance carries a slice tag it is owned by that slice. The tag is
/// only ever changed through [`ManagedInstance::reassign_slice`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedInstance {
    /// Identity of the instance.
    pub oid: ObjectId,
    /// Persistent type name (e.g. `Customer`).
    pub type_name: String,
    /// Persistent field values.
    pub fields: BTreeMap<String, Value>,
    /// Flush state.
    pub state: InstanceState,
    slice: Option<SliceName>,
}

impl ManagedInstance {
    /// Creates a new, unassigned instance in the `New` state.
    pub fn new(oid: impl Into<ObjectId>, type_name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            state: InstanceState::New,
            slice: None,
        }
    }

    /// Sets a field value (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the flush state (builder style).
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns the owning slice, or `None` if unassigned.
    #[inline]
    pub fn slice(&self) -> Option<&SliceName> {
        self.slice.as_ref()
    }

    /// Returns true if no slice owns this instance yet.
    #[inline]
    pub fn is_unassigned(&self) -> bool {
        self.slice.is_none()
    }

    /// Tags an unassigned instance with its owning slice.
    ///
    /// Assigning the slice it already carries is a no-op. Assigning a
    /// different slice fails: retagging requires [`Self::reassign_slice`].
    pub fn assign_slice(&mut self, slice: SliceName) -> Result<()> {
        match &self.slice {
            None => {
                self.slice = Some(slice);
                Ok(())
            }
            Some(current) if *current == slice => Ok(()),
            Some(current) => Err(CoreError::SliceConflict {
                oid: self.oid,
                current: current.clone(),
                requested: slice,
            }),
        }
    }

    /// Moves the instance to another slice, returning the previous tag.
    pub fn reassign_slice(&mut self, slice: SliceName) -> Option<SliceName> {
        self.slice.replace(slice)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by core type invariants.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// An instance already belongs to another slice.
    #[error("instance {oid} already belongs to slice '{current}', refusing implicit move to '{requested}'")]
    SliceConflict {
        oid: ObjectId,
        current: SliceName,
        requested: SliceName,
    },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// =============================================================================
// Tests
// =============================================================================
