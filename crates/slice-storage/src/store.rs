//! Per-slice store management.
//!
//! This module defines the contracts this crate consumes from the outside
//! (a [`ConnectionProvider`] handing out one [`Connection`] per slice, with an
//! optional [`XaResource`]) and the concrete [`SliceStoreManager`] that owns a
//! single slice's live connection.
//!
//! # Ownership
//!
//! A `SliceStoreManager` holds at most one connection. Shard tasks never share
//! a manager, so the internal mutex only serializes calls made on behalf of the
//! same slice.

use crate::mapper::ShardStatement;
use crate::slice::Slice;
use slice_core::{ManagedInstance, ObjectId, Row, SliceName};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by a single slice's store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("slice '{0}' is not connected")]
    NotConnected(SliceName),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("instance {0} already exists")]
    DuplicateKey(ObjectId),

    #[error("instance {0} not found")]
    NotFound(ObjectId),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("slice '{0}' does not support XA")]
    XaUnsupported(SliceName),

    #[error("XA protocol error: {0}")]
    Xa(String),

    #[error("result cursor is not open")]
    CursorNotOpen,

    #[error("slice task panicked: {0}")]
    TaskPanicked(String),

    #[error("connection lock poisoned for slice '{0}'")]
    Poisoned(SliceName),
}

/// A failure attributed to one instance of a flushed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceFailure {
    pub oid: ObjectId,
    pub error: StoreError,
}

impl InstanceFailure {
    pub fn new(oid: ObjectId, error: StoreError) -> Self {
        Self { oid, error }
    }
}

// =============================================================================
// XA
// =============================================================================

/// Transaction branch identifier: one global transaction id, one branch per slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    pub global_id: u64,
    pub branch: SliceName,
}

impl Xid {
    pub fn new(global_id: u64, branch: SliceName) -> Self {
        Self { global_id, branch }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}.{}", self.global_id, self.branch)
    }
}

/// Outcome of the prepare phase for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Branch is prepared and must be committed or rolled back.
    Commit,
    /// Branch did no writes; it needs no second phase.
    ReadOnly,
}

/// Two-phase commit resource exposed by an XA-capable connection.
pub trait XaResource: Send {
    fn start(&mut self, xid: &Xid) -> Result<(), StoreError>;
    fn end(&mut self, xid: &Xid) -> Result<(), StoreError>;
    fn prepare(&mut self, xid: &Xid) -> Result<Vote, StoreError>;
    fn commit(&mut self, xid: &Xid, one_phase: bool) -> Result<(), StoreError>;
    fn rollback(&mut self, xid: &Xid) -> Result<(), StoreError>;
}

// =============================================================================
// Result cursors
// =============================================================================

/// Cursor over one slice's query results.
///
/// `open` must be called before `next`; `current` is only meaningful after
/// `next` returned `true`.
pub trait ResultProvider: Send {
    fn open(&mut self) -> Result<(), StoreError>;
    fn next(&mut self) -> Result<bool, StoreError>;
    fn current(&self) -> Option<&Row>;
    fn close(&mut self) -> Result<(), StoreError>;
}

/// A [`ResultProvider`] over rows that are already in memory.
#[derive(Debug, Default)]
pub struct RowsProvider {
    rows: Vec<Row>,
    position: Option<usize>,
    open: bool,
}

impl RowsProvider {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            position: None,
            open: false,
        }
    }
}

impl ResultProvider for RowsProvider {
    fn open(&mut self) -> Result<(), StoreError> {
        self.open = true;
        self.position = None;
        Ok(())
    }

    fn next(&mut self) -> Result<bool, StoreError> {
        if !self.open {
            return Err(StoreError::CursorNotOpen);
        }
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn current(&self) -> Option<&Row> {
        self.position.and_then(|p| self.rows.get(p))
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.open = false;
        Ok(())
    }
}

// =============================================================================
// Connections
// =============================================================================

/// A live session against one slice's database.
///
/// Statements run sequentially in call order on a connection.
pub trait Connection: Send {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
    fn close(&mut self) -> Result<(), StoreError>;

    /// Writes a batch, returning the instances that failed individually.
    ///
    /// An `Err` means the whole batch failed (e.g. the connection dropped).
    fn flush(&mut self, batch: &[&ManagedInstance]) -> Result<Vec<InstanceFailure>, StoreError>;

    fn exists(&mut self, oid: ObjectId) -> Result<bool, StoreError>;
    fn load(&mut self, oid: ObjectId) -> Result<Option<ManagedInstance>, StoreError>;
    fn query(&mut self, statement: &ShardStatement) -> Result<Box<dyn ResultProvider>, StoreError>;
    fn extent(&mut self, type_name: &str) -> Result<Box<dyn ResultProvider>, StoreError>;

    /// Runs a bulk update or delete, returning the affected row count.
    fn update(&mut self, statement: &ShardStatement) -> Result<u64, StoreError>;

    /// Allocates the next value of a named sequence.
    fn next_sequence(&mut self, name: &str) -> Result<u64, StoreError>;

    /// Returns the XA resource when the connection supports two-phase commit.
    fn xa_resource(&mut self) -> Option<&mut dyn XaResource> {
        None
    }
}

/// Hands out connections for configured slices.
pub trait ConnectionProvider: Send + Sync {
    fn connect(&self, slice: &Slice) -> Result<Box<dyn Connection>, StoreError>;
}

// =============================================================================
// SliceStoreManager
// =============================================================================

/// Owns the live connection of exactly one slice.
pub struct SliceStoreManager {
    slice: Slice,
    provider: Arc<dyn ConnectionProvider>,
    connection: Mutex<Option<Box<dyn Connection>>>,
}

impl fmt::Debug for SliceStoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceStoreManager")
            .field("slice", &self.slice.name())
            .field("master", &self.slice.is_master())
            .field("open", &self.is_open())
            .finish()
    }
}

impl SliceStoreManager {
    /// Creates a closed manager for a slice.
    pub fn new(slice: Slice, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            slice,
            provider,
            connection: Mutex::new(None),
        }
    }

    /// Returns the slice this manager serves.
    pub fn slice(&self) -> &Slice {
        &self.slice
    }

    /// Returns the slice name.
    pub fn name(&self) -> &SliceName {
        self.slice.name()
    }

    /// Connects to the slice. Does nothing if already connected.
    pub fn open(&self) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            let connection = self.provider.connect(&self.slice)?;
            tracing::debug!(slice = %self.slice.name(), "Slice connection opened");
            *guard = Some(connection);
        }
        Ok(())
    }

    /// Returns whether a connection is held.
    pub fn is_open(&self) -> bool {
        self.connection
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Releases the connection. Closing a closed manager is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        let taken = self.lock()?.take();
        match taken {
            Some(mut connection) => {
                tracing::debug!(slice = %self.slice.name(), "Closing slice connection");
                connection.close()
            }
            None => Ok(()),
        }
    }

    pub fn begin(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| conn.begin())
    }

    pub fn commit(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| conn.commit())
    }

    pub fn rollback(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| conn.rollback())
    }

    pub fn flush(&self, batch: &[&ManagedInstance]) -> Result<Vec<InstanceFailure>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.with_connection(|conn| conn.flush(batch))
    }

    pub fn exists(&self, oid: ObjectId) -> Result<bool, StoreError> {
        self.with_connection(|conn| conn.exists(oid))
    }

    pub fn load(&self, oid: ObjectId) -> Result<Option<ManagedInstance>, StoreError> {
        self.with_connection(|conn| conn.load(oid))
    }

    pub fn query(&self, statement: &ShardStatement) -> Result<Box<dyn ResultProvider>, StoreError> {
        self.with_connection(|conn| conn.query(statement))
    }

    pub fn extent(&self, type_name: &str) -> Result<Box<dyn ResultProvider>, StoreError> {
        self.with_connection(|conn| conn.extent(type_name))
    }

    pub fn update(&self, statement: &ShardStatement) -> Result<u64, StoreError> {
        self.with_connection(|conn| conn.update(statement))
    }

    pub fn next_sequence(&self, name: &str) -> Result<u64, StoreError> {
        self.with_connection(|conn| conn.next_sequence(name))
    }

    /// Returns whether the live connection exposes an XA resource.
    pub fn is_xa_capable(&self) -> Result<bool, StoreError> {
        self.with_connection(|conn| Ok(conn.xa_resource().is_some()))
    }

    pub fn xa_start(&self, xid: &Xid) -> Result<(), StoreError> {
        self.with_xa(|xa| xa.start(xid))
    }

    pub fn xa_end(&self, xid: &Xid) -> Result<(), StoreError> {
        self.with_xa(|xa| xa.end(xid))
    }

    pub fn xa_prepare(&self, xid: &Xid) -> Result<Vote, StoreError> {
        self.with_xa(|xa| xa.prepare(xid))
    }

    pub fn xa_commit(&self, xid: &Xid, one_phase: bool) -> Result<(), StoreError> {
        self.with_xa(|xa| xa.commit(xid, one_phase))
    }

    pub fn xa_rollback(&self, xid: &Xid) -> Result<(), StoreError> {
        self.with_xa(|xa| xa.rollback(xid))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Box<dyn Connection>>>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Poisoned(self.slice.name().clone()))
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        match guard.as_deref_mut() {
            Some(conn) => f(conn),
            None => Err(StoreError::NotConnected(self.slice.name().clone())),
        }
    }

    fn with_xa<T>(
        &self,
        f: impl FnOnce(&mut dyn XaResource) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let name = self.slice.name().clone();
        self.with_connection(|conn| match conn.xa_resource() {
            Some(xa) => f(xa),
            None => Err(StoreError::XaUnsupported(name)),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
