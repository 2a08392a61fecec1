//! In-memory slice databases.
//!
//! [`MemoryCluster`] is a [`ConnectionProvider`] whose slices live in process
//! memory. It supports both XA and plain connections and can inject failures
//! per slice, so the distributed store can be exercised end to end without
//! real databases.
//!
//! # Example
//!
//! ```ignore
//! use slice_storage::memory::{MemoryCluster, SliceBehavior};
//!
//! let cluster = MemoryCluster::new();
//! cluster.configure("West", SliceBehavior::default().without_xa());
//! cluster.set_results("East", "select name from Customer", rows);
//! ```
//!
//! Writes made inside a transaction stay pending until commit. Outside a
//! transaction every write is applied immediately.

use crate::mapper::ShardStatement;
use crate::slice::Slice;
use crate::store::{
    Connection, ConnectionProvider, InstanceFailure, ResultProvider, RowsProvider, StoreError,
    Vote, XaResource, Xid,
};
use slice_core::{FlushOperation, ManagedInstance, ObjectId, Row, SliceName, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

// =============================================================================
// Behavior
// =============================================================================

/// How one in-memory slice behaves.
#[derive(Debug, Clone)]
pub struct SliceBehavior {
    /// Whether connections expose an XA resource
    pub xa: bool,
    pub fail_connect: bool,
    pub fail_begin: bool,
    pub fail_flush: bool,
    pub fail_prepare: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_close: bool,
    pub fail_query: bool,
    /// Instances refused individually by `flush`
    pub rejected: BTreeSet<ObjectId>,
}

impl Default for SliceBehavior {
    fn default() -> Self {
        Self {
            xa: true,
            fail_connect: false,
            fail_begin: false,
            fail_flush: false,
            fail_prepare: false,
            fail_commit: false,
            fail_rollback: false,
            fail_close: false,
            fail_query: false,
            rejected: BTreeSet::new(),
        }
    }
}

impl SliceBehavior {
    pub fn without_xa(mut self) -> Self {
        self.xa = false;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn failing_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    /// Makes `flush` refuse one instance.
    pub fn rejecting(mut self, oid: impl Into<ObjectId>) -> Self {
        self.rejected.insert(oid.into());
        self
    }
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Debug, Default)]
struct SliceData {
    behavior: SliceBehavior,
    committed: BTreeMap<ObjectId, ManagedInstance>,
    results: HashMap<String, Vec<Row>>,
    update_counts: HashMap<String, u64>,
    sequences: HashMap<String, u64>,
    calls: Vec<String>,
}

/// A set of in-memory slice databases, shared by every connection.
///
/// Cloning is cheap and every clone sees the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    slices: Arc<Mutex<HashMap<SliceName, SliceData>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SliceName, SliceData>> {
        self.slices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_slice<T>(&self, slice: &SliceName, f: impl FnOnce(&mut SliceData) -> T) -> T {
        let mut slices = self.lock();
        f(slices.entry(slice.clone()).or_default())
    }

    /// Sets the behavior of a slice.
    pub fn configure(&self, slice: impl Into<SliceName>, behavior: SliceBehavior) {
        self.with_slice(&slice.into(), |data| data.behavior = behavior);
    }

    /// Registers the rows a slice returns for a statement text.
    pub fn set_results(&self, slice: impl Into<SliceName>, statement: impl Into<String>, rows: Vec<Row>) {
        self.with_slice(&slice.into(), |data| {
            data.results.insert(statement.into(), rows);
        });
    }

    /// Registers the affected-row count a slice reports for an update statement.
    pub fn set_update_count(&self, slice: impl Into<SliceName>, statement: impl Into<String>, count: u64) {
        self.with_slice(&slice.into(), |data| {
            data.update_counts.insert(statement.into(), count);
        });
    }

    /// Stores an instance as already committed.
    pub fn insert(&self, slice: impl Into<SliceName>, instance: ManagedInstance) {
        self.with_slice(&slice.into(), |data| {
            data.committed.insert(instance.oid, instance);
        });
    }

    /// Number of committed instances in a slice.
    pub fn stored_count(&self, slice: &str) -> usize {
        self.with_slice(&SliceName::new(slice), |data| data.committed.len())
    }

    /// Whether a slice holds a committed instance.
    pub fn contains(&self, slice: &str, oid: impl Into<ObjectId>) -> bool {
        let oid = oid.into();
        self.with_slice(&SliceName::new(slice), |data| data.committed.contains_key(&oid))
    }

    /// Operations issued against a slice, in order.
    pub fn calls(&self, slice: &str) -> Vec<String> {
        self.with_slice(&SliceName::new(slice), |data| data.calls.clone())
    }

    /// Forgets the recorded operations of every slice.
    pub fn clear_calls(&self) {
        for data in self.lock().values_mut() {
            data.calls.clear();
        }
    }
}

impl ConnectionProvider for MemoryCluster {
    fn connect(&self, slice: &Slice) -> Result<Box<dyn Connection>, StoreError> {
        let name = slice.name().clone();
        let xa = self.with_slice(&name, |data| {
            if data.behavior.fail_connect {
                Err(StoreError::Connection(format!("slice '{}' refused the connection", name)))
            } else {
                Ok(data.behavior.xa)
            }
        })?;
        Ok(Box::new(MemoryConnection {
            cluster: self.clone(),
            slice: name,
            xa,
            in_transaction: false,
            pending: Vec::new(),
        }))
    }
}

// =============================================================================
// Connection
// =============================================================================

/// A connection to one in-memory slice.
#[derive(Debug)]
pub struct MemoryConnection {
    cluster: MemoryCluster,
    slice: SliceName,
    xa: bool,
    in_transaction: bool,
    pending: Vec<(FlushOperation, ManagedInstance)>,
}

impl MemoryConnection {
    /// Records `call`, failing when `fails` says so.
    fn call(&self, call: &str, fails: impl FnOnce(&SliceBehavior) -> bool) -> Result<(), StoreError> {
        self.cluster.with_slice(&self.slice, |data| {
            data.calls.push(call.to_string());
            if fails(&data.behavior) {
                Err(StoreError::Statement(format!("{} failed on slice '{}'", call, self.slice)))
            } else {
                Ok(())
            }
        })
    }

    fn open_transaction(&mut self) {
        self.in_transaction = true;
        self.pending.clear();
    }

    fn apply_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.cluster.with_slice(&self.slice, |data| {
            for (op, instance) in pending {
                apply(&mut data.committed, op, instance);
            }
        });
        self.in_transaction = false;
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
        self.in_transaction = false;
    }

    /// Whether `oid` exists as seen from this connection.
    fn visible(&self, committed: &BTreeMap<ObjectId, ManagedInstance>, oid: ObjectId) -> bool {
        let mut present = committed.contains_key(&oid);
        for (op, instance) in &self.pending {
            if instance.oid == oid {
                present = *op != FlushOperation::Delete;
            }
        }
        present
    }
}

fn apply(committed: &mut BTreeMap<ObjectId, ManagedInstance>, op: FlushOperation, instance: ManagedInstance) {
    match op {
        FlushOperation::Insert | FlushOperation::Update => {
            committed.insert(instance.oid, instance);
        }
        FlushOperation::Delete => {
            committed.remove(&instance.oid);
        }
        FlushOperation::None => {}
    }
}

/// `[oid, field values...]`. Fails for object ids outside the `Int` range.
fn extent_row(instance: &ManagedInstance, slice: &SliceName) -> Result<Row, StoreError> {
    let oid = i64::try_from(instance.oid.as_u64()).map_err(|_| {
        StoreError::Statement(format!("object id {} does not fit in an extent row", instance.oid))
    })?;
    let mut values = Vec::with_capacity(instance.fields.len() + 1);
    values.push(Value::Int(oid));
    values.extend(instance.fields.values().cloned());
    Ok(Row::new(values).with_origin(slice.clone()))
}

impl Connection for MemoryConnection {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.call("begin", |b| b.fail_begin)?;
        self.open_transaction();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.call("commit", |b| b.fail_commit)?;
        self.apply_pending();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.call("rollback", |b| b.fail_rollback)?;
        self.discard_pending();
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.discard_pending();
        self.call("close", |b| b.fail_close)
    }

    fn flush(&mut self, batch: &[&ManagedInstance]) -> Result<Vec<InstanceFailure>, StoreError> {
        self.call("flush", |b| b.fail_flush)?;

        let (rejected, committed) = self.cluster.with_slice(&self.slice, |data| {
            (data.behavior.rejected.clone(), data.committed.clone())
        });

        let mut failures = Vec::new();
        let mut accepted = Vec::new();
        for instance in batch {
            let oid = instance.oid;
            let op = instance.state.flush_operation();
            let present = self.visible(&committed, oid)
                || accepted.iter().any(|(o, i): &(FlushOperation, ManagedInstance)| {
                    i.oid == oid && *o != FlushOperation::Delete
                });
            let outcome = if rejected.contains(&oid) {
                Err(StoreError::Statement(format!("{} rejected by slice '{}'", oid, self.slice)))
            } else {
                match op {
                    FlushOperation::Insert if present => Err(StoreError::DuplicateKey(oid)),
                    FlushOperation::Update | FlushOperation::Delete if !present => {
                        Err(StoreError::NotFound(oid))
                    }
                    _ => Ok(()),
                }
            };
            match outcome {
                Ok(()) if op != FlushOperation::None => accepted.push((op, (*instance).clone())),
                Ok(()) => {}
                Err(e) => failures.push(InstanceFailure::new(oid, e)),
            }
        }

        if self.in_transaction {
            self.pending.extend(accepted);
        } else {
            self.cluster.with_slice(&self.slice, |data| {
                for (op, instance) in accepted {
                    apply(&mut data.committed, op, instance);
                }
            });
        }
        Ok(failures)
    }

    fn exists(&mut self, oid: ObjectId) -> Result<bool, StoreError> {
        let committed = self.cluster.with_slice(&self.slice, |data| data.committed.clone());
        Ok(self.visible(&committed, oid))
    }

    fn load(&mut self, oid: ObjectId) -> Result<Option<ManagedInstance>, StoreError> {
        let pending = self
            .pending
            .iter()
            .rev()
            .find(|(_, instance)| instance.oid == oid)
            .map(|(op, instance)| (*op, instance.clone()));
        if let Some((op, instance)) = pending {
            return Ok((op != FlushOperation::Delete).then_some(instance));
        }
        Ok(self
            .cluster
            .with_slice(&self.slice, |data| data.committed.get(&oid).cloned()))
    }

    fn query(&mut self, statement: &ShardStatement) -> Result<Box<dyn ResultProvider>, StoreError> {
        self.call("query", |b| b.fail_query)?;
        let mut rows = self.cluster.with_slice(&self.slice, |data| {
            data.results.get(&statement.text).cloned().unwrap_or_default()
        });
        if let Some(limit) = statement.limit {
            rows.truncate(limit);
        }
        Ok(Box::new(RowsProvider::new(rows)))
    }

    fn extent(&mut self, type_name: &str) -> Result<Box<dyn ResultProvider>, StoreError> {
        self.call("extent", |b| b.fail_query)?;
        let rows = self.cluster.with_slice(&self.slice, |data| {
            data.committed
                .values()
                .filter(|instance| instance.type_name == type_name)
                .map(|instance| extent_row(instance, &self.slice))
                .collect::<Result<Vec<Row>, StoreError>>()
        })?;
        Ok(Box::new(RowsProvider::new(rows)))
    }

    fn update(&mut self, statement: &ShardStatement) -> Result<u64, StoreError> {
        self.call("update", |b| b.fail_query)?;
        Ok(self.cluster.with_slice(&self.slice, |data| {
            data.update_counts.get(&statement.text).copied().unwrap_or(0)
        }))
    }

    fn next_sequence(&mut self, name: &str) -> Result<u64, StoreError> {
        self.call("sequence", |_| false)?;
        Ok(self.cluster.with_slice(&self.slice, |data| {
            let value = data.sequences.entry(name.to_string()).or_insert(0);
            *value += 1;
            *value
        }))
    }

    fn xa_resource(&mut self) -> Option<&mut dyn XaResource> {
        if self.xa {
            Some(self)
        } else {
            None
        }
    }
}

impl XaResource for MemoryConnection {
    fn start(&mut self, _xid: &Xid) -> Result<(), StoreError> {
        self.call("xa_start", |b| b.fail_begin)?;
        self.open_transaction();
        Ok(())
    }

    fn end(&mut self, _xid: &Xid) -> Result<(), StoreError> {
        self.call("xa_end", |_| false)
    }

    fn prepare(&mut self, _xid: &Xid) -> Result<Vote, StoreError> {
        self.call("xa_prepare", |b| b.fail_prepare)?;
        Ok(if self.pending.is_empty() {
            Vote::ReadOnly
        } else {
            Vote::Commit
        })
    }

    fn commit(&mut self, _xid: &Xid, one_phase: bool) -> Result<(), StoreError> {
        let call = if one_phase { "xa_commit_one_phase" } else { "xa_commit" };
        self.call(call, |b| b.fail_commit)?;
        self.apply_pending();
        Ok(())
    }

    fn rollback(&mut self, _xid: &Xid) -> Result<(), StoreError> {
        self.call("xa_rollback", |b| b.fail_rollback)?;
        self.discard_pending();
        Ok(())
    }
}
