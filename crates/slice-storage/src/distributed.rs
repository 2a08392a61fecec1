//! The distributed store manager.
//!
//! ```text
//!                  DistributedStoreManager
//!                            |
//!     +-------------+--------+--------+----------------+
//!     |             |                 |                |
//! SliceRouter  ParallelExecutor  TransactionCoordinator  MergeContext
//!     |             |                 |                |
//!     +------> SliceStoreManager (one per slice) <-----+
//! ```
//!
//! The manager owns one [`SliceStoreManager`] per configured slice, a
//! bounded worker pool and the transaction currently in progress. Slices are
//! kept in configuration order, which is the enumeration order used for
//! fan-out and failure reporting.

use crate::config::{validate_slice_name, ConfigError, SliceDefinition, SliceStoreConfig};
use crate::mapper::{LogicalQuery, Mapper, PassThroughMapper, QueryRange, TargetHint};
use crate::merge::{MergeContext, MergeError, MergeStrategy, ResultMerger, ShardResult};
use crate::sharding::{
    AggregatedError, AllSlices, DistributionPolicy, ParallelExecutor, PolicyRegistry,
    QueryTargetPolicy, RoutingHint, RunOutcome, ShardFailure, SliceRouter,
};
use crate::slice::SliceStatus;
use crate::store::{ConnectionProvider, ResultProvider, RowsProvider, SliceStoreManager, StoreError};
use crate::transaction::{
    DistributedTransaction, FailureReport, TransactionCoordinator, TransactionError,
    TransactionState,
};
use crate::{Result, SliceError};
use slice_core::{ManagedInstance, ObjectId, Row, SliceName, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Opened cursors one slice returned for a query.
type SliceCursors = Vec<Box<dyn ResultProvider>>;

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`DistributedStoreManager`] from configuration and collaborators.
pub struct DistributedStoreManagerBuilder {
    config: SliceStoreConfig,
    provider: Arc<dyn ConnectionProvider>,
    mapper: Arc<dyn Mapper>,
    policy: Option<Arc<dyn DistributionPolicy>>,
    query_targets: Arc<dyn QueryTargetPolicy>,
    policies: PolicyRegistry,
}

impl DistributedStoreManagerBuilder {
    pub fn new(config: SliceStoreConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            config,
            provider,
            mapper: Arc::new(PassThroughMapper),
            policy: None,
            query_targets: Arc::new(AllSlices),
            policies: PolicyRegistry::with_defaults(),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn Mapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Uses `policy` instead of the one named in the configuration.
    pub fn with_policy(mut self, policy: Arc<dyn DistributionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_query_target_policy(mut self, targets: Arc<dyn QueryTargetPolicy>) -> Self {
        self.query_targets = targets;
        self
    }

    /// Registry used to resolve `policy.distribution` from the configuration.
    pub fn with_policy_registry(mut self, policies: PolicyRegistry) -> Self {
        self.policies = policies;
        self
    }

    /// Validates the configuration and connects every slice.
    ///
    /// In lenient mode a slice that fails to connect is left inactive; the
    /// master slice must always connect. Otherwise any failure aborts and
    /// closes the slices opened so far.
    pub fn open(self) -> Result<DistributedStoreManager> {
        self.config.validate()?;
        let policy = match self.policy {
            Some(policy) => policy,
            None => self.policies.create(&self.config.policy)?,
        };

        let master_index = self.config.master_index();
        let mut entries: Vec<SliceEntry> = Vec::with_capacity(self.config.slices.len());

        for slice in self.config.slices() {
            let is_master = slice.is_master();
            let name = slice.name().clone();
            let manager = Arc::new(SliceStoreManager::new(slice, Arc::clone(&self.provider)));

            let status = match manager.open() {
                Ok(()) => SliceStatus::Active,
                Err(e) if self.config.lenient && !is_master => {
                    tracing::warn!(slice = %name, error = %e, "Slice failed to connect, leaving it inactive");
                    SliceStatus::Inactive {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    tracing::error!(slice = %name, error = %e, "Slice failed to connect");
                    close_quietly(&entries);
                    if self.config.lenient {
                        return Err(ConfigError::MasterUnavailable(name).into());
                    }
                    return Err(SliceError::store(&name, e));
                }
            };
            entries.push(SliceEntry { manager, status });
        }

        let master = self.config.slices[master_index].name.clone();
        let threads = self
            .config
            .executor
            .worker_threads
            .unwrap_or(entries.len())
            .max(1);
        let executor = match ParallelExecutor::new(threads) {
            Ok(executor) => executor,
            Err(e) => {
                close_quietly(&entries);
                return Err(e.into());
            }
        };
        let coordinator = TransactionCoordinator::new(self.config.transaction.mode);

        tracing::info!(
            slices = entries.len(),
            active = entries.iter().filter(|e| e.status.is_active()).count(),
            master = %master,
            threads,
            policy = %policy.describe(),
            "Distributed store opened"
        );

        Ok(DistributedStoreManager {
            config: self.config,
            provider: self.provider,
            mapper: self.mapper,
            router: SliceRouter::new(policy),
            query_targets: self.query_targets,
            slices: RwLock::new(entries),
            master,
            executor,
            coordinator,
            transaction: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

fn close_quietly(entries: &[SliceEntry]) {
    for entry in entries {
        let _ = entry.manager.close();
    }
}

// =============================================================================
// Query results
// =============================================================================

/// An open, merged cursor over the answers of every targeted slice.
///
/// Dropping the result closes every slice cursor.
pub struct QueryResult {
    merger: Box<dyn ResultMerger>,
    slices: Vec<SliceName>,
}

impl QueryResult {
    fn new(merger: Box<dyn ResultMerger>, slices: Vec<SliceName>) -> Self {
        Self { merger, slices }
    }

    /// Slices that contributed to this result, in enumeration order.
    pub fn slices(&self) -> &[SliceName] {
        &self.slices
    }

    pub fn next(&mut self) -> Result<bool> {
        Ok(self.merger.next()?)
    }

    pub fn current(&self) -> Option<&Row> {
        self.merger.current()
    }

    pub fn close(&mut self) -> Result<()> {
        Ok(self.merger.close()?)
    }

    /// Drains the remaining rows and closes the cursor.
    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while self.merger.next()? {
            if let Some(row) = self.merger.current() {
                rows.push(row.clone());
            }
        }
        self.merger.close()?;
        Ok(rows)
    }
}

impl Drop for QueryResult {
    fn drop(&mut self) {
        let _ = self.merger.close();
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult").field("slices", &self.slices).finish()
    }
}

// =============================================================================
// DistributedStoreManager
// =============================================================================

struct SliceEntry {
    manager: Arc<SliceStoreManager>,
    status: SliceStatus,
}

/// One logical store backed by many slices.
pub struct DistributedStoreManager {
    config: SliceStoreConfig,
    provider: Arc<dyn ConnectionProvider>,
    mapper: Arc<dyn Mapper>,
    router: SliceRouter,
    query_targets: Arc<dyn QueryTargetPolicy>,
    slices: RwLock<Vec<SliceEntry>>,
    master: SliceName,
    executor: ParallelExecutor,
    coordinator: TransactionCoordinator,
    transaction: Mutex<Option<DistributedTransaction>>,
    closed: AtomicBool,
}

impl fmt::Debug for DistributedStoreManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedStoreManager")
            .field("slices", &self.slice_names())
            .field("master", &self.master)
            .field("policy", &self.router.policy().describe())
            .field("threads", &self.executor.threads())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DistributedStoreManager {
    pub fn builder(
        config: SliceStoreConfig,
        provider: Arc<dyn ConnectionProvider>,
    ) -> DistributedStoreManagerBuilder {
        DistributedStoreManagerBuilder::new(config, provider)
    }

    pub fn config(&self) -> &SliceStoreConfig {
        &self.config
    }

    /// The slice that allocates global sequence values.
    pub fn master(&self) -> &SliceName {
        &self.master
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Every configured slice, active or not, in enumeration order.
    pub fn slice_names(&self) -> Vec<SliceName> {
        self.entries().iter().map(|e| e.manager.name().clone()).collect()
    }

    /// Active slices in enumeration order.
    pub fn active_slices(&self) -> Vec<SliceName> {
        self.entries()
            .iter()
            .filter(|e| e.status.is_active())
            .map(|e| e.manager.name().clone())
            .collect()
    }

    pub fn slice_status(&self, name: &str) -> Option<SliceStatus> {
        self.entries()
            .iter()
            .find(|e| e.manager.name().as_str() == name)
            .map(|e| e.status.clone())
    }

    /// State of the current transaction, if one was begun.
    pub fn transaction_state(&self) -> Option<TransactionState> {
        lock(&self.transaction).as_ref().map(DistributedTransaction::state)
    }

    fn entries(&self) -> std::sync::RwLockReadGuard<'_, Vec<SliceEntry>> {
        match self.slices.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn active_managers(&self) -> Vec<Arc<SliceStoreManager>> {
        self.entries()
            .iter()
            .filter(|e| e.status.is_active())
            .map(|e| Arc::clone(&e.manager))
            .collect()
    }

    fn manager(&self, name: &SliceName) -> Result<Arc<SliceStoreManager>> {
        self.entries()
            .iter()
            .find(|e| e.status.is_active() && e.manager.name() == name)
            .map(|e| Arc::clone(&e.manager))
            .ok_or_else(|| SliceError::UnknownSlice(name.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SliceError::Closed)
        } else {
            Ok(())
        }
    }

    /// Narrows the active slices to a target hint.
    ///
    /// Names that are not configured at all are rejected; configured but
    /// inactive slices are skipped.
    fn narrow(&self, candidates: Vec<SliceName>, hint: &TargetHint) -> Result<Vec<SliceName>> {
        let configured = self.slice_names();
        if let Some(unknown) = hint.slices().find(|s| !configured.contains(s)) {
            return Err(SliceError::UnknownSlice(unknown.to_string()));
        }
        Ok(candidates.into_iter().filter(|s| hint.contains(s)).collect())
    }

    fn query_targets(&self, query: &LogicalQuery, active: &[SliceName]) -> Result<Vec<SliceName>> {
        match &query.target {
            Some(hint) if !hint.is_empty() => self.narrow(active.to_vec(), hint),
            _ => Ok(self.query_targets.targets(query, active)),
        }
    }

    // -------------------------------------------------------------------------
    // Flush
    // -------------------------------------------------------------------------

    /// Writes a batch of instances, each to the slice that owns it.
    ///
    /// Unassigned instances are placed by the distribution policy and tagged.
    /// One flush runs per non-empty slice. Failures are reported together,
    /// grouped by slice in enumeration order and by batch order within a slice.
    pub fn flush(&self, instances: &mut [ManagedInstance]) -> Result<()> {
        self.flush_with_hint(instances, &RoutingHint::new())
    }

    /// Like [`flush`](Self::flush), but untagged instances that appear in
    /// `hint` go back to the slice their query row came from instead of
    /// being placed by the policy.
    pub fn flush_with_hint(&self, instances: &mut [ManagedInstance], hint: &RoutingHint) -> Result<()> {
        self.ensure_open()?;
        if instances.is_empty() {
            return Ok(());
        }

        let managers = self.active_managers();
        let active: Vec<SliceName> = managers.iter().map(|m| m.name().clone()).collect();
        let bins = self.router.route(instances, &active, hint)?;
        let instances: &[ManagedInstance] = instances;

        let tasks: Vec<(SliceName, _)> = bins
            .non_empty()
            .filter_map(|(slice, indices)| {
                let manager = managers.iter().find(|m| m.name() == slice)?;
                let manager = Arc::clone(manager);
                let batch: Vec<&ManagedInstance> = indices.iter().map(|&i| &instances[i]).collect();
                Some((slice.clone(), move || manager.flush(&batch)))
            })
            .collect();

        tracing::debug!(
            instances = instances.len(),
            slices = tasks.len(),
            "Flushing batch"
        );

        let RunOutcome { successes, failures } = self.executor.run_all(tasks);

        let mut per_slice: HashMap<SliceName, Vec<ShardFailure>> = HashMap::new();
        for (slice, rejected) in successes {
            for failure in rejected {
                tracing::error!(slice = %slice, oid = %failure.oid, error = %failure.error, "Instance flush failed");
                per_slice
                    .entry(slice.clone())
                    .or_default()
                    .push(ShardFailure::for_instance(slice.clone(), failure.oid, failure.error));
            }
        }
        for failure in failures {
            per_slice.entry(failure.slice.clone()).or_default().push(failure);
        }
        if per_slice.is_empty() {
            return Ok(());
        }

        let ordered: Vec<ShardFailure> = bins
            .non_empty()
            .flat_map(|(slice, _)| per_slice.remove(slice).unwrap_or_default())
            .collect();
        Err(AggregatedError::new(ordered).into())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Runs a query on every targeted slice in parallel and merges the answers.
    ///
    /// Aggregate queries merge into a single row, queries with sort keys are
    /// merged in order, anything else is concatenated. The query's offset and
    /// limit apply to the merged stream.
    pub fn execute_query(&self, query: &LogicalQuery) -> Result<QueryResult> {
        self.ensure_open()?;
        let active = self.active_slices();
        let targets = self.query_targets(query, &active)?;

        let mut tasks = Vec::with_capacity(targets.len());
        for name in &targets {
            let manager = self.manager(name)?;
            let statements = self.mapper.translate(query, manager.slice())?;
            tasks.push((name.clone(), move || -> std::result::Result<SliceCursors, StoreError> {
                let mut providers: SliceCursors = Vec::with_capacity(statements.len());
                for statement in &statements {
                    let mut provider = manager.query(statement)?;
                    if let Err(e) = provider.open() {
                        close_providers(&mut providers);
                        return Err(e);
                    }
                    providers.push(provider);
                }
                Ok(providers)
            }));
        }

        let strategy = if query.is_aggregate() {
            MergeStrategy::UniqueAggregate(query.aggregate_kinds())
        } else if !query.sort_keys.is_empty() {
            MergeStrategy::Ordered(query.sort_keys.clone())
        } else {
            MergeStrategy::Concat
        };
        tracing::debug!(statement = %query.statement, slices = targets.len(), strategy = ?strategy, "Executing query");

        let shards = self.collect_shards(tasks)?;
        self.merged(shards, strategy, query.range, targets)
    }

    /// Scans every instance of a type across the targeted slices.
    ///
    /// Rows are `[oid, field values...]`, concatenated in slice order.
    pub fn execute_extent(&self, type_name: &str, target: Option<&TargetHint>) -> Result<QueryResult> {
        self.ensure_open()?;
        let active = self.active_slices();
        let targets = match target {
            Some(hint) if !hint.is_empty() => self.narrow(active, hint)?,
            _ => active,
        };

        let mut tasks = Vec::with_capacity(targets.len());
        for name in &targets {
            let manager = self.manager(name)?;
            let type_name = type_name.to_string();
            tasks.push((name.clone(), move || -> std::result::Result<SliceCursors, StoreError> {
                let mut provider = manager.extent(&type_name)?;
                provider.open()?;
                Ok(vec![provider])
            }));
        }
        tracing::debug!(type_name, slices = targets.len(), "Executing extent");

        let shards = self.collect_shards(tasks)?;
        self.merged(shards, MergeStrategy::Concat, None, targets)
    }

    /// Runs a bulk update on every targeted slice and returns the total row count.
    pub fn execute_update(&self, query: &LogicalQuery) -> Result<u64> {
        self.execute_write(query, "update")
    }

    /// Runs a bulk delete on every targeted slice and returns the total row count.
    pub fn execute_delete(&self, query: &LogicalQuery) -> Result<u64> {
        self.execute_write(query, "delete")
    }

    fn execute_write(&self, query: &LogicalQuery, operation: &str) -> Result<u64> {
        self.ensure_open()?;
        let active = self.active_slices();
        let targets = self.query_targets(query, &active)?;

        let mut tasks = Vec::with_capacity(targets.len());
        for name in &targets {
            let manager = self.manager(name)?;
            let statements = self.mapper.translate(query, manager.slice())?;
            tasks.push((name.clone(), move || -> std::result::Result<Vec<u64>, StoreError> {
                statements.iter().map(|statement| manager.update(statement)).collect()
            }));
        }
        tracing::debug!(operation, statement = %query.statement, slices = targets.len(), "Executing bulk write");

        let counts = self.executor.run_all(tasks).into_result()?;
        let mut shards = Vec::with_capacity(counts.len());
        for (slice, per_statement) in counts {
            let count = per_statement
                .into_iter()
                .try_fold(0_u64, u64::checked_add)
                .and_then(|count| i64::try_from(count).ok())
                .ok_or(MergeError::Overflow(0))?;
            let provider = RowsProvider::new(vec![Row::new(vec![Value::Int(count)])]);
            shards.push(ShardResult::new(slice, Box::new(provider)));
        }

        let mut merged = self.merged(shards, MergeStrategy::SumAggregate, None, targets)?;
        merged.next()?;
        let total = merged
            .current()
            .and_then(|row| row.get(0))
            .and_then(Value::as_int)
            .unwrap_or(0);
        merged.close()?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    fn collect_shards<F>(&self, tasks: Vec<(SliceName, F)>) -> Result<Vec<ShardResult>>
    where
        F: FnOnce() -> std::result::Result<SliceCursors, StoreError> + Send,
    {
        let outcome = self.executor.run_all(tasks);
        if !outcome.is_success() {
            for (_, mut providers) in outcome.successes {
                close_providers(&mut providers);
            }
            return Err(AggregatedError::new(outcome.failures).into());
        }

        let mut shards = Vec::new();
        for (slice, providers) in outcome.successes {
            for provider in providers {
                shards.push(ShardResult::new(slice.clone(), provider));
            }
        }
        Ok(shards)
    }

    fn merged(
        &self,
        shards: Vec<ShardResult>,
        strategy: MergeStrategy,
        range: Option<QueryRange>,
        slices: Vec<SliceName>,
    ) -> Result<QueryResult> {
        let mut merger = MergeContext::new(shards, strategy).with_range(range).into_merger();
        merger.open()?;
        Ok(QueryResult::new(merger, slices))
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Slices to probe for one instance, in enumeration order.
    ///
    /// A tagged instance is only looked for on its own slice. A target hint
    /// narrows the search but never moves an instance off its tag.
    fn probe_order(&self, tag: Option<&SliceName>, oid: ObjectId, target: Option<&TargetHint>) -> Result<Vec<SliceName>> {
        let active = self.active_slices();
        let candidates = match tag {
            Some(tag) if active.contains(tag) => vec![tag.clone()],
            Some(tag) => {
                return Err(SliceError::UnavailableSlice {
                    oid,
                    slice: tag.clone(),
                })
            }
            None => active,
        };
        match target {
            Some(hint) if !hint.is_empty() => self.narrow(candidates, hint),
            _ => Ok(candidates),
        }
    }

    /// Checks whether `instance` is stored on any slice.
    ///
    /// Slices are probed one at a time and the first one that has the
    /// instance wins; an unassigned instance is tagged with it.
    pub fn exists(&self, instance: &mut ManagedInstance, target: Option<&TargetHint>) -> Result<bool> {
        self.ensure_open()?;
        for name in self.probe_order(instance.slice(), instance.oid, target)? {
            let manager = self.manager(&name)?;
            if manager.exists(instance.oid).map_err(|e| SliceError::store(&name, e))? {
                if instance.is_unassigned() {
                    tracing::debug!(oid = %instance.oid, slice = %name, "Tagged instance found by probe");
                    instance.assign_slice(name)?;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Loads an instance from the first slice that has it, tagged with that slice.
    pub fn find(&self, oid: impl Into<ObjectId>, target: Option<&TargetHint>) -> Result<Option<ManagedInstance>> {
        self.ensure_open()?;
        let oid = oid.into();
        for name in self.probe_order(None, oid, target)? {
            let manager = self.manager(&name)?;
            if let Some(mut instance) = manager.load(oid).map_err(|e| SliceError::store(&name, e))? {
                instance.assign_slice(name)?;
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    /// Allocates the next value of a global sequence on the master slice.
    pub fn next_sequence(&self, name: &str) -> Result<u64> {
        self.ensure_open()?;
        let master = self.manager(&self.master)?;
        master
            .next_sequence(name)
            .map_err(|e| SliceError::store(&self.master, e))
    }

    /// Connects a new slice and makes it active.
    ///
    /// Refused while a transaction is open or waiting for rollback, since the
    /// new slice would take writes outside of it.
    pub fn add_slice(&self, definition: SliceDefinition) -> Result<()> {
        self.ensure_open()?;
        validate_slice_name(&definition.name)?;
        if definition.master {
            return Err(ConfigError::MultipleMasters {
                first: self.master.clone(),
                second: definition.name,
            }
            .into());
        }

        // held until the slice is active so `begin` sees it or nothing
        let slot = lock(&self.transaction);
        if let Some(tx) = slot.as_ref() {
            return Err(TransactionError::InProgress(tx.id()).into());
        }
        let mut entries = match self.slices.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.iter().any(|e| e.manager.name() == &definition.name) {
            return Err(ConfigError::DuplicateSlice(definition.name).into());
        }

        let manager = Arc::new(SliceStoreManager::new(
            definition.to_slice(false),
            Arc::clone(&self.provider),
        ));
        manager.open().map_err(|e| SliceError::store(&definition.name, e))?;
        tracing::info!(slice = %definition.name, "Slice added");
        entries.push(SliceEntry {
            manager,
            status: SliceStatus::Active,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Begins a transaction over every active slice.
    ///
    /// Does nothing if a transaction is already active. A transaction whose
    /// commit failed has to be rolled back before a new one can begin.
    pub fn begin(&self) -> Result<()> {
        self.ensure_open()?;
        let mut slot = lock(&self.transaction);
        match slot.as_ref() {
            Some(tx) if tx.is_active() => return Ok(()),
            Some(tx) if tx.state() == TransactionState::Failed => {
                return Err(TransactionError::RollbackRequired(tx.id()).into());
            }
            _ => {}
        }
        let mut tx = self.coordinator.create(self.active_managers());
        tx.begin()?;
        *slot = Some(tx);
        Ok(())
    }

    /// Commits the current transaction. Without one this does nothing.
    ///
    /// After a failed commit the transaction stays in place so that
    /// [`rollback`](Self::rollback) can clean up.
    pub fn commit(&self) -> Result<()> {
        let mut slot = lock(&self.transaction);
        let (result, finished) = match slot.as_mut() {
            Some(tx) => {
                let result = tx.commit();
                (result, tx.state().is_terminal())
            }
            None => return Ok(()),
        };
        if finished {
            *slot = None;
        }
        result
    }

    /// Rolls back the current transaction on every participant.
    ///
    /// Participant failures are logged and reported, never raised.
    pub fn rollback(&self) -> FailureReport {
        let mut slot = lock(&self.transaction);
        match slot.take() {
            Some(mut tx) => tx.rollback(),
            None => FailureReport::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Rolls back any open transaction, closes every slice and stops the pool.
    ///
    /// Every slice is closed even if some fail; the failures are returned
    /// together. Closing twice does nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let report = self.rollback();
        if !report.is_clean() {
            tracing::warn!(failures = report.failures.len(), "Rollback on close reported failures");
        }

        let mut failures = Vec::new();
        for entry in self.entries().iter() {
            if let Err(e) = entry.manager.close() {
                tracing::warn!(slice = %entry.manager.name(), error = %e, "Failed to close slice");
                failures.push(ShardFailure::new(entry.manager.name().clone(), e));
            }
        }
        self.executor.shutdown();
        tracing::info!(failures = failures.len(), "Distributed store closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregatedError::new(failures).into())
        }
    }
}

impl Drop for DistributedStoreManager {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

fn close_providers(providers: &mut SliceCursors) {
    for mut provider in providers.drain(..) {
        let _ = provider.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
