//! Distributed transaction coordination.
//!
//! One [`DistributedTransaction`] drives begin/commit/rollback over every
//! participating slice.
//!
//! # Protocols
//!
//! - **XA**: used when every participant exposes an XA resource. Commit ends
//!   each branch, prepares all of them, then commits the branches that voted
//!   to commit. A single branch is committed in one phase.
//! - **Naive**: plain sequential commit or rollback on each connection, in
//!   participant order. Failures are collected and the remaining participants
//!   are still visited.
//!
//! # State machine
//!
//! ```text
//! NotStarted ──begin──► Active ──commit──► Committed
//!                         │  └───commit fails──► Failed ──rollback──┐
//!                         └──────rollback──────────────────────────►RolledBack
//! ```
//!
//! A transaction is single-use: `begin` after termination is an error, while
//! `commit` and `rollback` outside `Active` do nothing.

use crate::config::ConfigError;
use crate::sharding::{AggregatedError, ShardFailure};
use crate::store::{SliceStoreManager, StoreError, Vote, Xid};
use crate::Result;
use serde::{Deserialize, Serialize};
use slice_core::SliceName;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Identifier of a distributed transaction.
pub type TransactionId = u64;

/// Errors related to distributed transactions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Transaction {0} has already terminated")]
    Terminated(TransactionId),

    #[error("Transaction {id} failed to begin: {source}")]
    BeginFailed {
        id: TransactionId,
        source: AggregatedError,
    },

    #[error("Transaction {id} was rolled back after prepare failed: {source}")]
    PrepareFailed {
        id: TransactionId,
        source: AggregatedError,
    },

    #[error("Transaction {id} failed to commit: {source}")]
    CommitFailed {
        id: TransactionId,
        source: AggregatedError,
    },

    #[error("Transaction {0} failed and must be rolled back first")]
    RollbackRequired(TransactionId),

    #[error("Transaction {0} is in progress")]
    InProgress(TransactionId),
}

/// Configured transaction protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// XA when every participant supports it, naive otherwise.
    #[default]
    Auto,
    /// Two-phase commit required.
    Xa,
    /// Sequential best-effort commit.
    Naive,
}

/// Error for an unrecognized `transaction.mode` value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown transaction mode '{0}' (expected auto, xa or naive)")]
pub struct UnknownTransactionMode(pub String);

impl FromStr for TransactionMode {
    type Err = UnknownTransactionMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TransactionMode::Auto),
            "xa" => Ok(TransactionMode::Xa),
            "naive" => Ok(TransactionMode::Naive),
            other => Err(UnknownTransactionMode(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionMode::Auto => "auto",
            TransactionMode::Xa => "xa",
            TransactionMode::Naive => "naive",
        };
        f.write_str(name)
    }
}

/// The protocol a started transaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Xa,
    Naive,
}

/// The state of a distributed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    /// Commit reported failures; only `rollback` moves on from here.
    Failed,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// True for `Committed` and `RolledBack`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

/// Participant failures collected by a best-effort rollback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureReport {
    pub failures: Vec<ShardFailure>,
}

impl FailureReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// DistributedTransaction
// =============================================================================

/// One logical transaction spanning a set of slices.
pub struct DistributedTransaction {
    id: TransactionId,
    mode: TransactionMode,
    participants: Vec<Arc<SliceStoreManager>>,
    protocol: Option<Protocol>,
    state: TransactionState,
    branches_ended: bool,
}

impl fmt::Debug for DistributedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedTransaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .field("participants", &self.participant_names())
            .finish()
    }
}

impl DistributedTransaction {
    fn new(id: TransactionId, mode: TransactionMode, participants: Vec<Arc<SliceStoreManager>>) -> Self {
        Self {
            id,
            mode,
            participants,
            protocol: None,
            state: TransactionState::NotStarted,
            branches_ended: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// The protocol chosen by `begin`, if started.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn participant_names(&self) -> Vec<&SliceName> {
        self.participants.iter().map(|p| p.name()).collect()
    }

    fn xid(&self, participant: &SliceStoreManager) -> Xid {
        Xid::new(self.id, participant.name().clone())
    }

    /// Starts the transaction on every participant.
    ///
    /// Calling `begin` on an active transaction does nothing. If a participant
    /// fails to start, the ones already started are rolled back and the
    /// transaction stays `NotStarted`.
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Active => return Ok(()),
            TransactionState::NotStarted => {}
            _ => return Err(TransactionError::Terminated(self.id).into()),
        }

        let protocol = self.resolve_protocol()?;
        let mut started: Vec<usize> = Vec::with_capacity(self.participants.len());
        let mut failure = None;

        for (i, participant) in self.participants.iter().enumerate() {
            let result = match protocol {
                Protocol::Xa => participant.xa_start(&self.xid(participant)),
                Protocol::Naive => participant.begin(),
            };
            match result {
                Ok(()) => started.push(i),
                Err(e) => {
                    failure = Some(ShardFailure::new(participant.name().clone(), e));
                    break;
                }
            }
        }

        if let Some(failure) = failure {
            tracing::warn!(
                tx = self.id,
                slice = %failure.slice,
                error = %failure.error,
                "Transaction begin failed, undoing started participants"
            );
            for i in started {
                let participant = &self.participants[i];
                let undo = match protocol {
                    Protocol::Xa => {
                        let xid = self.xid(participant);
                        participant.xa_end(&xid).and_then(|()| participant.xa_rollback(&xid))
                    }
                    Protocol::Naive => participant.rollback(),
                };
                if let Err(e) = undo {
                    tracing::warn!(tx = self.id, slice = %participant.name(), error = %e, "Undo after failed begin failed");
                }
            }
            return Err(TransactionError::BeginFailed {
                id: self.id,
                source: AggregatedError::new(vec![failure]),
            }
            .into());
        }

        self.protocol = Some(protocol);
        self.state = TransactionState::Active;
        self.branches_ended = false;
        tracing::debug!(tx = self.id, ?protocol, participants = self.participants.len(), "Transaction started");
        Ok(())
    }

    fn resolve_protocol(&self) -> Result<Protocol> {
        if self.mode == TransactionMode::Naive {
            return Ok(Protocol::Naive);
        }

        let mut failures = Vec::new();
        let mut first_plain: Option<&SliceName> = None;
        for participant in &self.participants {
            match participant.is_xa_capable() {
                Ok(true) => {}
                Ok(false) => {
                    first_plain.get_or_insert(participant.name());
                }
                Err(e) => failures.push(ShardFailure::new(participant.name().clone(), e)),
            }
        }
        if !failures.is_empty() {
            return Err(TransactionError::BeginFailed {
                id: self.id,
                source: AggregatedError::new(failures),
            }
            .into());
        }

        match (self.mode, first_plain) {
            (TransactionMode::Xa, Some(slice)) => Err(ConfigError::NotXaCapable { slice: slice.clone() }.into()),
            (_, None) => Ok(Protocol::Xa),
            (_, Some(_)) => Ok(Protocol::Naive),
        }
    }

    /// Commits every participant.
    ///
    /// Does nothing unless the transaction is `Active`. On failure the
    /// transaction leaves `Active` anyway: a failed XA prepare rolls every
    /// branch back (`RolledBack`), any other commit failure leaves it
    /// `Failed` for the caller to roll back.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Ok(());
        }

        let outcome = match self.protocol {
            Some(Protocol::Xa) => self.commit_xa(),
            _ => self.commit_naive(),
        };

        match outcome {
            Ok(()) => {
                self.state = TransactionState::Committed;
                tracing::info!(tx = self.id, participants = self.participants.len(), "Transaction committed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(tx = self.id, error = %e, "Transaction commit failed");
                Err(e.into())
            }
        }
    }

    fn commit_naive(&mut self) -> std::result::Result<(), TransactionError> {
        let failures: Vec<ShardFailure> = self
            .participants
            .iter()
            .filter_map(|p| p.commit().err().map(|e| ShardFailure::new(p.name().clone(), e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            self.state = TransactionState::Failed;
            Err(TransactionError::CommitFailed {
                id: self.id,
                source: AggregatedError::new(failures),
            })
        }
    }

    fn commit_xa(&mut self) -> std::result::Result<(), TransactionError> {
        let end_failures = self.for_each_branch(|p, xid| p.xa_end(xid));
        self.branches_ended = true;
        if !end_failures.is_empty() {
            return Err(self.abort_prepare(end_failures));
        }

        if self.participants.len() == 1 {
            let failures = self.for_each_branch(|p, xid| p.xa_commit(xid, true));
            return self.finish_commit(failures);
        }

        let mut votes = Vec::with_capacity(self.participants.len());
        let mut prepare_failures = Vec::new();
        for participant in &self.participants {
            match participant.xa_prepare(&self.xid(participant)) {
                Ok(vote) => votes.push(vote),
                Err(e) => prepare_failures.push(ShardFailure::new(participant.name().clone(), e)),
            }
        }
        if !prepare_failures.is_empty() {
            return Err(self.abort_prepare(prepare_failures));
        }

        let mut failures = Vec::new();
        for (participant, vote) in self.participants.iter().zip(votes) {
            if vote == Vote::ReadOnly {
                continue;
            }
            if let Err(e) = participant.xa_commit(&self.xid(participant), false) {
                failures.push(ShardFailure::new(participant.name().clone(), e));
            }
        }
        self.finish_commit(failures)
    }

    fn finish_commit(&mut self, failures: Vec<ShardFailure>) -> std::result::Result<(), TransactionError> {
        if failures.is_empty() {
            return Ok(());
        }
        self.state = TransactionState::Failed;
        Err(TransactionError::CommitFailed {
            id: self.id,
            source: AggregatedError::new(failures),
        })
    }

    /// Rolls back every branch after a failed prepare phase.
    fn abort_prepare(&mut self, failures: Vec<ShardFailure>) -> TransactionError {
        let report = self.rollback_branches();
        for failure in &report.failures {
            tracing::warn!(tx = self.id, slice = %failure.slice, error = %failure.error, "Branch rollback failed");
        }
        self.state = TransactionState::RolledBack;
        TransactionError::PrepareFailed {
            id: self.id,
            source: AggregatedError::new(failures),
        }
    }

    /// Rolls back every participant, best effort.
    ///
    /// Does nothing unless the transaction is `Active` or `Failed`. A
    /// participant that fails to roll back is logged and reported; the rest
    /// are still rolled back. Always ends in `RolledBack`.
    pub fn rollback(&mut self) -> FailureReport {
        if !matches!(self.state, TransactionState::Active | TransactionState::Failed) {
            return FailureReport::default();
        }

        let report = match self.protocol {
            Some(Protocol::Xa) => {
                if !self.branches_ended {
                    // Ending an already-failed branch may fail; the rollback below still runs.
                    for failure in self.for_each_branch(|p, xid| p.xa_end(xid)) {
                        tracing::debug!(tx = self.id, slice = %failure.slice, error = %failure.error, "Branch end before rollback failed");
                    }
                    self.branches_ended = true;
                }
                self.rollback_branches()
            }
            _ => FailureReport {
                failures: self
                    .participants
                    .iter()
                    .filter_map(|p| p.rollback().err().map(|e| ShardFailure::new(p.name().clone(), e)))
                    .collect(),
            },
        };

        for failure in &report.failures {
            tracing::warn!(tx = self.id, slice = %failure.slice, error = %failure.error, "Participant rollback failed");
        }
        self.state = TransactionState::RolledBack;
        tracing::info!(tx = self.id, failures = report.failures.len(), "Transaction rolled back");
        report
    }

    fn rollback_branches(&self) -> FailureReport {
        FailureReport {
            failures: self.for_each_branch(|p, xid| p.xa_rollback(xid)),
        }
    }

    fn for_each_branch(
        &self,
        mut op: impl FnMut(&SliceStoreManager, &Xid) -> std::result::Result<(), StoreError>,
    ) -> Vec<ShardFailure> {
        self.participants
            .iter()
            .filter_map(|p| {
                let xid = self.xid(p);
                op(p, &xid).err().map(|e| ShardFailure::new(p.name().clone(), e))
            })
            .collect()
    }
}

// =============================================================================
// TransactionCoordinator
// =============================================================================

/// Hands out distributed transactions with unique, increasing ids.
#[derive(Debug)]
pub struct TransactionCoordinator {
    next_id: AtomicU64,
    mode: TransactionMode,
}

impl TransactionCoordinator {
    pub fn new(mode: TransactionMode) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            mode,
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Creates a new, not yet started transaction over `participants`.
    pub fn create(&self, participants: Vec<Arc<SliceStoreManager>>) -> DistributedTransaction {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        DistributedTransaction::new(id, self.mode, participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCluster, SliceBehavior};
    use crate::slice::Slice;
    use crate::SliceError;
    use slice_core::ManagedInstance;
    use std::collections::BTreeMap;

    fn participants(cluster: &MemoryCluster, names: &[&str]) -> Vec<Arc<SliceStoreManager>> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let manager = SliceStoreManager::new(
                    Slice::new(*name, BTreeMap::new(), i == 0),
                    Arc::new(cluster.clone()),
                );
                manager.open().unwrap();
                Arc::new(manager)
            })
            .collect()
    }

    fn write(participant: &SliceStoreManager, oid: u64) {
        let pc = ManagedInstance::new(oid, "Customer");
        assert!(participant.flush(&[&pc]).unwrap().is_empty());
    }

    fn count(cluster: &MemoryCluster, slice: &str, call: &str) -> usize {
        cluster.calls(slice).iter().filter(|c| c.as_str() == call).count()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("XA".parse::<TransactionMode>(), Ok(TransactionMode::Xa));
        assert_eq!(" naive ".parse::<TransactionMode>(), Ok(TransactionMode::Naive));
        assert!("eventual".parse::<TransactionMode>().is_err());
        assert_eq!(TransactionMode::Auto.to_string(), "auto");
    }

    #[test]
    fn test_ids_increase() {
        let coordinator = TransactionCoordinator::new(TransactionMode::Auto);
        let a = coordinator.create(Vec::new());
        let b = coordinator.create(Vec::new());
        assert!(b.id() > a.id());
        assert_eq!(a.state(), TransactionState::NotStarted);
    }

    #[test]
    fn test_begin_is_idempotent() {
        let cluster = MemoryCluster::new();
        let coordinator = TransactionCoordinator::new(TransactionMode::Auto);
        let mut tx = coordinator.create(participants(&cluster, &["A", "B"]));

        tx.begin().unwrap();
        tx.begin().unwrap();
        assert!(tx.is_active());
        assert_eq!(tx.protocol(), Some(Protocol::Xa));
        assert_eq!(count(&cluster, "A", "xa_start"), 1);
        assert_eq!(count(&cluster, "B", "xa_start"), 1);
    }

    #[test]
    fn test_commit_and_rollback_outside_active_are_noops() {
        let cluster = MemoryCluster::new();
        let coordinator = TransactionCoordinator::new(TransactionMode::Naive);
        let mut tx = coordinator.create(participants(&cluster, &["A"]));

        tx.commit().unwrap();
        assert!(tx.rollback().is_clean());
        assert_eq!(tx.state(), TransactionState::NotStarted);

        tx.begin().unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);

        tx.commit().unwrap();
        assert!(tx.rollback().is_clean());
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(count(&cluster, "A", "commit"), 1);
        assert_eq!(count(&cluster, "A", "rollback"), 0);
    }

    #[test]
    fn test_begin_after_termination_fails() {
        let cluster = MemoryCluster::new();
        let coordinator = TransactionCoordinator::new(TransactionMode::Naive);
        let mut tx = coordinator.create(participants(&cluster, &["A"]));
        tx.begin().unwrap();
        tx.rollback();

        let err = tx.begin().unwrap_err();
        assert!(matches!(
            err,
            SliceError::Transaction(TransactionError::Terminated(id)) if id == tx.id()
        ));
    }

    #[test]
    fn test_xa_two_phase_commit() {
        let cluster = MemoryCluster::new();
        let coordinator = TransactionCoordinator::new(TransactionMode::Xa);
        let parts = participants(&cluster, &["A", "B"]);
        let mut tx = coordinator.create(parts.clone());

        tx.begin().unwrap();
        write(&parts[0], 1);
        write(&parts[1], 2);
        assert_eq!(cluster.stored_count("A"), 0);

        tx.commit().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(cluster.stored_count("A"), 1);
        assert_eq!(cluster.stored_count("B"), 1);
        for slice in ["A", "B"] {
            assert_eq!(
                cluster.calls(slice),
                vec!["xa_start", "flush", "xa_end", "xa_prepare", "xa_commit"]
            );
        }
    }

    #[test]
    fn test_xa_single_branch_commits_in_one_phase() {
        let cluster = MemoryCluster::new();
        let coordinator = TransactionCoordinator::new(TransactionMode::Auto);
        let parts = participants(&cluster, &["A"]);
        let mut tx = coordinator.create(parts.clone());

        tx.begin().unwrap();
        write(&parts[0], 1);
        tx.commit().unwrap();

        assert_eq!(count(&cluster, "A", "xa_prepare"), 0);
        assert_eq!(count(&cluster, "A", "xa_commit_one_phase"), 1);
        assert_eq!(cluster.stored_count("A"), 1);
    }

    #[test]
    fn test_xa_read_only_branch_skips_second_phase() {
        let cluster = MemoryCluster::new();
        let coordinator = TransactionCoordinator::new(TransactionMode::Xa);
        let parts = participants(&cluster, &["A", "B"]);
        let mut tx = coordinator.create(parts.clone());

        tx.begin().unwrap();
        write(&parts[0], 1);
        tx.commit().unwrap();

        assert_eq!(count(&cluster, "A", "xa_commit"), 1);
        assert_eq!(count(&cluster, "B", "xa_prepare"), 1);
        assert_eq!(count(&cluster, "B", "xa_commit"), 0);
    }

    #[test]
    fn test_xa_prepare_failure_rolls_back_everything() {
        let cluster = MemoryCluster::new();
        cluster.configure("B", SliceBehavior::default().failing_prepare());
        let coordinator = TransactionCoordinator::new(TransactionMode::Xa);
        let parts = participants(&cluster, &["A", "B", "C"]);
        let mut tx = coordinator.create(parts.clone());

        tx.begin().unwrap();
        for (i, p) in parts.iter().enumerate() {
            write(p, i as u64);
        }

        let err = tx.commit().unwrap_err();
        match err {
            SliceError::Transaction(TransactionError::PrepareFailed { source, .. }) => {
                assert_eq!(source.failures().len(), 1);
                assert_eq!(source.failures()[0].slice.as_str(), "B");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tx.state(), TransactionState::RolledBack);
        for slice in ["A", "B", "C"] {
            assert_eq!(count(&cluster, slice, "xa_rollback"), 1);
            assert_eq!(cluster.stored_count(slice), 0);
        }
        // Terminated: rollback is now a no-op
        assert!(tx.rollback().is_clean());
    }

    #[test]
    fn test_xa_required_but_participant_lacks_it() {
        let cluster = MemoryCluster::new();
        cluster.configure("B", SliceBehavior::default().without_xa());
        let coordinator = TransactionCoordinator::new(TransactionMode::Xa);
        let mut tx = coordinator.create(participants(&cluster, &["A", "B"]));

        let err = tx.begin().unwrap_err();
        assert!(matches!(
            err,
            SliceError::Config(ConfigError::NotXaCapable { ref slice }) if slice.as_str() == "B"
        ));
        assert_eq!(tx.state(), TransactionState::NotStarted);
        assert_eq!(count(&cluster, "A", "xa_start"), 0);
    }

    #[test]
    fn test_auto_falls_back_to_naive() {
        let cluster = MemoryCluster::new();
        cluster.configure("B", SliceBehavior::default().without_xa());
        let coordinator = TransactionCoordinator::new(TransactionMode::Auto);
        let mut tx = coordinator.create(participants(&cluster, &["A", "B"]));

        tx.begin().unwrap();
        assert_eq!(tx.protocol(), Some(Protocol::Naive));
        assert_eq!(count(&cluster, "A", "begin"), 1);
        assert_eq!(count(&cluster, "B", "begin"), 1);
    }

    #[test]
    fn test_naive_commit_continues_past_failures() {
        let cluster = MemoryCluster::new();
        cluster.configure("B", SliceBehavior::default().failing_commit());
        let coordinator = TransactionCoordinator::new(TransactionMode::Naive);
        let parts = participants(&cluster, &["A", "B", "C"]);
        let mut tx = coordinator.create(parts.clone());

        tx.begin().unwrap();
        for (i, p) in parts.iter().enumerate() {
            write(p, i as u64);
        }

        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            SliceError::Transaction(TransactionError::CommitFailed { ref source, .. })
                if source.failed_slices() == vec![&SliceName::new("B")]
        ));
        assert_eq!(tx.state(), TransactionState::Failed);
        assert_eq!(cluster.stored_count("A"), 1);
        assert_eq!(cluster.stored_count("B"), 0);
        assert_eq!(cluster.stored_count("C"), 1);

        // Commit again does nothing; rollback finishes the transaction
        tx.commit().unwrap();
        tx.rollback();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(count(&cluster, "B", "rollback"), 1);
    }

    #[test]
    fn test_best_effort_rollback() {
        let cluster = MemoryCluster::new();
        cluster.configure("P2", SliceBehavior::default().failing_rollback());
        let coordinator = TransactionCoordinator::new(TransactionMode::Naive);
        let mut tx = coordinator.create(participants(&cluster, &["P1", "P2", "P3"]));

        tx.begin().unwrap();
        let report = tx.rollback();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].slice.as_str(), "P2");
        assert_eq!(tx.state(), TransactionState::RolledBack);
        for slice in ["P1", "P2", "P3"] {
            assert_eq!(count(&cluster, slice, "rollback"), 1);
        }
    }

    #[test]
    fn test_failed_begin_undoes_started_participants() {
        let cluster = MemoryCluster::new();
        cluster.configure("B", SliceBehavior::default().without_xa().failing_begin());
        let coordinator = TransactionCoordinator::new(TransactionMode::Naive);
        let mut tx = coordinator.create(participants(&cluster, &["A", "B", "C"]));

        let err = tx.begin().unwrap_err();
        assert!(matches!(
            err,
            SliceError::Transaction(TransactionError::BeginFailed { .. })
        ));
        assert_eq!(tx.state(), TransactionState::NotStarted);
        assert_eq!(count(&cluster, "A", "rollback"), 1);
        assert_eq!(count(&cluster, "C", "begin"), 0);
    }
}
