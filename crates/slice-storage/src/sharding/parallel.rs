//! Parallel fan-out of per-slice tasks.
//!
//! Runs one task per slice on a bounded worker pool owned by the store
//! manager. Every task runs to completion: a failing or panicking task never
//! cancels its siblings, and the caller gets all successes and all failures.

use crate::store::StoreError;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use slice_core::{ObjectId, SliceName};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use thiserror::Error;

// =============================================================================
// Outcomes
// =============================================================================

/// One failure attributed to a slice, and to an instance when known.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardFailure {
    pub slice: SliceName,
    pub oid: Option<ObjectId>,
    pub error: StoreError,
}

impl ShardFailure {
    pub fn new(slice: SliceName, error: StoreError) -> Self {
        Self {
            slice,
            oid: None,
            error,
        }
    }

    pub fn for_instance(slice: SliceName, oid: ObjectId, error: StoreError) -> Self {
        Self {
            slice,
            oid: Some(oid),
            error,
        }
    }
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.oid {
            Some(oid) => write!(f, "[{}] {}: {}", self.slice, oid, self.error),
            None => write!(f, "[{}] {}", self.slice, self.error),
        }
    }
}

/// Every failure of one fan-out, in slice enumeration order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} slice operation(s) failed: {}", .failures.len(), summarize(.failures))]
pub struct AggregatedError {
    failures: Vec<ShardFailure>,
}

fn summarize(failures: &[ShardFailure]) -> String {
    failures
        .iter()
        .map(ShardFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregatedError {
    pub fn new(failures: Vec<ShardFailure>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[ShardFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ShardFailure> {
        self.failures
    }

    /// Slices that reported at least one failure, without repeats.
    pub fn failed_slices(&self) -> Vec<&SliceName> {
        let mut slices: Vec<&SliceName> = Vec::new();
        for failure in &self.failures {
            if !slices.contains(&&failure.slice) {
                slices.push(&failure.slice);
            }
        }
        slices
    }
}

/// Result of [`ParallelExecutor::run_all`].
///
/// Both lists keep task submission order.
#[derive(Debug)]
pub struct RunOutcome<R> {
    pub successes: Vec<(SliceName, R)>,
    pub failures: Vec<ShardFailure>,
}

impl<R> RunOutcome<R> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the successes, or every failure as one error.
    pub fn into_result(self) -> Result<Vec<(SliceName, R)>, AggregatedError> {
        if self.failures.is_empty() {
            Ok(self.successes)
        } else {
            Err(AggregatedError::new(self.failures))
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Bounded worker pool for per-slice tasks.
pub struct ParallelExecutor {
    pool: Mutex<Option<Arc<ThreadPool>>>,
    threads: usize,
}

impl fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("threads", &self.threads)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ParallelExecutor {
    /// Creates a pool of `threads` workers named `slice-worker-<n>`.
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("slice-worker-{}", i))
            .build()?;
        tracing::debug!(threads, "Slice worker pool started");
        Ok(Self {
            pool: Mutex::new(Some(Arc::new(pool))),
            threads,
        })
    }

    /// Configured pool size.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Releases the worker threads. Later calls to `run_all` run inline.
    pub fn shutdown(&self) {
        let pool = match self.pool.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if pool.is_some() {
            tracing::debug!(threads = self.threads, "Slice worker pool shut down");
        }
    }

    /// Runs every task and waits for all of them.
    ///
    /// A single task runs inline on the calling thread.
    pub fn run_all<R, F>(&self, tasks: Vec<(SliceName, F)>) -> RunOutcome<R>
    where
        R: Send,
        F: FnOnce() -> Result<R, StoreError> + Send,
    {
        let pool = self.current_pool();
        let results: Vec<(SliceName, Result<R, StoreError>)> = match pool {
            Some(pool) if tasks.len() > 1 => pool.install(|| {
                tasks
                    .into_par_iter()
                    .map(|(slice, task)| {
                        let result = run_guarded(task);
                        (slice, result)
                    })
                    .collect()
            }),
            _ => tasks
                .into_iter()
                .map(|(slice, task)| {
                    let result = run_guarded(task);
                    (slice, result)
                })
                .collect(),
        };

        let mut outcome = RunOutcome {
            successes: Vec::with_capacity(results.len()),
            failures: Vec::new(),
        };
        for (slice, result) in results {
            match result {
                Ok(value) => outcome.successes.push((slice, value)),
                Err(e) => {
                    tracing::error!(slice = %slice, error = %e, "Slice task failed");
                    outcome.failures.push(ShardFailure::new(slice, e));
                }
            }
        }
        outcome
    }

    fn current_pool(&self) -> Option<Arc<ThreadPool>> {
        match self.pool.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn run_guarded<R>(task: impl FnOnce() -> Result<R, StoreError>) -> Result<R, StoreError> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => Err(StoreError::TaskPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    type Task = Box<dyn FnOnce() -> Result<usize, StoreError> + Send>;

    fn boxed(f: impl FnOnce() -> Result<usize, StoreError> + Send + 'static) -> Task {
        Box::new(f)
    }

    fn task_set(n: usize, failing: &HashSet<usize>) -> Vec<(SliceName, Task)> {
        (0..n)
            .map(|i| {
                let fails = failing.contains(&i);
                let task = boxed(move || {
                    if fails {
                        Err(StoreError::Statement(format!("task {} failed", i)))
                    } else {
                        Ok(i * 10)
                    }
                });
                (SliceName::new(format!("S{}", i)), task)
            })
            .collect()
    }

    #[test]
    fn test_fan_out_completeness() {
        let executor = ParallelExecutor::new(4).unwrap();
        let failing: HashSet<usize> = [1, 4, 5].into_iter().collect();

        let outcome = executor.run_all(task_set(8, &failing));

        let ok: Vec<&str> = outcome.successes.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(ok, vec!["S0", "S2", "S3", "S6", "S7"]);
        assert_eq!(outcome.successes[1].1, 20);

        let err = outcome.into_result().unwrap_err();
        let failed: Vec<&str> = err.failures().iter().map(|f| f.slice.as_str()).collect();
        assert_eq!(failed, vec!["S1", "S4", "S5"]);
        assert_eq!(
            err.failures()[0].error,
            StoreError::Statement("task 1 failed".to_string())
        );
        assert!(err.to_string().starts_with("3 slice operation(s) failed"));
    }

    #[test]
    fn test_all_succeed() {
        let executor = ParallelExecutor::new(2).unwrap();
        let outcome = executor.run_all(task_set(5, &HashSet::new()));
        assert!(outcome.is_success());
        assert_eq!(outcome.into_result().unwrap().len(), 5);
    }

    #[test]
    fn test_panic_is_captured() {
        let executor = ParallelExecutor::new(2).unwrap();
        let tasks: Vec<(SliceName, Task)> = vec![
            (SliceName::new("A"), boxed(|| Ok(1))),
            (SliceName::new("B"), boxed(|| panic!("connection vanished"))),
            (SliceName::new("C"), boxed(|| Ok(3))),
        ];

        let outcome = executor.run_all(tasks);
        assert_eq!(outcome.successes.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.failures[0].error,
            StoreError::TaskPanicked("connection vanished".to_string())
        );
    }

    #[test]
    fn test_tasks_run_on_named_workers() {
        let executor = ParallelExecutor::new(3).unwrap();
        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let task = || -> Result<String, StoreError> {
                    Ok(std::thread::current().name().unwrap_or_default().to_string())
                };
                (SliceName::new(format!("S{}", i)), task)
            })
            .collect();

        let outcome = executor.run_all(tasks);
        for (_, thread) in &outcome.successes {
            assert!(thread.starts_with("slice-worker-"), "ran on {}", thread);
        }
    }

    #[test]
    fn test_single_task_runs_inline() {
        let executor = ParallelExecutor::new(2).unwrap();
        let caller = std::thread::current().id();
        let outcome = executor.run_all(vec![(SliceName::new("Only"), move || {
            Ok(std::thread::current().id() == caller)
        })]);
        assert_eq!(outcome.successes[0].1, true);
    }

    #[test]
    fn test_tasks_may_borrow() {
        let executor = ParallelExecutor::new(2).unwrap();
        let data = vec![1, 2, 3];
        let tasks: Vec<_> = (0..2)
            .map(|i| {
                let data = &data;
                (SliceName::new(format!("S{}", i)), move || Ok::<_, StoreError>(data[i] + data[2]))
            })
            .collect();
        let outcome = executor.run_all(tasks);
        let values: Vec<i32> = outcome.successes.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![4, 5]);
    }

    #[test]
    fn test_shutdown_falls_back_to_inline() {
        let executor = ParallelExecutor::new(2).unwrap();
        executor.shutdown();
        executor.shutdown();
        assert!(!executor.is_running());

        let outcome = executor.run_all(task_set(3, &HashSet::new()));
        assert_eq!(outcome.successes.len(), 3);
    }

    #[test]
    fn test_failed_slices_deduplicated() {
        let err = AggregatedError::new(vec![
            ShardFailure::for_instance("A".into(), ObjectId(1), StoreError::DuplicateKey(ObjectId(1))),
            ShardFailure::for_instance("A".into(), ObjectId(2), StoreError::DuplicateKey(ObjectId(2))),
            ShardFailure::new("B".into(), StoreError::Connection("reset".into())),
        ]);
        let slices: Vec<&str> = err.failed_slices().iter().map(|s| s.as_str()).collect();
        assert_eq!(slices, vec!["A", "B"]);
        assert!(err.to_string().contains("[A] oid:1"));
    }
}
