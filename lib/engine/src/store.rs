//! In-memory execution store.
//!
//! The store owns the engine's working set and its bounded history:
//!
//! - **Working set**: one [`ExecutionHandle`] per live execution, shared
//!   between the driver task and the control operations (pause/resume/
//!   cancel). The handle guards the execution record and exposes a watch
//!   channel so waits and observers see status changes immediately.
//! - **History**: an append-only ring of terminal executions, bounded to the
//!   most recent `capacity` (default 1000) with drop-oldest eviction.
//!
//! Executions are never deleted, only archived; archival removes them from
//! the working set in the same call that appends them to history.

use crate::execution::{ExecutionStatus, LogLevel, WorkflowExecution};
use flowline_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Notify, watch};

/// Default bound on retained history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Counters over the store's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Executions currently in the working set.
    pub active: usize,
    /// Archived executions that completed.
    pub completed: u64,
    /// Archived executions that failed.
    pub failed: u64,
    /// Archived executions that were cancelled.
    pub cancelled: u64,
}

/// Shared handle to one live execution.
///
/// The execution record lives behind a mutex; the watch channel mirrors its
/// status so tasks can await transitions without holding the lock, and the
/// notify wakes a driver parked in the paused state.
pub struct ExecutionHandle {
    execution: Mutex<WorkflowExecution>,
    status_tx: watch::Sender<ExecutionStatus>,
    resume: Notify,
    id: ExecutionId,
    workflow_id: WorkflowId,
}

impl ExecutionHandle {
    /// Wraps a freshly created execution.
    #[must_use]
    pub fn new(execution: WorkflowExecution) -> Self {
        let (status_tx, _) = watch::channel(execution.status);
        Self {
            id: execution.id,
            workflow_id: execution.workflow_id,
            execution: Mutex::new(execution),
            status_tx,
            resume: Notify::new(),
        }
    }

    /// Returns the execution id.
    #[must_use]
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// Returns the workflow id.
    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Runs a closure over the locked execution record.
    ///
    /// The closure must not block or await; the lock is held for its whole
    /// run.
    pub fn with<R>(&self, f: impl FnOnce(&mut WorkflowExecution) -> R) -> R {
        let mut execution = self.execution.lock().expect("execution lock poisoned");
        f(&mut execution)
    }

    /// Returns a clone of the execution record.
    #[must_use]
    pub fn snapshot(&self) -> WorkflowExecution {
        self.with(|e| e.clone())
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        *self.status_tx.borrow()
    }

    /// Subscribes to status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ExecutionStatus> {
        self.status_tx.subscribe()
    }

    /// Suspends the execution. Legal only from `running`; returns whether
    /// the transition happened.
    pub fn pause(&self) -> bool {
        let transitioned = self.with(|e| {
            if e.status != ExecutionStatus::Running {
                return false;
            }
            e.pause();
            e.log(LogLevel::Info, "execution paused");
            true
        });
        if transitioned {
            self.status_tx.send_replace(ExecutionStatus::Paused);
        }
        transitioned
    }

    /// Resumes a suspended execution. Legal only from `paused`; returns
    /// whether the transition happened.
    pub fn resume(&self) -> bool {
        let transitioned = self.with(|e| {
            if e.status != ExecutionStatus::Paused {
                return false;
            }
            e.resume();
            e.log(LogLevel::Info, "execution resumed");
            true
        });
        if transitioned {
            self.status_tx.send_replace(ExecutionStatus::Running);
            self.resume.notify_one();
        }
        transitioned
    }

    /// Cancels the execution. Legal from `running` or `paused`; returns
    /// whether the transition happened. Stamps the terminal timestamps
    /// immediately; the driver archives on its next checkpoint.
    pub fn cancel(&self) -> bool {
        let transitioned = self.with(|e| {
            if e.status.is_terminal() {
                return false;
            }
            e.cancel();
            e.log(LogLevel::Info, "execution cancelled");
            true
        });
        if transitioned {
            self.status_tx.send_replace(ExecutionStatus::Cancelled);
            // Wake a driver parked in the paused state or in a wait step.
            self.resume.notify_one();
        }
        transitioned
    }

    /// Finalizes the execution as completed.
    pub fn complete(&self) {
        self.with(|e| {
            e.complete();
            e.log(LogLevel::Info, "execution completed");
        });
        self.status_tx.send_replace(ExecutionStatus::Completed);
    }

    /// Finalizes the execution as failed.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.with(|e| {
            e.fail(error.clone());
            e.log(LogLevel::Error, format!("execution failed: {error}"));
        });
        self.status_tx.send_replace(ExecutionStatus::Failed);
    }

    /// Parks until `resume` (or `cancel`) wakes the driver.
    pub async fn parked(&self) {
        self.resume.notified().await;
    }
}

/// The engine's working set and bounded history.
pub struct ExecutionStore {
    active: RwLock<HashMap<ExecutionId, Arc<ExecutionHandle>>>,
    history: Mutex<VecDeque<WorkflowExecution>>,
    counters: Mutex<ArchiveCounters>,
    capacity: usize,
}

#[derive(Default)]
struct ArchiveCounters {
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl ExecutionStore {
    /// Creates a store with the default history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a store retaining at most `capacity` archived executions.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            counters: Mutex::new(ArchiveCounters::default()),
            capacity,
        }
    }

    /// Adds a fresh execution to the working set.
    pub fn insert(&self, execution: WorkflowExecution) -> Arc<ExecutionHandle> {
        let handle = Arc::new(ExecutionHandle::new(execution));
        let mut active = self.active.write().expect("store lock poisoned");
        active.insert(handle.id(), Arc::clone(&handle));
        handle
    }

    /// Returns the handle for a live execution.
    #[must_use]
    pub fn get(&self, id: ExecutionId) -> Option<Arc<ExecutionHandle>> {
        let active = self.active.read().expect("store lock poisoned");
        active.get(&id).cloned()
    }

    /// Returns snapshots of every live execution.
    #[must_use]
    pub fn active_snapshots(&self) -> Vec<WorkflowExecution> {
        let active = self.active.read().expect("store lock poisoned");
        active.values().map(|h| h.snapshot()).collect()
    }

    /// Moves a terminal execution from the working set into history.
    ///
    /// Returns the archived snapshot, or `None` if the id is not live.
    pub fn archive(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        let handle = {
            let mut active = self.active.write().expect("store lock poisoned");
            active.remove(&id)?
        };
        let snapshot = handle.snapshot();

        {
            let mut counters = self.counters.lock().expect("store lock poisoned");
            match snapshot.status {
                ExecutionStatus::Completed => counters.completed += 1,
                ExecutionStatus::Failed => counters.failed += 1,
                ExecutionStatus::Cancelled => counters.cancelled += 1,
                _ => {}
            }
        }

        let mut history = self.history.lock().expect("store lock poisoned");
        history.push_back(snapshot.clone());
        while history.len() > self.capacity {
            history.pop_front();
        }
        Some(snapshot)
    }

    /// Returns the retained history, most recent first.
    #[must_use]
    pub fn history(&self) -> Vec<WorkflowExecution> {
        let history = self.history.lock().expect("store lock poisoned");
        history.iter().rev().cloned().collect()
    }

    /// Finds an execution by id, live or archived.
    #[must_use]
    pub fn find(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        if let Some(handle) = self.get(id) {
            return Some(handle.snapshot());
        }
        let history = self.history.lock().expect("store lock poisoned");
        history.iter().rev().find(|e| e.id == id).cloned()
    }

    /// Returns store-level counters.
    #[must_use]
    pub fn stats(&self) -> ExecutionStats {
        let active = self.active.read().expect("store lock poisoned").len();
        let counters = self.counters.lock().expect("store lock poisoned");
        ExecutionStats {
            active,
            completed: counters.completed,
            failed: counters.failed,
            cancelled: counters.cancelled,
        }
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}
