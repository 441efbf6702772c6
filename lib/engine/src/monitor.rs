//! Push-based execution monitoring.
//!
//! The monitor is the engine's only outward-facing surface: a lifecycle
//! event channel plus periodic full snapshots, both best-effort.
//!
//! - Lifecycle events ride a broadcast channel; a slow subscriber lags and
//!   drops the oldest events, it never blocks the engine.
//! - Snapshots ride a bounded per-subscriber channel fed by an interval
//!   task; when the buffer is full the snapshot is dropped for that
//!   subscriber only.

use crate::catalog::{CatalogStats, WorkflowCatalog};
use crate::execution::WorkflowExecution;
use crate::store::{ExecutionStats, ExecutionStore};
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, StepId, SubscriberId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Capacity of the lifecycle broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of each subscriber's snapshot buffer.
const SNAPSHOT_BUFFER: usize = 8;

/// What happened to an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Execution created and running.
    Started,
    /// A step began.
    StepStarted,
    /// A step finished successfully.
    StepCompleted,
    /// A step failed.
    StepFailed,
    /// Execution suspended.
    Paused,
    /// Execution resumed.
    Resumed,
    /// Execution finished successfully.
    Completed,
    /// Execution failed.
    Failed,
    /// Execution cancelled.
    Cancelled,
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLifecycleEvent {
    /// The execution this event is about.
    pub execution_id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// What happened.
    pub kind: LifecycleEventKind,
    /// The step involved, for step-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLifecycleEvent {
    /// Creates an execution-level event.
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        kind: LifecycleEventKind,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            kind,
            step_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a step-level event.
    #[must_use]
    pub fn for_step(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        kind: LifecycleEventKind,
        step_id: StepId,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            kind,
            step_id: Some(step_id),
            timestamp: Utc::now(),
        }
    }
}

/// A full point-in-time picture of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// Every live execution.
    pub active: Vec<WorkflowExecution>,
    /// Store-level counters.
    pub execution_stats: ExecutionStats,
    /// Catalog-level counters.
    pub catalog_stats: CatalogStats,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// The monitor: lifecycle broadcast plus per-subscriber snapshot pushes.
pub struct ExecutionMonitor {
    events: broadcast::Sender<ExecutionLifecycleEvent>,
    catalog: Arc<WorkflowCatalog>,
    store: Arc<ExecutionStore>,
    snapshot_tasks: Mutex<HashMap<SubscriberId, JoinHandle<()>>>,
}

impl ExecutionMonitor {
    /// Creates a monitor over the given catalog and store.
    #[must_use]
    pub fn new(catalog: Arc<WorkflowCatalog>, store: Arc<ExecutionStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events,
            catalog,
            store,
            snapshot_tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes a lifecycle event. Never blocks; an event with no
    /// subscribers is simply dropped.
    pub fn publish(&self, event: ExecutionLifecycleEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribes to the lifecycle event stream.
    ///
    /// A lagging receiver drops the oldest events rather than blocking the
    /// engine.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionLifecycleEvent> {
        self.events.subscribe()
    }

    /// Takes a snapshot now.
    #[must_use]
    pub fn snapshot(&self) -> MonitorSnapshot {
        take_snapshot(&self.catalog, &self.store)
    }

    /// Starts a periodic snapshot push at the given interval.
    ///
    /// Returns the subscriber id (for [`Self::unsubscribe`]) and the
    /// receiving end. The push stops on unsubscribe or when the receiver is
    /// dropped.
    pub fn subscribe_snapshots(
        &self,
        interval: Duration,
    ) -> (SubscriberId, mpsc::Receiver<MonitorSnapshot>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let catalog = Arc::clone(&self.catalog);
        let store = Arc::clone(&self.store);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick gives new subscribers a picture
            // right away.
            loop {
                ticker.tick().await;
                let snapshot = take_snapshot(&catalog, &store);
                match tx.try_send(snapshot) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Slow subscriber: drop this snapshot for them.
                        tracing::debug!("snapshot subscriber lagging, dropping snapshot");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });

        let mut tasks = self.snapshot_tasks.lock().expect("monitor lock poisoned");
        tasks.insert(id, task);
        (id, rx)
    }

    /// Stops a snapshot push. Returns whether the subscriber existed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut tasks = self.snapshot_tasks.lock().expect("monitor lock poisoned");
        if let Some(task) = tasks.remove(&id) {
            task.abort();
            true
        } else {
            false
        }
    }
}

fn take_snapshot(catalog: &WorkflowCatalog, store: &ExecutionStore) -> MonitorSnapshot {
    MonitorSnapshot {
        active: store.active_snapshots(),
        execution_stats: store.stats(),
        catalog_stats: catalog.stats(),
        timestamp: Utc::now(),
    }
}
