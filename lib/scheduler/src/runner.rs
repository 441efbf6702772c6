//! The schedule runner.
//!
//! An external-clock collaborator for the engine: it scans the catalog for
//! active workflows with `schedule` triggers and starts an execution for
//! every schedule that fired inside the elapsed tick window. The core
//! engine itself never looks at the clock for triggering.

use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use flowline_engine::{
    ExecutionEngine, Trigger, WorkflowCatalog, WorkflowExecution,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default cadence for schedule scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Provenance recorded on executions this runner starts.
pub const SCHEDULER_PROVENANCE: &str = "scheduler";

/// Periodically fires `schedule` triggers against the engine.
pub struct ScheduleRunner {
    catalog: Arc<WorkflowCatalog>,
    engine: Arc<ExecutionEngine>,
    poll_interval: Duration,
}

impl ScheduleRunner {
    /// Creates a runner over the given catalog and engine.
    #[must_use]
    pub fn new(catalog: Arc<WorkflowCatalog>, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            catalog,
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the scan cadence.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs the scan loop forever. Spawn this on the runtime.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        // Consume the immediate first tick; the first window starts now.
        ticker.tick().await;
        let mut window_start = Utc::now();

        loop {
            ticker.tick().await;
            let window_end = Utc::now();
            let started = self.tick(window_start, window_end);
            if !started.is_empty() {
                tracing::info!(count = started.len(), "schedule tick started executions");
            }
            window_start = window_end;
        }
    }

    /// Fires every schedule trigger with an occurrence in `(start, end]`.
    ///
    /// At most one execution per workflow per tick; a workflow whose cron
    /// expression fails to parse is logged and skipped, never aborting the
    /// scan.
    pub fn tick(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<WorkflowExecution> {
        let mut started = Vec::new();

        for workflow in self.catalog.active_workflows() {
            for trigger in &workflow.triggers {
                let Trigger::Schedule { cron } = trigger else {
                    continue;
                };
                let due = CronSchedule::new(cron.clone()).fires_between(window_start, window_end);
                match due {
                    Ok(false) => {}
                    Ok(true) => {
                        match self
                            .engine
                            .start(workflow.id, SCHEDULER_PROVENANCE, HashMap::new())
                        {
                            Ok(execution) => started.push(execution),
                            Err(err) => {
                                tracing::warn!(
                                    workflow_id = %workflow.id,
                                    error = %err,
                                    "scheduled workflow failed to start"
                                );
                            }
                        }
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            workflow_id = %workflow.id,
                            error = %err,
                            "skipping unparseable schedule trigger"
                        );
                    }
                }
            }
        }

        started
    }
}
