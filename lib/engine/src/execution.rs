//! Workflow execution state machine.
//!
//! One [`WorkflowExecution`] is created per run and carries:
//! - The overall execution status
//! - The append-only audit trail of executed steps
//! - The mutable variable bag visible to later steps
//! - The append-only execution log
//!
//! Status transitions out of `running` are one-way, except that `running`
//! and `paused` flip back and forth until a terminal state is reached.

use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, StepId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// The overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The execution is actively walking the step graph.
    Running,
    /// The execution finished successfully.
    Completed,
    /// A step failed with no failure redirect.
    Failed,
    /// Progress is suspended until an explicit resume.
    Paused,
    /// The execution was cancelled by a caller.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The status of a single step attempt within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Recorded but not yet started.
    Pending,
    /// Currently executing (including in-place retries).
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never ran (e.g. a branch not taken).
    Skipped,
}

impl StepStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Something unexpected but recoverable.
    Warning,
    /// A failure.
    Error,
}

/// One entry in an execution's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// The step this entry relates to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    /// Structured payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// The audit record of one step attempt.
///
/// Retries mutate the same record (`retry_count`); a new record is appended
/// only when a step is entered, so `executed_steps` counts step entries, not
/// attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedStep {
    /// The step that ran.
    pub step_id: StepId,
    /// Current status of the attempt.
    pub status: StepStatus,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, stamped on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// The step's result, if it completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// The step's error, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of in-place retries performed.
    pub retry_count: u32,
}

impl ExecutedStep {
    /// Creates a running record for a step that is being entered now.
    #[must_use]
    pub fn begin(step_id: StepId) -> Self {
        Self {
            step_id,
            status: StepStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Finalizes the record as completed.
    pub fn complete(&mut self, result: JsonValue) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.stamp_finished();
    }

    /// Finalizes the record as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.stamp_finished();
    }

    /// Finalizes the record as skipped.
    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
        self.stamp_finished();
    }

    /// Records one in-place retry.
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    fn stamp_finished(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier for this run.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// Current status.
    pub status: ExecutionStatus,
    /// The step currently (or last) being executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepId>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds, stamped at the terminal
    /// transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Append-only audit trail, one record per step entry.
    pub executed_steps: Vec<ExecutedStep>,
    /// Mutable variable bag: seeded from the trigger payload, extended by
    /// step results, visible to every later step.
    pub variables: HashMap<String, JsonValue>,
    /// Append-only execution log.
    pub logs: Vec<ExecutionLog>,
    /// Provenance of the run (manual | scheduler | event name | api).
    pub triggered_by: String,
    /// Error message; populated only in the `failed` status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// Creates a new running execution seeded with the given variables.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        triggered_by: impl Into<String>,
        initial_data: HashMap<String, JsonValue>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: ExecutionStatus::Running,
            current_step: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            executed_steps: Vec::new(),
            variables: initial_data,
            logs: Vec::new(),
            triggered_by: triggered_by.into(),
            error: None,
        }
    }

    /// Appends a log entry.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.log_step(level, message, None, None);
    }

    /// Appends a log entry with step context and an optional payload.
    pub fn log_step(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        step_id: Option<StepId>,
        data: Option<JsonValue>,
    ) {
        self.logs.push(ExecutionLog {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            step_id,
            data,
        });
    }

    /// Suspends the execution. Legal only from `running`.
    pub fn pause(&mut self) {
        self.status = ExecutionStatus::Paused;
    }

    /// Resumes a suspended execution. Legal only from `paused`.
    pub fn resume(&mut self) {
        self.status = ExecutionStatus::Running;
    }

    /// Finalizes the execution as completed.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.stamp_finished();
    }

    /// Finalizes the execution as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.stamp_finished();
    }

    /// Finalizes the execution as cancelled.
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.stamp_finished();
    }

    /// Returns the most recent log entries, newest last.
    #[must_use]
    pub fn recent_logs(&self, count: usize) -> &[ExecutionLog] {
        let start = self.logs.len().saturating_sub(count);
        &self.logs[start..]
    }

    fn stamp_finished(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}
