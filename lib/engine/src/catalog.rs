//! Workflow catalog with aggregate statistics.
//!
//! The catalog is the read-mostly home of workflow definitions. Definitions
//! are immutable at run time (register replaces the whole entry); the
//! per-workflow statistics next to each definition are written through a
//! single path, [`WorkflowCatalog::record_outcome`], called by the execution
//! engine exactly once per terminal execution, so concurrent finishes of the
//! same workflow never lose an update.

use crate::definition::Workflow;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use flowline_core::WorkflowId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Aggregate statistics for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    /// Number of executions that reached `completed` or `failed`.
    pub execution_count: u64,
    /// Running average success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Start timestamp of the most recent counted execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
}

impl WorkflowStats {
    /// Folds one terminal outcome into the running aggregates.
    pub fn record(&mut self, success: bool, started_at: DateTime<Utc>) {
        let n = self.execution_count + 1;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1) as f64 + outcome) / n as f64;
        self.execution_count = n;
        self.last_executed = Some(started_at);
    }
}

/// A catalog entry: the definition plus its statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEntry {
    /// The workflow definition.
    pub workflow: Workflow,
    /// Aggregate statistics.
    pub stats: WorkflowStats,
}

/// Catalog-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    /// Total registered workflows.
    pub total: usize,
    /// Workflows currently active.
    pub active: usize,
}

/// The workflow catalog.
pub struct WorkflowCatalog {
    entries: RwLock<HashMap<WorkflowId, WorkflowEntry>>,
}

impl WorkflowCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a workflow, replacing any previous definition with the same
    /// id. Statistics survive an update.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` when the definition fails
    /// validation.
    pub fn register(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        workflow.validate()?;

        let mut entries = self.entries.write().expect("catalog lock poisoned");
        let stats = entries
            .get(&workflow.id)
            .map(|e| e.stats.clone())
            .unwrap_or_default();
        entries.insert(
            workflow.id,
            WorkflowEntry {
                workflow: workflow.clone(),
                stats,
            },
        );
        Ok(workflow)
    }

    /// Returns the workflow with the given id.
    #[must_use]
    pub fn get(&self, id: WorkflowId) -> Option<Workflow> {
        let entries = self.entries.read().expect("catalog lock poisoned");
        entries.get(&id).map(|e| e.workflow.clone())
    }

    /// Returns the entry (definition + statistics) with the given id.
    #[must_use]
    pub fn entry(&self, id: WorkflowId) -> Option<WorkflowEntry> {
        let entries = self.entries.read().expect("catalog lock poisoned");
        entries.get(&id).cloned()
    }

    /// Returns all entries, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<WorkflowEntry> {
        let entries = self.entries.read().expect("catalog lock poisoned");
        entries.values().cloned().collect()
    }

    /// Returns all active workflows, highest priority first.
    #[must_use]
    pub fn active_workflows(&self) -> Vec<Workflow> {
        let entries = self.entries.read().expect("catalog lock poisoned");
        let mut workflows: Vec<Workflow> = entries
            .values()
            .filter(|e| e.workflow.is_active)
            .map(|e| e.workflow.clone())
            .collect();
        workflows.sort_by(|a, b| b.priority.cmp(&a.priority));
        workflows
    }

    /// Activates or deactivates a workflow.
    ///
    /// Returns the updated definition, or `None` if the id is unknown.
    pub fn set_active(&self, id: WorkflowId, active: bool) -> Option<Workflow> {
        let mut entries = self.entries.write().expect("catalog lock poisoned");
        let entry = entries.get_mut(&id)?;
        if active {
            entry.workflow.activate();
        } else {
            entry.workflow.deactivate();
        }
        Some(entry.workflow.clone())
    }

    /// Folds one terminal execution outcome into the workflow's statistics.
    ///
    /// The single write path for statistics; called once per execution that
    /// reaches `completed` or `failed`, never for `paused` or `cancelled`.
    pub fn record_outcome(&self, id: WorkflowId, success: bool, started_at: DateTime<Utc>) {
        let mut entries = self.entries.write().expect("catalog lock poisoned");
        if let Some(entry) = entries.get_mut(&id) {
            entry.stats.record(success, started_at);
        }
    }

    /// Returns catalog-level counters.
    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        let entries = self.entries.read().expect("catalog lock poisoned");
        CatalogStats {
            total: entries.len(),
            active: entries.values().filter(|e| e.workflow.is_active).count(),
        }
    }
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::new()
    }
}
