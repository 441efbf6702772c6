//! The execution engine.
//!
//! Owns the `WorkflowExecution` state machine: starting an execution spawns
//! a driver task that walks the step graph through the step runner, and the
//! control operations (pause/resume/cancel) act on the shared execution
//! handle. Terminal bookkeeping happens in exactly one place: the driver's
//! finalize step stamps statistics into the catalog and moves the execution
//! into bounded history.

use crate::capability::{ActionExecutor, ConditionEvaluator};
use crate::catalog::{CatalogStats, WorkflowCatalog, WorkflowEntry};
use crate::definition::Workflow;
use crate::error::EngineError;
use crate::execution::{ExecutionStatus, LogLevel, WorkflowExecution};
use crate::monitor::{ExecutionLifecycleEvent, ExecutionMonitor, LifecycleEventKind};
use crate::runner::{StepBranch, StepRunner};
use crate::store::{ExecutionHandle, ExecutionStats, ExecutionStore};
use flowline_ai::PredictionModel;
use flowline_core::{ExecutionId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// The workflow execution engine.
pub struct ExecutionEngine {
    catalog: Arc<WorkflowCatalog>,
    store: Arc<ExecutionStore>,
    monitor: Arc<ExecutionMonitor>,
    runner: Arc<StepRunner>,
}

impl ExecutionEngine {
    /// Wires an engine over the given catalog, store and capabilities.
    #[must_use]
    pub fn new(
        catalog: Arc<WorkflowCatalog>,
        store: Arc<ExecutionStore>,
        actions: Arc<dyn ActionExecutor>,
        conditions: Arc<dyn ConditionEvaluator>,
        model: Arc<dyn PredictionModel>,
    ) -> Self {
        let monitor = Arc::new(ExecutionMonitor::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
        ));
        let runner = Arc::new(StepRunner::new(
            actions,
            conditions,
            model,
            Arc::clone(&monitor),
        ));
        Self {
            catalog,
            store,
            monitor,
            runner,
        }
    }

    /// Returns the workflow catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<WorkflowCatalog> {
        &self.catalog
    }

    /// Returns the execution store.
    #[must_use]
    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    /// Returns the execution monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    /// Registers (or updates) a workflow definition.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` when validation fails.
    pub fn register_workflow(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        self.catalog.register(workflow)
    }

    /// Lists every workflow entry plus catalog counters.
    #[must_use]
    pub fn list_workflows(&self) -> (Vec<WorkflowEntry>, CatalogStats) {
        (self.catalog.list(), self.catalog.stats())
    }

    /// Lists live executions, recent history and store counters.
    #[must_use]
    pub fn list_executions(
        &self,
    ) -> (Vec<WorkflowExecution>, Vec<WorkflowExecution>, ExecutionStats) {
        (
            self.store.active_snapshots(),
            self.store.history(),
            self.store.stats(),
        )
    }

    /// Finds an execution by id, live or archived.
    #[must_use]
    pub fn execution(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        self.store.find(id)
    }

    /// Starts an execution of the given workflow.
    ///
    /// Creates the record in `running`, seeds the variables from
    /// `initial_data` and hands the step graph to a spawned driver task.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::WorkflowNotFound` when the workflow is unknown
    /// or inactive.
    pub fn start(
        &self,
        workflow_id: WorkflowId,
        triggered_by: impl Into<String>,
        initial_data: HashMap<String, JsonValue>,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self
            .catalog
            .get(workflow_id)
            .filter(|w| w.is_active)
            .ok_or(EngineError::WorkflowNotFound { workflow_id })?;

        let mut execution = WorkflowExecution::new(workflow_id, triggered_by, initial_data);
        execution.log(
            LogLevel::Info,
            format!(
                "execution of '{}' started (triggered by {})",
                workflow.name, execution.triggered_by
            ),
        );

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %workflow_id,
            triggered_by = %execution.triggered_by,
            "starting execution"
        );

        let handle = self.store.insert(execution);
        self.monitor.publish(ExecutionLifecycleEvent::new(
            handle.id(),
            workflow_id,
            LifecycleEventKind::Started,
        ));

        let catalog = Arc::clone(&self.catalog);
        let store = Arc::clone(&self.store);
        let monitor = Arc::clone(&self.monitor);
        let runner = Arc::clone(&self.runner);
        let driver_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            drive(catalog, store, monitor, runner, driver_handle, workflow).await;
        });

        Ok(handle.snapshot())
    }

    /// Suspends a running execution.
    ///
    /// Returns the paused snapshot, or `None` when the execution is unknown
    /// or not running (a repeated pause is a no-op, not an error).
    pub fn pause(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        let handle = self.store.get(id)?;
        if !handle.pause() {
            return None;
        }
        self.monitor.publish(ExecutionLifecycleEvent::new(
            handle.id(),
            handle.workflow_id(),
            LifecycleEventKind::Paused,
        ));
        Some(handle.snapshot())
    }

    /// Resumes a paused execution.
    ///
    /// Returns the running snapshot, or `None` when the execution is
    /// unknown or not paused.
    pub fn resume(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        let handle = self.store.get(id)?;
        if !handle.resume() {
            return None;
        }
        self.monitor.publish(ExecutionLifecycleEvent::new(
            handle.id(),
            handle.workflow_id(),
            LifecycleEventKind::Resumed,
        ));
        Some(handle.snapshot())
    }

    /// Cancels a running or paused execution.
    ///
    /// The status flips immediately and no further step starts; an action
    /// already in flight may finish and its result is recorded. The driver
    /// archives on its next checkpoint.
    pub fn cancel(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        let handle = self.store.get(id)?;
        if !handle.cancel() {
            return None;
        }
        self.monitor.publish(ExecutionLifecycleEvent::new(
            handle.id(),
            handle.workflow_id(),
            LifecycleEventKind::Cancelled,
        ));
        Some(handle.snapshot())
    }

    /// Waits until the execution reaches a terminal status and is archived,
    /// then returns its final record. Returns the archived record directly
    /// when the execution already finished, or `None` for an unknown id.
    pub async fn wait_for_terminal(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        loop {
            let Some(handle) = self.store.get(id) else {
                return self.store.find(id);
            };
            let mut status = handle.subscribe_status();
            if status.borrow().is_terminal() {
                // Terminal but not yet archived; let the driver finish.
                tokio::task::yield_now().await;
                continue;
            }
            let _ = status.changed().await;
        }
    }
}

/// The per-execution driver loop.
///
/// Walks the step graph while the execution is running, parks while it is
/// paused, and performs the terminal bookkeeping exactly once on the way
/// out.
async fn drive(
    catalog: Arc<WorkflowCatalog>,
    store: Arc<ExecutionStore>,
    monitor: Arc<ExecutionMonitor>,
    runner: Arc<StepRunner>,
    handle: Arc<ExecutionHandle>,
    workflow: Workflow,
) {
    let mut current = workflow.first_step().map(|s| s.id.clone());

    loop {
        match handle.status() {
            ExecutionStatus::Running => {}
            ExecutionStatus::Paused => {
                handle.parked().await;
                continue;
            }
            // Cancelled by a caller, or defensively any other terminal
            // state: stop before the next step.
            _ => break,
        }

        let Some(step_id) = current.clone() else {
            handle.complete();
            monitor.publish(ExecutionLifecycleEvent::new(
                handle.id(),
                handle.workflow_id(),
                LifecycleEventKind::Completed,
            ));
            break;
        };

        let Some(step) = workflow.step(&step_id).cloned() else {
            let reason = format!("step '{step_id}' not found in workflow '{}'", workflow.name);
            handle.fail(
                EngineError::Configuration { reason }.to_string(),
            );
            monitor.publish(ExecutionLifecycleEvent::new(
                handle.id(),
                handle.workflow_id(),
                LifecycleEventKind::Failed,
            ));
            break;
        };

        let outcome = runner.run_step(&handle, &step).await;

        if handle.status() == ExecutionStatus::Cancelled {
            // The in-flight step finished and is recorded; nothing further
            // starts.
            break;
        }

        match outcome {
            Ok(o) => {
                current = match o.branch {
                    StepBranch::Success => {
                        step.on_success.clone().or_else(|| step.next_step.clone())
                    }
                    // A false condition routes to on_failure; with no
                    // failure wiring the run ends as completed.
                    StepBranch::Failure => step.on_failure.clone(),
                };
            }
            Err(err) => {
                if let Some(target) = step.on_failure.clone() {
                    handle.with(|e| {
                        e.log_step(
                            LogLevel::Warning,
                            format!("step '{}' failed, redirecting to '{target}'", step.id),
                            Some(step.id.clone()),
                            None,
                        );
                    });
                    current = Some(target);
                } else {
                    handle.fail(err.to_string());
                    monitor.publish(ExecutionLifecycleEvent::new(
                        handle.id(),
                        handle.workflow_id(),
                        LifecycleEventKind::Failed,
                    ));
                    break;
                }
            }
        }
    }

    finalize(&catalog, &store, &handle);
}

/// Terminal bookkeeping: statistics for counted outcomes, then archival.
///
/// Statistics count only `completed` and `failed`; a cancelled run is
/// archived without touching the workflow's aggregates.
fn finalize(catalog: &WorkflowCatalog, store: &ExecutionStore, handle: &ExecutionHandle) {
    let snapshot = handle.snapshot();
    match snapshot.status {
        ExecutionStatus::Completed => {
            catalog.record_outcome(snapshot.workflow_id, true, snapshot.started_at);
        }
        ExecutionStatus::Failed => {
            let recent: Vec<&str> = snapshot
                .recent_logs(5)
                .iter()
                .map(|entry| entry.message.as_str())
                .collect();
            tracing::error!(
                execution_id = %snapshot.id,
                error = snapshot.error.as_deref().unwrap_or("unknown"),
                ?recent,
                "execution failed"
            );
            catalog.record_outcome(snapshot.workflow_id, false, snapshot.started_at);
        }
        _ => {}
    }
    tracing::info!(
        execution_id = %snapshot.id,
        status = ?snapshot.status,
        "archiving execution"
    );
    store.archive(snapshot.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        ActionSpec, ActionType, ConditionSpec, DecisionSpec, RetryPolicy, StepKind,
        WorkflowCategory, WorkflowStep,
    };
    use crate::error::ActionError;
    use crate::evaluator::RuleConditionEvaluator;
    use crate::execution::StepStatus;
    use crate::simulate::SimulatedActionExecutor;
    use flowline_ai::{Prediction, TablePredictionModel};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: ExecutionEngine,
        actions: Arc<SimulatedActionExecutor>,
    }

    fn fixture_with_model(model: TablePredictionModel) -> Fixture {
        let actions = Arc::new(SimulatedActionExecutor::new());
        let model: Arc<dyn PredictionModel> = Arc::new(model);
        let engine = ExecutionEngine::new(
            Arc::new(WorkflowCatalog::new()),
            Arc::new(ExecutionStore::new()),
            Arc::clone(&actions) as _,
            Arc::new(RuleConditionEvaluator::new()),
            model,
        );
        Fixture { engine, actions }
    }

    fn fixture() -> Fixture {
        fixture_with_model(TablePredictionModel::new())
    }

    fn action_step(id: &str, target: &str) -> WorkflowStep {
        WorkflowStep::new(
            id,
            id,
            StepKind::Action(ActionSpec::new(ActionType::Notification, target)),
        )
    }

    /// The auto_invoice_followup workflow: condition, confidence-gated
    /// decision, then a logging action.
    fn invoice_followup() -> Workflow {
        Workflow::new("auto_invoice_followup", WorkflowCategory::Finance)
            .with_step(
                WorkflowStep::new(
                    "check_overdue",
                    "Check overdue invoices",
                    StepKind::Condition(ConditionSpec::new("invoices_overdue > 0")),
                )
                .with_on_success("categorize_overdue"),
            )
            .with_step(
                WorkflowStep::new(
                    "categorize_overdue",
                    "Categorize overdue invoices",
                    StepKind::AiDecision(
                        DecisionSpec::new(
                            "invoice_category",
                            0.85,
                            ActionSpec::new(ActionType::Notification, "review-queue"),
                        )
                        .with_input("invoices_overdue")
                        .with_output_action(
                            "firm_notice",
                            ActionSpec::new(ActionType::Email, "billing@example.com"),
                        ),
                    ),
                )
                .with_next("log_action"),
            )
            .with_step(action_step("log_action", "audit-log"))
    }

    #[tokio::test]
    async fn invoice_followup_happy_path() {
        let f = fixture_with_model(
            TablePredictionModel::new()
                .with_answer("invoice_category", Prediction::new("firm_notice", 0.9)),
        );
        let workflow = f
            .engine
            .register_workflow(invoice_followup())
            .expect("register");

        let execution = f
            .engine
            .start(
                workflow.id,
                "manual",
                HashMap::from([("invoices_overdue".to_string(), json!(3))]),
            )
            .expect("start");

        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.executed_steps.len(), 3);
        assert!(
            finished
                .executed_steps
                .iter()
                .all(|s| s.status == StepStatus::Completed)
        );
        let decision = finished.executed_steps[1]
            .result
            .as_ref()
            .expect("decision result");
        assert_eq!(decision["decision"], json!("firm_notice"));
        assert!(
            f.actions
                .calls()
                .contains(&"billing@example.com".to_string())
        );

        let entry = f.engine.catalog().entry(workflow.id).expect("entry");
        assert_eq!(entry.stats.execution_count, 1);
        assert!(entry.stats.success_rate > 0.0);
        assert!(entry.stats.last_executed.is_some());
    }

    #[tokio::test]
    async fn condition_false_without_failure_branch_completes() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(invoice_followup())
            .expect("register");

        let execution = f
            .engine
            .start(
                workflow.id,
                "manual",
                HashMap::from([("invoices_overdue".to_string(), json!(0))]),
            )
            .expect("start");

        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");

        // The documented convention: a false condition with no on_failure
        // ends the run as completed, with only the condition executed.
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.executed_steps.len(), 1);
        assert_eq!(finished.executed_steps[0].result, Some(json!(false)));
        assert!(f.actions.calls().is_empty());
    }

    #[tokio::test]
    async fn retry_twice_then_succeed() {
        let f = fixture();
        f.actions.fail_times(
            "https://erp.example.com",
            2,
            ActionError::Failed {
                class: "unavailable".to_string(),
                reason: "connection refused".to_string(),
            },
        );
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("sync_erp", WorkflowCategory::Operations).with_step(
                    WorkflowStep::new(
                        "sync",
                        "Sync",
                        StepKind::Action(ActionSpec::new(
                            ActionType::ApiCall,
                            "https://erp.example.com",
                        )),
                    )
                    .with_retry_policy(
                        RetryPolicy::new(2, vec!["unavailable".to_string()])
                            .with_retry_delay_ms(10),
                    ),
                ),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.executed_steps[0].retry_count, 2);
        assert_eq!(finished.executed_steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn step_failure_without_redirect_fails_execution() {
        let f = fixture();
        f.actions.fail_next(
            "gate",
            ActionError::Failed {
                class: "rejected".to_string(),
                reason: "invalid recipient".to_string(),
            },
        );
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("doomed", WorkflowCategory::Business)
                    .with_step(action_step("send", "gate")),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");

        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert!(finished.error.as_deref().is_some_and(|e| e.contains("rejected")));

        let entry = f.engine.catalog().entry(workflow.id).expect("entry");
        assert_eq!(entry.stats.execution_count, 1);
        assert!(entry.stats.success_rate < f64::EPSILON);
    }

    #[tokio::test]
    async fn on_failure_redirects_instead_of_failing() {
        let f = fixture();
        f.actions.fail_next(
            "gate",
            ActionError::Failed {
                class: "rejected".to_string(),
                reason: "invalid recipient".to_string(),
            },
        );
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("recovering", WorkflowCategory::Business)
                    .with_step(action_step("send", "gate").with_on_failure("escalate"))
                    .with_step(action_step("escalate", "ops")),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");

        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(finished.executed_steps.len(), 2);
        assert_eq!(finished.executed_steps[0].status, StepStatus::Failed);
        assert_eq!(finished.executed_steps[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_mid_wait_stops_before_next_step() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("slow", WorkflowCategory::Operations)
                    .with_step(
                        WorkflowStep::new("hold", "Hold", StepKind::Wait { duration_ms: 60_000 })
                            .with_next("after"),
                    )
                    .with_step(action_step("after", "never")),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancelled = f.engine.cancel(execution.id).expect("cancel");
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");
        assert_eq!(finished.status, ExecutionStatus::Cancelled);
        // The follow-up step never ran.
        assert!(f.actions.calls().is_empty());

        // Cancelled runs do not count toward statistics.
        let entry = f.engine.catalog().entry(workflow.id).expect("entry");
        assert_eq!(entry.stats.execution_count, 0);
    }

    #[tokio::test]
    async fn pause_and_resume_round_trip() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("pausable", WorkflowCategory::Hr)
                    .with_step(
                        WorkflowStep::new("hold", "Hold", StepKind::Wait { duration_ms: 30 })
                            .with_next("after"),
                    )
                    .with_step(action_step("after", "ops")),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");

        let paused = f.engine.pause(execution.id).expect("pause");
        assert_eq!(paused.status, ExecutionStatus::Paused);

        // Second pause is indistinguishable from not-found.
        assert!(f.engine.pause(execution.id).is_none());

        let resumed = f.engine.resume(execution.id).expect("resume");
        assert_eq!(resumed.status, ExecutionStatus::Running);

        // Resume on a non-paused execution is rejected without side
        // effects.
        assert!(f.engine.resume(execution.id).is_none());

        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert_eq!(f.actions.calls(), vec!["ops".to_string()]);
    }

    #[tokio::test]
    async fn cancel_while_paused() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("parked", WorkflowCategory::Business)
                    .with_step(
                        WorkflowStep::new("hold", "Hold", StepKind::Wait { duration_ms: 10 })
                            .with_next("after"),
                    )
                    .with_step(action_step("after", "never")),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        f.engine.pause(execution.id).expect("pause");

        // Let the wait elapse while paused; the driver parks at the step
        // boundary instead of starting the next step.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(f.actions.calls().is_empty());

        let cancelled = f.engine.cancel(execution.id).expect("cancel");
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");
        assert_eq!(finished.status, ExecutionStatus::Cancelled);
        assert!(f.actions.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_inactive_workflow_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .start(WorkflowId::new(), "manual", HashMap::new())
            .expect_err("unknown workflow");
        assert!(matches!(err, EngineError::WorkflowNotFound { .. }));

        let mut inactive = Workflow::new("off", WorkflowCategory::Business)
            .with_step(action_step("noop", "ops"));
        inactive.deactivate();
        let workflow = f.engine.register_workflow(inactive).expect("register");

        let err = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect_err("inactive workflow");
        assert!(matches!(err, EngineError::WorkflowNotFound { .. }));
    }

    #[tokio::test]
    async fn control_operations_on_unknown_execution_return_none() {
        let f = fixture();
        let id = ExecutionId::new();
        assert!(f.engine.pause(id).is_none());
        assert!(f.engine.resume(id).is_none());
        assert!(f.engine.cancel(id).is_none());
        assert!(f.engine.execution(id).is_none());
    }

    #[tokio::test]
    async fn terminal_executions_move_to_history() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("archived", WorkflowCategory::Business)
                    .with_step(action_step("noop", "ops")),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        f.engine.wait_for_terminal(execution.id).await;

        let (active, history, stats) = f.engine.list_executions();
        assert!(active.is_empty());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, execution.id);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn lifecycle_events_stream_in_order() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("observed", WorkflowCategory::Business)
                    .with_step(action_step("noop", "ops")),
            )
            .expect("register");

        let mut events = f.engine.monitor().subscribe_events();
        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        f.engine.wait_for_terminal(execution.id).await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if event.execution_id == execution.id {
                kinds.push(event.kind);
            }
        }
        assert_eq!(
            kinds,
            vec![
                LifecycleEventKind::Started,
                LifecycleEventKind::StepStarted,
                LifecycleEventKind::StepCompleted,
                LifecycleEventKind::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn parallel_workflow_joins_and_completes() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("fan", WorkflowCategory::Operations).with_step(WorkflowStep::new(
                    "fan_out",
                    "Fan out",
                    StepKind::Parallel {
                        steps: vec![action_step("a", "t1"), action_step("b", "t2")],
                    },
                )),
            )
            .expect("register");

        let execution = f
            .engine
            .start(workflow.id, "manual", HashMap::new())
            .expect("start");
        let finished = f
            .engine
            .wait_for_terminal(execution.id)
            .await
            .expect("terminal");

        assert_eq!(finished.status, ExecutionStatus::Completed);
        // Parallel record plus one per child.
        assert_eq!(finished.executed_steps.len(), 3);
        let parallel_record = finished
            .executed_steps
            .iter()
            .find(|s| s.step_id.as_str() == "fan_out")
            .expect("parallel record");
        let results = parallel_record
            .result
            .as_ref()
            .and_then(JsonValue::as_object)
            .expect("result map");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_executions_of_one_workflow_keep_statistics_consistent() {
        let f = fixture();
        let workflow = f
            .engine
            .register_workflow(
                Workflow::new("busy", WorkflowCategory::Business)
                    .with_step(action_step("noop", "ops")),
            )
            .expect("register");

        let mut ids = Vec::new();
        for _ in 0..5 {
            let execution = f
                .engine
                .start(workflow.id, "manual", HashMap::new())
                .expect("start");
            ids.push(execution.id);
        }
        for id in ids {
            f.engine.wait_for_terminal(id).await;
        }

        let entry = f.engine.catalog().entry(workflow.id).expect("entry");
        assert_eq!(entry.stats.execution_count, 5);
        assert!((entry.stats.success_rate - 1.0).abs() < 1e-9);
    }
}
