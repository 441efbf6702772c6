//! Step execution.
//!
//! The step runner executes one step at a time: it appends the audit record,
//! dispatches on the step kind, applies the retry policy for actions, and
//! finalizes the record with the outcome. Parallel steps fan their children
//! out as concurrent runner invocations over the same execution handle and
//! join on all of them.

use crate::capability::{ActionExecutor, ConditionEvaluator};
use crate::decision::DecisionMaker;
use crate::definition::{ActionSpec, ConditionSpec, RetryPolicy, StepKind, WorkflowStep};
use crate::error::{ActionError, EngineError};
use crate::execution::{ExecutedStep, ExecutionStatus, LogLevel};
use crate::monitor::{ExecutionLifecycleEvent, ExecutionMonitor, LifecycleEventKind};
use crate::store::ExecutionHandle;
use flowline_ai::PredictionModel;
use futures::future::{BoxFuture, join_all};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Which successor a completed step routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepBranch {
    /// Take `on_success` / `next_step`.
    Success,
    /// Take `on_failure`. Produced by a condition that evaluated to false;
    /// the step itself still completed.
    Failure,
}

/// The result of a completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// The step's result payload, also written into the execution's
    /// variables under the step id.
    pub result: JsonValue,
    /// The successor branch to take.
    pub branch: StepBranch,
}

impl StepOutcome {
    /// A successful outcome on the success branch.
    #[must_use]
    pub fn success(result: JsonValue) -> Self {
        Self {
            result,
            branch: StepBranch::Success,
        }
    }
}

/// Executes single steps against an execution handle.
pub struct StepRunner {
    actions: Arc<dyn ActionExecutor>,
    conditions: Arc<dyn ConditionEvaluator>,
    decisions: DecisionMaker,
    monitor: Arc<ExecutionMonitor>,
}

impl StepRunner {
    /// Creates a runner over the injected capabilities.
    #[must_use]
    pub fn new(
        actions: Arc<dyn ActionExecutor>,
        conditions: Arc<dyn ConditionEvaluator>,
        model: Arc<dyn PredictionModel>,
        monitor: Arc<ExecutionMonitor>,
    ) -> Self {
        let decisions = DecisionMaker::new(model, Arc::clone(&actions));
        Self {
            actions,
            conditions,
            decisions,
            monitor,
        }
    }

    /// Runs one step: appends its audit record, dispatches, finalizes.
    ///
    /// # Errors
    ///
    /// Returns the step's escalated error after the retry policy is
    /// exhausted; the audit record is finalized as failed either way.
    pub fn run_step<'a>(
        &'a self,
        handle: &'a Arc<ExecutionHandle>,
        step: &'a WorkflowStep,
    ) -> BoxFuture<'a, Result<StepOutcome, EngineError>> {
        Box::pin(async move {
        let index = handle.with(|e| {
            e.current_step = Some(step.id.clone());
            e.log_step(
                LogLevel::Info,
                format!("step '{}' started", step.id),
                Some(step.id.clone()),
                None,
            );
            e.executed_steps.push(ExecutedStep::begin(step.id.clone()));
            e.executed_steps.len() - 1
        });
        self.monitor.publish(ExecutionLifecycleEvent::for_step(
            handle.id(),
            handle.workflow_id(),
            LifecycleEventKind::StepStarted,
            step.id.clone(),
        ));

        let outcome = self.dispatch(handle, step, index).await;

        match &outcome {
            Ok(o) => {
                handle.with(|e| {
                    e.executed_steps[index].complete(o.result.clone());
                    e.variables.insert(step.id.to_string(), o.result.clone());
                    e.log_step(
                        LogLevel::Info,
                        format!("step '{}' completed", step.id),
                        Some(step.id.clone()),
                        None,
                    );
                });
                self.monitor.publish(ExecutionLifecycleEvent::for_step(
                    handle.id(),
                    handle.workflow_id(),
                    LifecycleEventKind::StepCompleted,
                    step.id.clone(),
                ));
            }
            Err(err) => {
                handle.with(|e| {
                    e.executed_steps[index].fail(err.to_string());
                    e.log_step(
                        LogLevel::Error,
                        format!("step '{}' failed", step.id),
                        Some(step.id.clone()),
                        Some(json!({ "error": err.to_string() })),
                    );
                });
                self.monitor.publish(ExecutionLifecycleEvent::for_step(
                    handle.id(),
                    handle.workflow_id(),
                    LifecycleEventKind::StepFailed,
                    step.id.clone(),
                ));
            }
        }

        outcome
        })
    }

    async fn dispatch(
        &self,
        handle: &Arc<ExecutionHandle>,
        step: &WorkflowStep,
        index: usize,
    ) -> Result<StepOutcome, EngineError> {
        match &step.kind {
            StepKind::Action(spec) => self.run_action(handle, step, spec, index).await,
            StepKind::Condition(spec) => self.run_condition(handle, spec).await,
            StepKind::AiDecision(spec) => {
                let variables = handle.with(|e| e.variables.clone());
                let outcome = self.decisions.decide(spec, &variables).await?;
                Ok(StepOutcome::success(json!({
                    "decision": outcome.decision,
                    "confidence": outcome.confidence,
                    "result": outcome.result,
                })))
            }
            StepKind::Parallel { steps } => self.run_parallel(handle, step, steps).await,
            StepKind::Wait { duration_ms } => self.run_wait(handle, *duration_ms).await,
        }
    }

    async fn run_action(
        &self,
        handle: &Arc<ExecutionHandle>,
        step: &WorkflowStep,
        spec: &ActionSpec,
        index: usize,
    ) -> Result<StepOutcome, EngineError> {
        let policy: Option<RetryPolicy> = step
            .retry_policy
            .clone()
            .or_else(|| spec.retries.map(RetryPolicy::retries));
        let variables = handle.with(|e| e.variables.clone());
        let mut retry_count = 0u32;

        loop {
            match self.execute_once(spec, &variables).await {
                Ok(result) => return Ok(StepOutcome::success(result)),
                Err(err) => {
                    let Some(policy) = policy
                        .as_ref()
                        .filter(|p| p.is_retryable(err.class()) && retry_count < p.max_retries)
                    else {
                        return Err(err.into());
                    };
                    let delay = policy.delay_for(retry_count);
                    retry_count += 1;
                    handle.with(|e| {
                        e.executed_steps[index].record_retry();
                        e.log_step(
                            LogLevel::Warning,
                            format!(
                                "step '{}' retry {}/{} after error: {err}",
                                step.id, retry_count, policy.max_retries
                            ),
                            Some(step.id.clone()),
                            None,
                        );
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute_once(
        &self,
        spec: &ActionSpec,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<JsonValue, ActionError> {
        match spec.timeout_ms {
            Some(timeout_ms) => {
                let bound = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(bound, self.actions.execute(spec, variables)).await {
                    Ok(result) => result,
                    Err(_) => Err(ActionError::Timeout {
                        target: spec.target.clone(),
                        timeout_ms,
                    }),
                }
            }
            None => self.actions.execute(spec, variables).await,
        }
    }

    async fn run_condition(
        &self,
        handle: &Arc<ExecutionHandle>,
        spec: &ConditionSpec,
    ) -> Result<StepOutcome, EngineError> {
        let merged = handle.with(|e| {
            let mut merged = e.variables.clone();
            merged.extend(spec.variables.clone());
            merged
        });

        let holds = self.conditions.evaluate(spec, &merged).await?;
        if holds {
            Ok(StepOutcome::success(json!(true)))
        } else {
            // A false condition completes the step; routing decides what a
            // false result means for the execution.
            Ok(StepOutcome {
                result: json!(false),
                branch: StepBranch::Failure,
            })
        }
    }

    async fn run_parallel(
        &self,
        handle: &Arc<ExecutionHandle>,
        step: &WorkflowStep,
        children: &[WorkflowStep],
    ) -> Result<StepOutcome, EngineError> {
        let child_runs: Vec<BoxFuture<'_, Result<StepOutcome, EngineError>>> = children
            .iter()
            .map(|child| Box::pin(self.run_step(handle, child)) as BoxFuture<'_, _>)
            .collect();

        // Wait for all children; the first error wins but every started
        // child runs to completion and lands in the result set.
        let outcomes = join_all(child_runs).await;

        let mut results = serde_json::Map::new();
        let mut first_error: Option<EngineError> = None;
        for (child, outcome) in children.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => {
                    results.insert(child.id.to_string(), outcome.result);
                }
                Err(err) => {
                    results.insert(child.id.to_string(), json!({ "error": err.to_string() }));
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            None => Ok(StepOutcome::success(JsonValue::Object(results))),
            Some(err) => {
                handle.with(|e| {
                    e.log_step(
                        LogLevel::Error,
                        format!("parallel step '{}' failed", step.id),
                        Some(step.id.clone()),
                        Some(JsonValue::Object(results)),
                    );
                });
                Err(err)
            }
        }
    }

    async fn run_wait(
        &self,
        handle: &Arc<ExecutionHandle>,
        duration_ms: u64,
    ) -> Result<StepOutcome, EngineError> {
        let mut status = handle.subscribe_status();
        let sleep = tokio::time::sleep(Duration::from_millis(duration_ms));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => {
                    return Ok(StepOutcome::success(json!({ "waited_ms": duration_ms })));
                }
                changed = status.changed() => {
                    if changed.is_err() || *status.borrow() == ExecutionStatus::Cancelled {
                        // Cancelled mid-wait: stop sleeping; the driver
                        // stops before any further step.
                        return Ok(StepOutcome::success(json!({ "interrupted": true })));
                    }
                    // Paused/resumed: keep the wait running.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WorkflowCatalog;
    use crate::definition::ActionType;
    use crate::evaluator::RuleConditionEvaluator;
    use crate::execution::{StepStatus, WorkflowExecution};
    use crate::simulate::SimulatedActionExecutor;
    use crate::store::ExecutionStore;
    use flowline_ai::TablePredictionModel;
    use flowline_core::WorkflowId;

    struct Fixture {
        runner: Arc<StepRunner>,
        handle: Arc<ExecutionHandle>,
        actions: Arc<SimulatedActionExecutor>,
    }

    fn fixture() -> Fixture {
        fixture_with(SimulatedActionExecutor::new())
    }

    fn fixture_with(actions: SimulatedActionExecutor) -> Fixture {
        let actions = Arc::new(actions);
        let store = Arc::new(ExecutionStore::new());
        let monitor = Arc::new(ExecutionMonitor::new(
            Arc::new(WorkflowCatalog::new()),
            Arc::clone(&store),
        ));
        let runner = Arc::new(StepRunner::new(
            Arc::clone(&actions) as _,
            Arc::new(RuleConditionEvaluator::new()),
            Arc::new(TablePredictionModel::new()),
            monitor,
        ));
        let handle = store.insert(WorkflowExecution::new(
            WorkflowId::new(),
            "manual",
            HashMap::new(),
        ));
        Fixture {
            runner,
            handle,
            actions,
        }
    }

    fn action_step(id: &str, target: &str) -> WorkflowStep {
        WorkflowStep::new(
            id,
            id,
            StepKind::Action(ActionSpec::new(ActionType::Notification, target)),
        )
    }

    #[tokio::test]
    async fn action_step_records_result_and_variables() {
        let f = fixture();
        let step = action_step("notify", "ops");

        let outcome = f
            .runner
            .run_step(&f.handle, &step)
            .await
            .expect("should complete");
        assert_eq!(outcome.branch, StepBranch::Success);

        let execution = f.handle.snapshot();
        assert_eq!(execution.executed_steps.len(), 1);
        assert_eq!(execution.executed_steps[0].status, StepStatus::Completed);
        assert!(execution.variables.contains_key("notify"));
    }

    #[tokio::test]
    async fn retry_bound_is_max_retries_plus_one_attempts() {
        let f = fixture();
        f.actions.fail_times(
            "flaky",
            10,
            ActionError::Failed {
                class: "unavailable".to_string(),
                reason: "down".to_string(),
            },
        );
        let step = action_step("ping", "flaky").with_retry_policy(
            RetryPolicy::new(2, vec!["unavailable".to_string()]).with_retry_delay_ms(1),
        );

        let err = f
            .runner
            .run_step(&f.handle, &step)
            .await
            .expect_err("should exhaust retries");
        assert!(matches!(err, EngineError::Action(_)));

        // max_retries = 2 means at most 3 attempts.
        assert_eq!(f.actions.calls().len(), 3);
        let execution = f.handle.snapshot();
        assert_eq!(execution.executed_steps.len(), 1);
        assert_eq!(execution.executed_steps[0].retry_count, 2);
        assert_eq!(execution.executed_steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn retry_succeeds_in_place_after_transient_failures() {
        let f = fixture();
        f.actions.fail_times(
            "flaky",
            2,
            ActionError::Failed {
                class: "unavailable".to_string(),
                reason: "down".to_string(),
            },
        );
        let step = action_step("ping", "flaky").with_retry_policy(
            RetryPolicy::new(2, vec!["unavailable".to_string()]).with_retry_delay_ms(1),
        );

        f.runner
            .run_step(&f.handle, &step)
            .await
            .expect("should complete after retries");

        let execution = f.handle.snapshot();
        // Same record, not a new one per attempt.
        assert_eq!(execution.executed_steps.len(), 1);
        assert_eq!(execution.executed_steps[0].retry_count, 2);
        assert_eq!(execution.executed_steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn unlisted_error_class_is_fatal_immediately() {
        let f = fixture();
        f.actions.fail_next(
            "gate",
            ActionError::Failed {
                class: "rejected".to_string(),
                reason: "invalid recipient".to_string(),
            },
        );
        let step = action_step("send", "gate").with_retry_policy(
            RetryPolicy::new(5, vec!["timeout".to_string()]).with_retry_delay_ms(1),
        );

        f.runner
            .run_step(&f.handle, &step)
            .await
            .expect_err("should fail fast");
        assert_eq!(f.actions.calls().len(), 1);
    }

    #[tokio::test]
    async fn action_timeout_classifies_as_timeout() {
        let f = fixture_with(
            SimulatedActionExecutor::new().with_latency(Duration::from_millis(50)),
        );
        let step = WorkflowStep::new(
            "slow",
            "Slow",
            StepKind::Action(
                ActionSpec::new(ActionType::ApiCall, "https://slow.example.com")
                    .with_timeout_ms(5),
            ),
        );

        let err = f
            .runner
            .run_step(&f.handle, &step)
            .await
            .expect_err("should time out");
        match err {
            EngineError::Action(action_err) => assert_eq!(action_err.class(), "timeout"),
            other => panic!("expected action error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_retryable_when_listed() {
        let f = fixture_with(
            SimulatedActionExecutor::new().with_latency(Duration::from_millis(50)),
        );
        let step = WorkflowStep::new(
            "slow",
            "Slow",
            StepKind::Action(
                ActionSpec::new(ActionType::ApiCall, "https://slow.example.com")
                    .with_timeout_ms(5),
            ),
        )
        .with_retry_policy(RetryPolicy::new(1, vec!["timeout".to_string()]).with_retry_delay_ms(1));

        f.runner
            .run_step(&f.handle, &step)
            .await
            .expect_err("still times out");
        assert_eq!(f.actions.calls().len(), 2);
    }

    #[tokio::test]
    async fn condition_false_completes_on_failure_branch() {
        let f = fixture();
        f.handle
            .with(|e| e.variables.insert("count".to_string(), json!(0)));
        let step = WorkflowStep::new(
            "check",
            "Check",
            StepKind::Condition(ConditionSpec::new("count > 0")),
        );

        let outcome = f
            .runner
            .run_step(&f.handle, &step)
            .await
            .expect("false is not a failure");
        assert_eq!(outcome.branch, StepBranch::Failure);
        assert_eq!(outcome.result, json!(false));

        let execution = f.handle.snapshot();
        assert_eq!(execution.executed_steps[0].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn condition_spec_variables_shadow_execution_variables() {
        let f = fixture();
        f.handle
            .with(|e| e.variables.insert("count".to_string(), json!(0)));
        let step = WorkflowStep::new(
            "check",
            "Check",
            StepKind::Condition(ConditionSpec::new("count > 0").with_variable("count", json!(5))),
        );

        let outcome = f.runner.run_step(&f.handle, &step).await.expect("evaluates");
        assert_eq!(outcome.branch, StepBranch::Success);
    }

    #[tokio::test]
    async fn parallel_joins_all_children() {
        let f = fixture();
        let step = WorkflowStep::new(
            "fan_out",
            "Fan out",
            StepKind::Parallel {
                steps: vec![
                    action_step("a", "t1"),
                    action_step("b", "t2"),
                    action_step("c", "t3"),
                ],
            },
        );

        let outcome = f.runner.run_step(&f.handle, &step).await.expect("joins");
        let results = outcome.result.as_object().expect("map keyed by child id");
        assert_eq!(results.len(), 3);
        assert!(results.contains_key("a"));
        assert!(results.contains_key("c"));

        let execution = f.handle.snapshot();
        // One record for the parallel step plus one per child.
        assert_eq!(execution.executed_steps.len(), 4);
    }

    #[tokio::test]
    async fn parallel_fails_as_a_whole_but_children_finish() {
        let f = fixture();
        f.actions.fail_next(
            "t2",
            ActionError::Failed {
                class: "rejected".to_string(),
                reason: "nope".to_string(),
            },
        );
        let step = WorkflowStep::new(
            "fan_out",
            "Fan out",
            StepKind::Parallel {
                steps: vec![
                    action_step("a", "t1"),
                    action_step("b", "t2"),
                    action_step("c", "t3"),
                ],
            },
        );

        f.runner
            .run_step(&f.handle, &step)
            .await
            .expect_err("first error wins");

        // All three children attempted their dispatch.
        assert_eq!(f.actions.calls().len(), 3);
        let execution = f.handle.snapshot();
        let child_records = execution
            .executed_steps
            .iter()
            .filter(|s| s.step_id.as_str() != "fan_out")
            .count();
        assert_eq!(child_records, 3);
    }

    #[tokio::test]
    async fn wait_step_elapses() {
        let f = fixture();
        let step = WorkflowStep::new("pause", "Pause", StepKind::Wait { duration_ms: 5 });

        let outcome = f.runner.run_step(&f.handle, &step).await.expect("elapses");
        assert_eq!(outcome.result["waited_ms"], json!(5));
    }

    #[tokio::test]
    async fn wait_step_interrupted_by_cancel() {
        let f = fixture();
        let step = WorkflowStep::new("pause", "Pause", StepKind::Wait { duration_ms: 60_000 });

        let runner = Arc::clone(&f.runner);
        let handle = Arc::clone(&f.handle);
        let wait = tokio::spawn(async move { runner.run_step(&handle, &step).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.handle.cancel());

        let outcome = wait
            .await
            .expect("task joins")
            .expect("interrupted wait still completes");
        assert_eq!(outcome.result["interrupted"], json!(true));
    }
}
