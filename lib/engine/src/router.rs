//! Event-to-workflow trigger routing.
//!
//! The router matches an inbound event against every active workflow's
//! triggers and starts an execution for each matching workflow. Matching is
//! priority-ordered across workflows, first-match-wins within a workflow
//! (at most one execution per workflow per event), and failure-isolated: an
//! error evaluating one workflow's triggers never stops the pass over the
//! others.

use crate::capability::ConditionEvaluator;
use crate::catalog::WorkflowCatalog;
use crate::definition::{ConditionSpec, Workflow};
use crate::engine::ExecutionEngine;
use crate::error::EngineError;
use crate::execution::WorkflowExecution;
use crate::trigger::{Trigger, TriggerEvent};
use flowline_ai::PredictionModel;
use std::sync::Arc;

/// Routes inbound events to workflow executions.
pub struct TriggerRouter {
    catalog: Arc<WorkflowCatalog>,
    engine: Arc<ExecutionEngine>,
    conditions: Arc<dyn ConditionEvaluator>,
    model: Arc<dyn PredictionModel>,
}

impl TriggerRouter {
    /// Creates a router over the given catalog, engine and capabilities.
    #[must_use]
    pub fn new(
        catalog: Arc<WorkflowCatalog>,
        engine: Arc<ExecutionEngine>,
        conditions: Arc<dyn ConditionEvaluator>,
        model: Arc<dyn PredictionModel>,
    ) -> Self {
        Self {
            catalog,
            engine,
            conditions,
            model,
        }
    }

    /// Routes one event: starts an execution for every active workflow with
    /// a matching trigger and returns the started executions, highest
    /// workflow priority first.
    ///
    /// Trigger evaluation errors are isolated per workflow: logged, then
    /// the pass continues with the next workflow.
    pub async fn route(&self, event: &TriggerEvent) -> Vec<WorkflowExecution> {
        let mut started = Vec::new();

        for workflow in self.catalog.active_workflows() {
            match self.matches_workflow(&workflow, event).await {
                Ok(false) => {}
                Ok(true) => {
                    match self.engine.start(
                        workflow.id,
                        event.event_type.clone(),
                        event.data.clone(),
                    ) {
                        Ok(execution) => started.push(execution),
                        Err(err) => {
                            tracing::warn!(
                                workflow_id = %workflow.id,
                                error = %err,
                                "matched workflow failed to start"
                            );
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        workflow_id = %workflow.id,
                        event_type = %event.event_type,
                        error = %err,
                        "trigger evaluation failed, skipping workflow"
                    );
                }
            }
        }

        started
    }

    /// Evaluates a workflow's triggers in order; the first match wins, so
    /// one event starts at most one execution per workflow.
    async fn matches_workflow(
        &self,
        workflow: &Workflow,
        event: &TriggerEvent,
    ) -> Result<bool, EngineError> {
        for trigger in &workflow.triggers {
            if self.matches_trigger(trigger, event).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn matches_trigger(
        &self,
        trigger: &Trigger,
        event: &TriggerEvent,
    ) -> Result<bool, EngineError> {
        match trigger {
            Trigger::Event { event_type } => Ok(event_type == &event.event_type),
            Trigger::Condition { expression } => {
                let spec = ConditionSpec::new(expression.clone());
                let matched = self.conditions.evaluate(&spec, &event.data).await?;
                Ok(matched)
            }
            Trigger::AiPrediction { model, threshold } => {
                let prediction = self.model.predict(model, &event.data).await?;
                Ok(prediction.confidence >= *threshold)
            }
            // Schedule triggers are fired by the external scheduler and
            // manual triggers by the explicit start operation.
            Trigger::Schedule { .. } | Trigger::Manual => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ActionSpec, ActionType, StepKind, WorkflowCategory, WorkflowStep};
    use crate::evaluator::RuleConditionEvaluator;
    use crate::simulate::SimulatedActionExecutor;
    use crate::store::ExecutionStore;
    use flowline_ai::{Prediction, TablePredictionModel};
    use serde_json::json;

    fn router_with_model(model: TablePredictionModel) -> (TriggerRouter, Arc<ExecutionEngine>) {
        let catalog = Arc::new(WorkflowCatalog::new());
        let store = Arc::new(ExecutionStore::new());
        let conditions: Arc<dyn ConditionEvaluator> = Arc::new(RuleConditionEvaluator::new());
        let model: Arc<dyn PredictionModel> = Arc::new(model);
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&catalog),
            store,
            Arc::new(SimulatedActionExecutor::new()),
            Arc::clone(&conditions),
            Arc::clone(&model),
        ));
        let router = TriggerRouter::new(catalog, Arc::clone(&engine), conditions, model);
        (router, engine)
    }

    fn router() -> (TriggerRouter, Arc<ExecutionEngine>) {
        router_with_model(TablePredictionModel::new())
    }

    fn workflow(name: &str) -> Workflow {
        Workflow::new(name, WorkflowCategory::Business).with_step(WorkflowStep::new(
            "notify",
            "Notify",
            StepKind::Action(ActionSpec::new(ActionType::Notification, "ops")),
        ))
    }

    #[tokio::test]
    async fn event_trigger_starts_matching_workflow() {
        let (router, engine) = router();
        let registered = engine
            .register_workflow(workflow("invoices").with_trigger(Trigger::Event {
                event_type: "invoice.overdue".to_string(),
            }))
            .expect("register");

        let started = router
            .route(&TriggerEvent::new("invoice.overdue").with_data("invoices_overdue", json!(3)))
            .await;

        assert_eq!(started.len(), 1);
        assert_eq!(started[0].workflow_id, registered.id);
        assert_eq!(started[0].triggered_by, "invoice.overdue");
        assert_eq!(started[0].variables.get("invoices_overdue"), Some(&json!(3)));

        let missed = router.route(&TriggerEvent::new("invoice.paid")).await;
        assert!(missed.is_empty());
    }

    #[tokio::test]
    async fn at_most_one_execution_per_workflow_per_event() {
        let (router, engine) = router();
        engine
            .register_workflow(
                workflow("eager")
                    .with_trigger(Trigger::Event {
                        event_type: "customer.churned".to_string(),
                    })
                    .with_trigger(Trigger::Event {
                        event_type: "customer.churned".to_string(),
                    })
                    .with_trigger(Trigger::Condition {
                        expression: "true".to_string(),
                    }),
            )
            .expect("register");

        let started = router.route(&TriggerEvent::new("customer.churned")).await;
        assert_eq!(started.len(), 1);
    }

    #[tokio::test]
    async fn condition_trigger_evaluates_event_payload() {
        let (router, engine) = router();
        engine
            .register_workflow(workflow("threshold").with_trigger(Trigger::Condition {
                expression: "invoices_overdue > 2".to_string(),
            }))
            .expect("register");

        let started = router
            .route(&TriggerEvent::new("invoice.scan").with_data("invoices_overdue", json!(3)))
            .await;
        assert_eq!(started.len(), 1);

        let skipped = router
            .route(&TriggerEvent::new("invoice.scan").with_data("invoices_overdue", json!(1)))
            .await;
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn prediction_trigger_gates_on_threshold() {
        let (router, engine) = router_with_model(
            TablePredictionModel::new().with_answer("churn_risk", Prediction::new("high", 0.7)),
        );
        engine
            .register_workflow(workflow("retention").with_trigger(Trigger::AiPrediction {
                model: "churn_risk".to_string(),
                threshold: 0.6,
            }))
            .expect("register");
        engine
            .register_workflow(workflow("escalation").with_trigger(Trigger::AiPrediction {
                model: "churn_risk".to_string(),
                threshold: 0.9,
            }))
            .expect("register");

        let started = router.route(&TriggerEvent::new("customer.activity")).await;
        assert_eq!(started.len(), 1);
    }

    #[tokio::test]
    async fn trigger_errors_are_isolated_per_workflow() {
        let (router, engine) = router();
        // An unanswerable prediction trigger errors during evaluation.
        engine
            .register_workflow(
                workflow("broken")
                    .with_priority(10)
                    .with_trigger(Trigger::AiPrediction {
                        model: "missing_model".to_string(),
                        threshold: 0.5,
                    }),
            )
            .expect("register");
        let healthy = engine
            .register_workflow(workflow("healthy").with_trigger(Trigger::Event {
                event_type: "customer.churned".to_string(),
            }))
            .expect("register");

        let started = router.route(&TriggerEvent::new("customer.churned")).await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].workflow_id, healthy.id);
    }

    #[tokio::test]
    async fn higher_priority_workflows_are_evaluated_first() {
        let (router, engine) = router();
        let low = engine
            .register_workflow(
                workflow("low").with_priority(1).with_trigger(Trigger::Event {
                    event_type: "tick".to_string(),
                }),
            )
            .expect("register");
        let high = engine
            .register_workflow(
                workflow("high")
                    .with_priority(5)
                    .with_trigger(Trigger::Event {
                        event_type: "tick".to_string(),
                    }),
            )
            .expect("register");

        let started = router.route(&TriggerEvent::new("tick")).await;
        assert_eq!(started.len(), 2);
        assert_eq!(started[0].workflow_id, high.id);
        assert_eq!(started[1].workflow_id, low.id);
    }

    #[tokio::test]
    async fn inactive_workflows_are_never_matched() {
        let (router, engine) = router();
        let mut wf = workflow("dormant").with_trigger(Trigger::Event {
            event_type: "tick".to_string(),
        });
        wf.deactivate();
        engine.register_workflow(wf).expect("register");

        let started = router.route(&TriggerEvent::new("tick")).await;
        assert!(started.is_empty());
    }

    #[tokio::test]
    async fn schedule_and_manual_triggers_never_match_events() {
        let (router, engine) = router();
        engine
            .register_workflow(
                workflow("scheduled")
                    .with_trigger(Trigger::Schedule {
                        cron: "0 0 7 * * *".to_string(),
                    })
                    .with_trigger(Trigger::Manual),
            )
            .expect("register");

        let started = router.route(&TriggerEvent::new("tick")).await;
        assert!(started.is_empty());
    }
}
