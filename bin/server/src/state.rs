//! Application state and default wiring.

use crate::config::ServerConfig;
use flowline_ai::{Prediction, TablePredictionModel};
use flowline_engine::{
    ExecutionEngine, ExecutionStore, RuleConditionEvaluator, SimulatedActionExecutor,
    TriggerRouter, WorkflowCatalog,
};
use std::sync::Arc;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The execution engine.
    pub engine: Arc<ExecutionEngine>,
    /// The trigger router.
    pub router: Arc<TriggerRouter>,
}

impl AppState {
    /// Builds the default wiring: in-memory catalog and store, the
    /// simulated action executor, the rule condition evaluator and a table
    /// prediction model seeded with the stock business models.
    ///
    /// Production deployments swap the executor and model for real
    /// integrations; the engine only sees the capability traits.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let catalog = Arc::new(WorkflowCatalog::new());
        let store = Arc::new(ExecutionStore::with_capacity(
            config.engine.history_capacity,
        ));
        let model = Arc::new(
            TablePredictionModel::new()
                .with_answer("invoice_category", Prediction::new("firm_notice", 0.9))
                .with_answer("churn_risk", Prediction::new("medium", 0.7))
                .with_answer("allocation_fit", Prediction::new("assign", 0.8)),
        );
        let conditions = Arc::new(RuleConditionEvaluator::new().with_model(model.clone()));
        let actions = Arc::new(SimulatedActionExecutor::new());

        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&catalog),
            store,
            actions,
            conditions.clone(),
            model.clone(),
        ));
        let router = Arc::new(TriggerRouter::new(
            catalog,
            Arc::clone(&engine),
            conditions,
            model,
        ));

        Self { engine, router }
    }
}
