//! Workflow orchestration engine for the flowline platform.
//!
//! This crate provides the trigger-driven, multi-step execution engine that
//! runs business automations as stateful, potentially long-running,
//! partially AI-driven pipelines:
//!
//! - **Definitions**: immutable workflows with tagged-union triggers and
//!   steps (action, condition, AI decision, parallel, wait)
//! - **Catalog**: the read-mostly home of definitions plus per-workflow
//!   statistics written only by the engine
//! - **Execution**: the per-run state machine with pause/resume/cancel and
//!   an append-only audit trail
//! - **Step runner**: per-kind dispatch, retry policies with exponential
//!   backoff, parallel fan-out/join
//! - **Router**: event-to-workflow trigger matching with per-workflow
//!   failure isolation
//! - **Monitor**: best-effort lifecycle event and snapshot streaming
//!
//! Side effects, condition judgment and predictions flow through injected
//! capability traits; the engine implements none of the concrete
//! integrations.

pub mod capability;
pub mod catalog;
pub mod decision;
pub mod definition;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod monitor;
pub mod router;
pub mod runner;
pub mod simulate;
pub mod store;
pub mod trigger;

pub use capability::{ActionExecutor, ConditionEvaluator};
pub use catalog::{CatalogStats, WorkflowCatalog, WorkflowEntry, WorkflowStats};
pub use decision::{DecisionMaker, DecisionOutcome, FALLBACK_LABEL};
pub use definition::{
    ActionSpec, ActionType, ConditionLogic, ConditionSpec, DecisionSpec, RetryPolicy, StepKind,
    Workflow, WorkflowCategory, WorkflowStep,
};
pub use engine::ExecutionEngine;
pub use error::{ActionError, ConditionError, DefinitionError, EngineError};
pub use evaluator::RuleConditionEvaluator;
pub use execution::{
    ExecutedStep, ExecutionLog, ExecutionStatus, LogLevel, StepStatus, WorkflowExecution,
};
pub use monitor::{
    ExecutionLifecycleEvent, ExecutionMonitor, LifecycleEventKind, MonitorSnapshot,
};
pub use router::TriggerRouter;
pub use runner::{StepBranch, StepOutcome, StepRunner};
pub use simulate::SimulatedActionExecutor;
pub use store::{ExecutionHandle, ExecutionStats, ExecutionStore};
pub use trigger::{Trigger, TriggerEvent, TriggerType};
