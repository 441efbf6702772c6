//! Error types for the engine crate.
//!
//! The taxonomy follows the operation boundaries:
//! - `DefinitionError`: a malformed workflow definition, caught at
//!   registration or when the graph is walked
//! - `ActionError`: raised by the action executor; classified retryable or
//!   fatal by the step's retry policy via its error class
//! - `ConditionError`: a condition expression that could not be evaluated
//! - `EngineError`: the top-level error surfaced by engine operations

use flowline_ai::PredictionError;
use flowline_core::{ExecutionId, StepId, WorkflowId};
use std::fmt;

/// Errors from validating a workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionError {
    /// The workflow has no steps.
    EmptySteps { workflow_id: WorkflowId },
    /// Two steps share an id.
    DuplicateStepId { step_id: StepId },
    /// A successor pointer names an unknown step.
    DanglingStepRef { step_id: StepId, target: StepId },
    /// A decision threshold is outside `[0, 1]`.
    InvalidConfidence { step_id: StepId, value: f64 },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySteps { workflow_id } => {
                write!(f, "workflow {workflow_id} has no steps")
            }
            Self::DuplicateStepId { step_id } => {
                write!(f, "duplicate step id '{step_id}'")
            }
            Self::DanglingStepRef { step_id, target } => {
                write!(f, "step '{step_id}' references unknown step '{target}'")
            }
            Self::InvalidConfidence { step_id, value } => {
                write!(
                    f,
                    "step '{step_id}' confidence threshold {value} is outside [0, 1]"
                )
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Errors raised by the action executor.
///
/// Each error carries a class string matched against
/// `RetryPolicy::retry_conditions`; timeouts classify as `"timeout"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The executor call exceeded the action's timeout.
    Timeout { target: String, timeout_ms: u64 },
    /// The executor reported a failure of the given class.
    Failed { class: String, reason: String },
}

impl ActionError {
    /// Returns the error class used for retry classification.
    #[must_use]
    pub fn class(&self) -> &str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Failed { class, .. } => class,
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { target, timeout_ms } => {
                write!(f, "action on '{target}' timed out after {timeout_ms}ms")
            }
            Self::Failed { class, reason } => {
                write!(f, "action failed ({class}): {reason}")
            }
        }
    }
}

impl std::error::Error for ActionError {}

/// Errors from evaluating a condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// The expression could not be parsed or evaluated.
    InvalidExpression { expression: String, reason: String },
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExpression { expression, reason } => {
                write!(f, "invalid condition expression '{expression}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConditionError {}

/// Top-level errors surfaced by engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The workflow is unknown or inactive.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The execution is unknown.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The workflow definition is malformed (dangling successor, decision
    /// label with no configured action, …). Fatal to the execution, never
    /// retried.
    Configuration { reason: String },
    /// An action failed beyond its retry budget.
    Action(ActionError),
    /// A condition could not be evaluated.
    Condition(ConditionError),
    /// The prediction capability failed in a non-recoverable way.
    Prediction(PredictionError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::Configuration { reason } => {
                write!(f, "workflow configuration error: {reason}")
            }
            Self::Action(e) => write!(f, "action error: {e}"),
            Self::Condition(e) => write!(f, "condition error: {e}"),
            Self::Prediction(e) => write!(f, "prediction error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ActionError> for EngineError {
    fn from(e: ActionError) -> Self {
        Self::Action(e)
    }
}

impl From<ConditionError> for EngineError {
    fn from(e: ConditionError) -> Self {
        Self::Condition(e)
    }
}

impl From<PredictionError> for EngineError {
    fn from(e: PredictionError) -> Self {
        Self::Prediction(e)
    }
}

impl From<DefinitionError> for EngineError {
    fn from(e: DefinitionError) -> Self {
        Self::Configuration {
            reason: e.to_string(),
        }
    }
}
