//! Capability traits for external collaborators.
//!
//! The engine dispatches side effects and delegates judgment calls through
//! these seams; it never implements the concrete integrations itself.
//! Implementations are injected as `Arc<dyn …>` — production wiring points
//! them at real integrations, tests at in-memory fakes, and the default
//! server wiring at the simulated executor in [`crate::simulate`].

use crate::definition::{ActionSpec, ConditionSpec};
use crate::error::{ActionError, ConditionError};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Dispatches a single concrete action to the outside world.
///
/// Delivery is at-least-once; idempotency is the implementation's concern.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Executes one action and returns its result payload.
    ///
    /// # Errors
    ///
    /// Returns an [`ActionError`] whose class the step's retry policy
    /// classifies as retryable or fatal.
    async fn execute(
        &self,
        spec: &ActionSpec,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<JsonValue, ActionError>;
}

/// Evaluates a boolean condition against a variable bag.
///
/// The bag passed in is already the merge of the spec's snapshot over the
/// execution's variables; implementations only interpret the expression.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluates the condition.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] when the expression cannot be evaluated;
    /// a false result is not an error.
    async fn evaluate(
        &self,
        spec: &ConditionSpec,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<bool, ConditionError>;
}
