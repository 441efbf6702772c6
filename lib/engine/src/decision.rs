//! Confidence-gated action selection.
//!
//! The decision maker sits between an AI decision step and the action
//! executor: it asks the prediction capability for a labeled outcome,
//! gates it on the step's confidence threshold, and dispatches either the
//! selected candidate action or the mandatory fallback.

use crate::capability::ActionExecutor;
use crate::definition::DecisionSpec;
use crate::error::EngineError;
use flowline_ai::{PredictionError, PredictionModel};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Label recorded when the fallback action ran.
pub const FALLBACK_LABEL: &str = "fallback";

/// The outcome of one decision step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// The label that selected the executed action, or `"fallback"`.
    pub decision: String,
    /// The model's confidence (0.0 when the model was unavailable).
    pub confidence: f64,
    /// The executed action's result payload.
    pub result: JsonValue,
}

/// Selects and dispatches one action per decision step.
pub struct DecisionMaker {
    model: Arc<dyn PredictionModel>,
    actions: Arc<dyn ActionExecutor>,
}

impl DecisionMaker {
    /// Creates a decision maker over the given capabilities.
    #[must_use]
    pub fn new(model: Arc<dyn PredictionModel>, actions: Arc<dyn ActionExecutor>) -> Self {
        Self { model, actions }
    }

    /// Decides and executes one action for the spec.
    ///
    /// Confidence at or above the threshold selects
    /// `output_actions[label]`; a label with no configured action is a
    /// configuration error, never a silent no-op. Below-threshold confidence
    /// and an unavailable model both take the fallback action, recording the
    /// decision as `"fallback"`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Configuration` for an unknown label,
    /// `EngineError::Action` when the dispatched action fails, and
    /// `EngineError::Prediction` for non-recoverable model errors.
    pub async fn decide(
        &self,
        spec: &DecisionSpec,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<DecisionOutcome, EngineError> {
        let inputs: HashMap<String, JsonValue> = spec
            .input_data
            .iter()
            .filter_map(|name| variables.get(name).map(|v| (name.clone(), v.clone())))
            .collect();

        match self.model.predict(&spec.model, &inputs).await {
            Ok(prediction) if prediction.confidence >= spec.confidence => {
                let action = spec.output_actions.get(&prediction.label).ok_or_else(|| {
                    EngineError::Configuration {
                        reason: format!(
                            "decision label '{}' has no configured action",
                            prediction.label
                        ),
                    }
                })?;
                let result = self.actions.execute(action, variables).await?;
                Ok(DecisionOutcome {
                    decision: prediction.label,
                    confidence: prediction.confidence,
                    result,
                })
            }
            Ok(prediction) => {
                tracing::debug!(
                    model = %spec.model,
                    label = %prediction.label,
                    confidence = prediction.confidence,
                    threshold = spec.confidence,
                    "confidence below threshold, taking fallback action"
                );
                self.fallback(spec, variables, prediction.confidence).await
            }
            Err(PredictionError::Unavailable { model, reason }) => {
                tracing::warn!(
                    model = %model,
                    reason = %reason,
                    "prediction unavailable, taking fallback action"
                );
                self.fallback(spec, variables, 0.0).await
            }
            Err(e) => Err(EngineError::Prediction(e)),
        }
    }

    async fn fallback(
        &self,
        spec: &DecisionSpec,
        variables: &HashMap<String, JsonValue>,
        confidence: f64,
    ) -> Result<DecisionOutcome, EngineError> {
        let result = self.actions.execute(&spec.fallback_action, variables).await?;
        Ok(DecisionOutcome {
            decision: FALLBACK_LABEL.to_string(),
            confidence,
            result,
        })
    }
}
