//! Prediction model abstraction.
//!
//! Provides a unified interface over whatever produces labeled outcomes for
//! AI-driven workflow steps. The engine never sees a concrete model, only a
//! `(label, confidence)` pair.

use crate::error::PredictionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A labeled outcome with a confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// The decision label (e.g. "firm_notice", "gentle_reminder").
    pub label: String,
    /// Confidence in the label, in `[0, 1]`.
    pub confidence: f64,
}

impl Prediction {
    /// Creates a new prediction.
    #[must_use]
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Trait for prediction model backends.
///
/// Implementations may call out to a real model service; the in-tree
/// [`TablePredictionModel`] answers from a fixed table and exists for default
/// wiring and deterministic tests.
#[async_trait]
pub trait PredictionModel: Send + Sync {
    /// Produces a prediction for the given model over the supplied inputs.
    ///
    /// # Errors
    ///
    /// Returns [`PredictionError::Unavailable`] when the backend cannot
    /// produce a decision; callers fall back rather than fail.
    async fn predict(
        &self,
        model: &str,
        inputs: &HashMap<String, JsonValue>,
    ) -> Result<Prediction, PredictionError>;
}

/// A deterministic prediction model answering from a fixed table.
///
/// Each model id maps to a canned prediction. Unknown model ids report
/// [`PredictionError::Unavailable`] so callers exercise their fallback path.
#[derive(Debug, Clone, Default)]
pub struct TablePredictionModel {
    answers: HashMap<String, Prediction>,
}

impl TablePredictionModel {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a canned answer for a model id.
    #[must_use]
    pub fn with_answer(mut self, model: impl Into<String>, prediction: Prediction) -> Self {
        self.answers.insert(model.into(), prediction);
        self
    }
}

#[async_trait]
impl PredictionModel for TablePredictionModel {
    async fn predict(
        &self,
        model: &str,
        _inputs: &HashMap<String, JsonValue>,
    ) -> Result<Prediction, PredictionError> {
        self.answers
            .get(model)
            .cloned()
            .ok_or_else(|| PredictionError::Unavailable {
                model: model.to_string(),
                reason: "no answer configured".to_string(),
            })
    }
}
