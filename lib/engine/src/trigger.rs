//! Trigger types for workflow initiation.
//!
//! Triggers describe what starts an execution. The trigger router matches
//! `event`, `condition` and `ai_prediction` triggers against inbound events;
//! `schedule` triggers are fired by the external scheduler and `manual`
//! triggers by the explicit start operation, so the router never matches
//! those two itself.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// The kind of trigger, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Named platform event.
    Event,
    /// Time-based trigger with a cron expression.
    Schedule,
    /// Boolean expression over the event payload.
    Condition,
    /// User-initiated.
    Manual,
    /// Model prediction crossing a confidence threshold.
    AiPrediction,
}

/// A trigger, as a tagged union over its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Matches when an inbound event carries this type.
    Event {
        /// The event type to match (e.g. "invoice.overdue").
        event_type: String,
    },
    /// Fired by the external scheduler on cron ticks.
    Schedule {
        /// Cron expression (e.g. "0 0 7 * * *").
        cron: String,
    },
    /// Matches when the expression holds over the event payload.
    Condition {
        /// The boolean expression to evaluate.
        expression: String,
    },
    /// Started only by the explicit start operation.
    Manual,
    /// Matches when the model's confidence crosses the threshold.
    AiPrediction {
        /// Prediction model id.
        model: String,
        /// Minimum confidence for a match, in `[0, 1]`.
        threshold: f64,
    },
}

impl Trigger {
    /// Returns the trigger type.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Event { .. } => TriggerType::Event,
            Self::Schedule { .. } => TriggerType::Schedule,
            Self::Condition { .. } => TriggerType::Condition,
            Self::Manual => TriggerType::Manual,
            Self::AiPrediction { .. } => TriggerType::AiPrediction,
        }
    }
}

/// An inbound event routed against the catalog's triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// The event type (e.g. "invoice.overdue").
    pub event_type: String,
    /// Payload; seeds the variables of any execution the event starts.
    #[serde(default)]
    pub data: HashMap<String, JsonValue>,
}

impl TriggerEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: HashMap::new(),
        }
    }

    /// Adds a payload entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}
