//! Simulated action execution.
//!
//! [`SimulatedActionExecutor`] stands in for the real integration
//! dispatchers: it returns canned per-action-type results after an optional
//! artificial latency, and failures can be scripted per target to drive
//! retry and timeout paths deterministically. The server's default wiring
//! uses it; tests script it.

use crate::capability::ActionExecutor;
use crate::definition::{ActionSpec, ActionType};
use crate::error::ActionError;
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// An action executor with controllable latency and failure injection.
#[derive(Default)]
pub struct SimulatedActionExecutor {
    latency: Option<Duration>,
    scripted: Mutex<HashMap<String, VecDeque<ActionError>>>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedActionExecutor {
    /// Creates an executor that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artificial latency to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Scripts the next call against `target` to fail with `error`.
    pub fn fail_next(&self, target: impl Into<String>, error: ActionError) {
        let mut scripted = self.scripted.lock().expect("simulate lock poisoned");
        scripted.entry(target.into()).or_default().push_back(error);
    }

    /// Scripts the next `count` calls against `target` to fail with clones
    /// of `error`.
    pub fn fail_times(&self, target: impl Into<String>, count: usize, error: ActionError) {
        let target = target.into();
        for _ in 0..count {
            self.fail_next(target.clone(), error.clone());
        }
    }

    /// Returns the targets of every attempted call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("simulate lock poisoned").clone()
    }

    fn canned_result(spec: &ActionSpec) -> JsonValue {
        match spec.action_type {
            ActionType::Notification => json!({
                "status": "delivered",
                "channel": "notification",
                "target": spec.target,
            }),
            ActionType::Email => json!({
                "status": "sent",
                "channel": "email",
                "target": spec.target,
            }),
            ActionType::DataUpdate => json!({
                "status": "updated",
                "target": spec.target,
                "records": 1,
            }),
            ActionType::ApiCall => json!({
                "status": "ok",
                "code": 200,
                "endpoint": spec.target,
            }),
            ActionType::FileGeneration => json!({
                "status": "generated",
                "file": format!("{}.pdf", spec.target),
            }),
            ActionType::Sms => json!({
                "status": "sent",
                "channel": "sms",
                "target": spec.target,
            }),
            ActionType::VoiceCall => json!({
                "status": "initiated",
                "channel": "voice",
                "target": spec.target,
            }),
        }
    }
}

#[async_trait]
impl ActionExecutor for SimulatedActionExecutor {
    async fn execute(
        &self,
        spec: &ActionSpec,
        _variables: &HashMap<String, JsonValue>,
    ) -> Result<JsonValue, ActionError> {
        self.calls
            .lock()
            .expect("simulate lock poisoned")
            .push(spec.target.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = {
            let mut scripted = self.scripted.lock().expect("simulate lock poisoned");
            scripted.get_mut(&spec.target).and_then(VecDeque::pop_front)
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        Ok(Self::canned_result(spec))
    }
}
