//! Workflow definition types.
//!
//! A workflow is a named automation that consists of:
//! - Metadata (name, description, category, priority)
//! - Triggers that start executions (see [`crate::trigger`])
//! - A directed graph of steps wired by successor pointers
//!
//! Definitions are immutable at run time; the catalog replaces the whole
//! definition on update. Aggregate statistics live next to the definition in
//! the catalog and are written only by the execution engine.

use crate::error::DefinitionError;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use flowline_core::{StepId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// Business area a workflow belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    /// General business automation.
    Business,
    /// Human resources.
    Hr,
    /// Finance and invoicing.
    Finance,
    /// Operations.
    Operations,
    /// Sales.
    Sales,
}

/// A complete workflow definition.
///
/// This is the source of truth for an automation: its triggers and its step
/// graph. `priority` is only a tie-break hint for the trigger router (higher
/// is evaluated first); `ai_adaptive` is informational and has no behavioral
/// effect on the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Description of what this workflow automates.
    pub description: Option<String>,
    /// Business area.
    pub category: WorkflowCategory,
    /// Triggers that can start an execution, in evaluation order.
    pub triggers: Vec<Trigger>,
    /// The step graph, in authoring order. Execution starts at the first
    /// step.
    pub steps: Vec<WorkflowStep>,
    /// Inactive workflows are never matched by the trigger router.
    pub is_active: bool,
    /// Reserved for future adaptive retraining; no behavioral effect.
    pub ai_adaptive: bool,
    /// Router tie-break hint; higher priority is evaluated first.
    pub priority: i32,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a new active workflow with the given name and category.
    #[must_use]
    pub fn new(name: impl Into<String>, category: WorkflowCategory) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            category,
            triggers: Vec::new(),
            steps: Vec::new(),
            is_active: true,
            ai_adaptive: false,
            priority: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Adds a step to the end of the graph.
    #[must_use]
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets the router priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the workflow as AI-adaptive.
    #[must_use]
    pub fn with_ai_adaptive(mut self) -> Self {
        self.ai_adaptive = true;
        self
    }

    /// Activates the workflow.
    pub fn activate(&mut self) {
        self.is_active = true;
        self.updated_at = Utc::now();
    }

    /// Deactivates the workflow.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// Returns the step with the given id, if any.
    #[must_use]
    pub fn step(&self, id: &StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Returns the entry step of the graph.
    #[must_use]
    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    /// Validates the definition.
    ///
    /// Checks that the graph is non-empty, step ids are unique, every
    /// successor pointer resolves, and decision thresholds are in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns the first [`DefinitionError`] found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::EmptySteps {
                workflow_id: self.id,
            });
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.clone()) {
                return Err(DefinitionError::DuplicateStepId {
                    step_id: step.id.clone(),
                });
            }
        }

        let known: HashSet<&StepId> = self.steps.iter().map(|s| &s.id).collect();
        for step in &self.steps {
            for target in [&step.next_step, &step.on_success, &step.on_failure]
                .into_iter()
                .flatten()
            {
                if !known.contains(target) {
                    return Err(DefinitionError::DanglingStepRef {
                        step_id: step.id.clone(),
                        target: target.clone(),
                    });
                }
            }
            step.validate_kind()?;
        }

        Ok(())
    }
}

/// A single unit of work in a workflow's graph.
///
/// Successor pointers name the next step by id: `next_step` and `on_success`
/// both advance after a successful run (`on_success` wins when both are
/// set), `on_failure` redirects a failed step — or a condition that
/// evaluated to false — instead of failing the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Author-chosen identifier, referenced by successor pointers.
    pub id: StepId,
    /// Human-readable name.
    pub name: String,
    /// What this step does.
    pub kind: StepKind,
    /// Retry policy for action dispatch. Absent means no retries unless the
    /// action spec declares the `retries` shorthand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Unconditional successor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<StepId>,
    /// Successor taken after a successful run; overrides `next_step`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<StepId>,
    /// Successor taken after a failed run or a false condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<StepId>,
}

impl WorkflowStep {
    /// Creates a new step with no successors.
    #[must_use]
    pub fn new(id: impl Into<StepId>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            retry_policy: None,
            next_step: None,
            on_success: None,
            on_failure: None,
        }
    }

    /// Sets the unconditional successor.
    #[must_use]
    pub fn with_next(mut self, id: impl Into<StepId>) -> Self {
        self.next_step = Some(id.into());
        self
    }

    /// Sets the success successor.
    #[must_use]
    pub fn with_on_success(mut self, id: impl Into<StepId>) -> Self {
        self.on_success = Some(id.into());
        self
    }

    /// Sets the failure successor.
    #[must_use]
    pub fn with_on_failure(mut self, id: impl Into<StepId>) -> Self {
        self.on_failure = Some(id.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    fn validate_kind(&self) -> Result<(), DefinitionError> {
        match &self.kind {
            StepKind::AiDecision(spec) => {
                if !(0.0..=1.0).contains(&spec.confidence) {
                    return Err(DefinitionError::InvalidConfidence {
                        step_id: self.id.clone(),
                        value: spec.confidence,
                    });
                }
                Ok(())
            }
            StepKind::Parallel { steps } => {
                let mut seen = HashSet::new();
                for child in steps {
                    if !seen.insert(child.id.clone()) {
                        return Err(DefinitionError::DuplicateStepId {
                            step_id: child.id.clone(),
                        });
                    }
                    child.validate_kind()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// What a step does, as a tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Dispatch a concrete action through the action executor.
    Action(ActionSpec),
    /// Evaluate a boolean condition; the result routes execution, it never
    /// fails the step.
    Condition(ConditionSpec),
    /// Let the decision maker pick an action from a confidence-gated model
    /// prediction.
    AiDecision(DecisionSpec),
    /// Run child steps concurrently and join on all of them.
    Parallel {
        /// The children fanned out by this step.
        steps: Vec<WorkflowStep>,
    },
    /// Suspend the execution for a fixed duration.
    Wait {
        /// How long to wait, in milliseconds.
        duration_ms: u64,
    },
}

/// The concrete side effect an action step dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// In-app notification.
    Notification,
    /// Outbound email.
    Email,
    /// Data mutation in the backing store.
    DataUpdate,
    /// Call to an external API.
    ApiCall,
    /// Document/file generation.
    FileGeneration,
    /// Outbound SMS.
    Sms,
    /// Outbound voice call.
    VoiceCall,
}

/// Specification of one concrete action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// The kind of side effect.
    pub action_type: ActionType,
    /// Who or what the action is aimed at (address, record id, endpoint).
    pub target: String,
    /// Opaque parameter bag passed through to the executor.
    #[serde(default)]
    pub parameters: HashMap<String, JsonValue>,
    /// Bound on a single executor call, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Shorthand retry count; seeds a default [`RetryPolicy`] when the step
    /// declares none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl ActionSpec {
    /// Creates a new action spec.
    #[must_use]
    pub fn new(action_type: ActionType, target: impl Into<String>) -> Self {
        Self {
            action_type,
            target: target.into(),
            parameters: HashMap::new(),
            timeout_ms: None,
            retries: None,
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Bounds each executor call to the given number of milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the shorthand retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

/// How the clauses of a condition expression compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    /// All clauses must hold.
    #[default]
    And,
    /// At least one clause must hold.
    Or,
    /// The (single) clause must not hold.
    Not,
}

/// Specification of a condition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// The boolean expression to evaluate.
    pub expression: String,
    /// Variable snapshot merged over the execution's variables for this
    /// evaluation only.
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
    /// Delegate evaluation to the prediction capability instead of the rule
    /// evaluator.
    #[serde(default)]
    pub ai_evaluated: bool,
    /// Clause composition. Evaluation is atomic; no partial short-circuit is
    /// observable across steps.
    #[serde(default)]
    pub logic: ConditionLogic,
}

impl ConditionSpec {
    /// Creates a deterministic condition over the given expression.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            variables: HashMap::new(),
            ai_evaluated: false,
            logic: ConditionLogic::And,
        }
    }

    /// Adds a snapshot variable.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Sets the clause composition.
    #[must_use]
    pub fn with_logic(mut self, logic: ConditionLogic) -> Self {
        self.logic = logic;
        self
    }

    /// Delegates evaluation to the prediction capability.
    #[must_use]
    pub fn ai_evaluated(mut self) -> Self {
        self.ai_evaluated = true;
        self
    }
}

/// Specification of an AI decision step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSpec {
    /// Prediction model id.
    pub model: String,
    /// Names of execution variables fed to the model.
    #[serde(default)]
    pub input_data: Vec<String>,
    /// Candidate actions keyed by decision label.
    #[serde(default)]
    pub output_actions: HashMap<String, ActionSpec>,
    /// Confidence threshold in `[0, 1]`; predictions below it take the
    /// fallback.
    pub confidence: f64,
    /// Action taken when confidence is below threshold or the model is
    /// unavailable. Mandatory.
    pub fallback_action: ActionSpec,
}

impl DecisionSpec {
    /// Creates a new decision spec.
    #[must_use]
    pub fn new(model: impl Into<String>, confidence: f64, fallback_action: ActionSpec) -> Self {
        Self {
            model: model.into(),
            input_data: Vec::new(),
            output_actions: HashMap::new(),
            confidence,
            fallback_action,
        }
    }

    /// Names an execution variable to feed to the model.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.input_data.push(name.into());
        self
    }

    /// Adds a candidate action for a decision label.
    #[must_use]
    pub fn with_output_action(mut self, label: impl Into<String>, action: ActionSpec) -> Self {
        self.output_actions.insert(label.into(), action);
        self
    }
}

/// Per-step retry configuration for action dispatch.
///
/// Only error classes listed in `retry_conditions` are retried; unlisted
/// classes are fatal immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay before the first retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Multiplier applied to the delay per retry.
    pub backoff_multiplier: f64,
    /// Error classes that are retryable.
    pub retry_conditions: Vec<String>,
}

impl RetryPolicy {
    /// Creates a policy with the given retry count and conditions, a 1s base
    /// delay and a 2x backoff.
    #[must_use]
    pub fn new(max_retries: u32, retry_conditions: Vec<String>) -> Self {
        Self {
            max_retries,
            retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            retry_conditions,
        }
    }

    /// Creates the shorthand policy seeded by [`ActionSpec::with_retries`]:
    /// the transient classes (`timeout`, `unavailable`) are retryable.
    #[must_use]
    pub fn retries(max_retries: u32) -> Self {
        Self::new(
            max_retries,
            vec!["timeout".to_string(), "unavailable".to_string()],
        )
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Returns whether the given error class is retryable under this policy.
    #[must_use]
    pub fn is_retryable(&self, class: &str) -> bool {
        self.retry_conditions.iter().any(|c| c == class)
    }

    /// Returns the backoff delay before retry number `retry_count + 1`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> std::time::Duration {
        let factor = self.backoff_multiplier.powi(retry_count as i32);
        let millis = (self.retry_delay_ms as f64 * factor).round() as u64;
        std::time::Duration::from_millis(millis)
    }
}
