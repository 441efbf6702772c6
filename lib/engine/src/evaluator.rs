//! Rule-based condition evaluation.
//!
//! [`RuleConditionEvaluator`] is the default [`ConditionEvaluator`] backend:
//! a deterministic evaluator for comparison expressions over the variable
//! bag. Specs flagged `ai_evaluated` are delegated to the prediction
//! capability when one is wired, treating the expression as the judgment
//! key; if the model cannot answer, evaluation falls back to the
//! deterministic rules so a degraded model never strands a workflow.
//!
//! Expression grammar, one clause per logic operand:
//!
//! ```text
//! clause     := operand | operand op operand
//! op         := == | != | >= | <= | > | < | contains
//! operand    := 'string' | "string" | number | true | false | null | variable
//! expression := clause (&& clause)*   -- logic = and
//!             | clause (|| clause)*   -- logic = or
//!             | clause                -- logic = not (negated)
//! ```
//!
//! A bare operand clause is its truthiness: missing variables and `null`
//! are false, numbers are non-zero, strings and collections are non-empty.

use crate::capability::ConditionEvaluator;
use crate::definition::{ConditionLogic, ConditionSpec};
use crate::error::ConditionError;
use async_trait::async_trait;
use flowline_ai::{PredictionError, PredictionModel};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Confidence below which an AI judgment is not trusted as `true`.
const AI_JUDGMENT_THRESHOLD: f64 = 0.5;

/// The default condition evaluator.
pub struct RuleConditionEvaluator {
    model: Option<Arc<dyn PredictionModel>>,
}

impl RuleConditionEvaluator {
    /// Creates a purely deterministic evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Wires a prediction model for `ai_evaluated` specs.
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn PredictionModel>) -> Self {
        self.model = Some(model);
        self
    }

    fn evaluate_rules(
        &self,
        spec: &ConditionSpec,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<bool, ConditionError> {
        let expression = spec.expression.trim();
        if expression.is_empty() {
            return Err(ConditionError::InvalidExpression {
                expression: spec.expression.clone(),
                reason: "empty expression".to_string(),
            });
        }

        match spec.logic {
            ConditionLogic::And => {
                for clause in expression.split("&&") {
                    if !self.evaluate_clause(clause, &spec.expression, variables)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionLogic::Or => {
                for clause in expression.split("||") {
                    if self.evaluate_clause(clause, &spec.expression, variables)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConditionLogic::Not => {
                let value = self.evaluate_clause(expression, &spec.expression, variables)?;
                Ok(!value)
            }
        }
    }

    fn evaluate_clause(
        &self,
        clause: &str,
        expression: &str,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<bool, ConditionError> {
        let clause = clause.trim();
        if clause.is_empty() {
            return Err(ConditionError::InvalidExpression {
                expression: expression.to_string(),
                reason: "empty clause".to_string(),
            });
        }

        // Two-character operators before their one-character prefixes.
        for op in [">=", "<=", "==", "!=", ">", "<"] {
            if let Some((lhs, rhs)) = clause.split_once(op) {
                let lhs = resolve_operand(lhs.trim(), variables);
                let rhs = resolve_operand(rhs.trim(), variables);
                return compare(op, &lhs, &rhs, expression);
            }
        }

        if let Some((lhs, rhs)) = clause.split_once(" contains ") {
            let lhs = resolve_operand(lhs.trim(), variables);
            let rhs = resolve_operand(rhs.trim(), variables);
            return contains(&lhs, &rhs, expression);
        }

        // Bare operand: truthiness.
        Ok(truthy(&resolve_operand(clause, variables)))
    }
}

impl Default for RuleConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConditionEvaluator for RuleConditionEvaluator {
    async fn evaluate(
        &self,
        spec: &ConditionSpec,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<bool, ConditionError> {
        if spec.ai_evaluated {
            if let Some(model) = &self.model {
                match model.predict(&spec.expression, variables).await {
                    Ok(prediction) => {
                        let affirmative =
                            matches!(prediction.label.as_str(), "true" | "yes" | "matched");
                        return Ok(affirmative && prediction.confidence >= AI_JUDGMENT_THRESHOLD);
                    }
                    Err(PredictionError::Unavailable { model, .. }) => {
                        tracing::warn!(
                            model = %model,
                            expression = %spec.expression,
                            "AI judgment unavailable, falling back to rule evaluation"
                        );
                    }
                    Err(e) => {
                        return Err(ConditionError::InvalidExpression {
                            expression: spec.expression.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        self.evaluate_rules(spec, variables)
    }
}

fn resolve_operand(raw: &str, variables: &HashMap<String, JsonValue>) -> JsonValue {
    if (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
        || (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
    {
        return JsonValue::String(raw[1..raw.len() - 1].to_string());
    }
    match raw {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        "null" => return JsonValue::Null,
        _ => {}
    }
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(n) {
            return JsonValue::Number(number);
        }
    }
    variables.get(raw).cloned().unwrap_or(JsonValue::Null)
}

fn compare(
    op: &str,
    lhs: &JsonValue,
    rhs: &JsonValue,
    expression: &str,
) -> Result<bool, ConditionError> {
    match op {
        "==" => Ok(loose_eq(lhs, rhs)),
        "!=" => Ok(!loose_eq(lhs, rhs)),
        _ => {
            if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
                Ok(match op {
                    ">" => l > r,
                    "<" => l < r,
                    ">=" => l >= r,
                    "<=" => l <= r,
                    _ => unreachable!("unhandled operator"),
                })
            } else if let (Some(l), Some(r)) = (lhs.as_str(), rhs.as_str()) {
                Ok(match op {
                    ">" => l > r,
                    "<" => l < r,
                    ">=" => l >= r,
                    "<=" => l <= r,
                    _ => unreachable!("unhandled operator"),
                })
            } else {
                Err(ConditionError::InvalidExpression {
                    expression: expression.to_string(),
                    reason: format!("operands of '{op}' are not comparable"),
                })
            }
        }
    }
}

fn loose_eq(lhs: &JsonValue, rhs: &JsonValue) -> bool {
    // Compare numbers numerically so 3 == 3.0 holds.
    if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
        return l == r;
    }
    lhs == rhs
}

fn contains(lhs: &JsonValue, rhs: &JsonValue, expression: &str) -> Result<bool, ConditionError> {
    match lhs {
        JsonValue::String(haystack) => {
            let needle = rhs.as_str().map(str::to_string).unwrap_or_else(|| rhs.to_string());
            Ok(haystack.contains(&needle))
        }
        JsonValue::Array(items) => Ok(items.iter().any(|item| loose_eq(item, rhs))),
        _ => Err(ConditionError::InvalidExpression {
            expression: expression.to_string(),
            reason: "'contains' needs a string or array on the left".to_string(),
        }),
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}
