use serde::{Deserialize, Serialize};
use serde_json::Value;
use trimflow_context::{Context, Path};

use crate::state::StateId;

/// A boolean-valued lookup into the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
  BoolEquals { path: Path, value: bool },
  StringEquals { path: Path, value: String },
  NumericEquals { path: Path, value: f64 },
  IsPresent { path: Path },
}

impl Condition {
  /// Evaluate against the current context. A missing path never matches
  /// (except for the negative side of `IsPresent`).
  pub fn evaluate(&self, context: &Context) -> bool {
    match self {
      Condition::BoolEquals { path, value } => {
        context.get(path).and_then(Value::as_bool) == Some(*value)
      }
      Condition::StringEquals { path, value } => {
        context.get(path).and_then(Value::as_str) == Some(value.as_str())
      }
      Condition::NumericEquals { path, value } => {
        context.get(path).and_then(Value::as_f64) == Some(*value)
      }
      Condition::IsPresent { path } => context.get(path).is_some(),
    }
  }
}

/// One (condition, target) pair of a Choice state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
  pub condition: Condition,
  pub next: StateId,
}
