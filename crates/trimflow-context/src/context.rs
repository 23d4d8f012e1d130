use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{Path, merge};

/// The execution context threaded through a pipeline run.
///
/// Owned exclusively by one execution; parallel branches operate on
/// independent [`fork`](Context::fork)s and the parent merges their outputs
/// back at the join point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Context {
  value: Value,
}

impl Context {
  pub fn new(value: Value) -> Self {
    Self { value }
  }

  /// Look up the value at `path`, if present.
  pub fn get(&self, path: &Path) -> Option<&Value> {
    path.lookup(&self.value)
  }

  /// The value at `path`, cloned, or `Null` when absent.
  ///
  /// This is the input-selection rule for task states: a missing input path
  /// yields `Null`, not an error, matching how the workers tolerate sparse
  /// events.
  pub fn select(&self, path: &Path) -> Value {
    self.get(path).cloned().unwrap_or(Value::Null)
  }

  /// An independent copy for a concurrent branch.
  pub fn fork(&self) -> Context {
    self.clone()
  }

  /// Merge `update` at `path` in place.
  pub fn merge_at(&mut self, path: &Path, update: Value) {
    let value = std::mem::take(&mut self.value);
    self.value = merge(value, path, update);
  }

  pub fn as_value(&self) -> &Value {
    &self.value
  }

  pub fn into_value(self) -> Value {
    self.value
  }
}

impl From<Value> for Context {
  fn from(value: Value) -> Self {
    Self::new(value)
  }
}
