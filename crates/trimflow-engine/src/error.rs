//! Execution errors.
//!
//! Every catchable error exposes a [`kind`](ExecutionError::kind) string;
//! catch lists match on kinds (or the `Error.ALL` wildcard) and receive the
//! error as a JSON object via [`to_error_value`](ExecutionError::to_error_value).

use serde_json::{Value, json};

use crate::invoker::InvokeError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  /// The worker returned a failure.
  #[error("worker invocation failed in state '{state}': {source}")]
  Invocation {
    state: String,
    #[source]
    source: InvokeError,
  },

  /// The state exceeded its declared duration.
  #[error("state '{state}' timed out after {timeout_ms}ms")]
  Timeout { state: String, timeout_ms: u64 },

  /// An item failed within a Map; fails the whole Map exactly once.
  #[error("map state '{state}' failed at item {index}: {source}")]
  MapItem {
    state: String,
    index: usize,
    #[source]
    source: Box<ExecutionError>,
  },

  /// A Fail state was reached; carries its declared error kind.
  #[error("fail state '{state}' reached: {error}: {cause}")]
  StateFail {
    state: String,
    error: String,
    cause: String,
  },

  /// A Map's items path did not resolve to an array.
  #[error("items path '{path}' in state '{state}' did not resolve to an array")]
  ItemsNotArray { state: String, path: String },

  /// An error stayed uncaught at top level and the graph has no Fail
  /// terminal to absorb it.
  #[error("unrecoverable error in state '{state}': {kind}: {cause}")]
  Unrecoverable {
    state: String,
    kind: String,
    cause: String,
  },

  /// Graph and engine disagree; indicates a bug, not a runtime condition.
  #[error("invalid graph: {message}")]
  InvalidGraph { message: String },

  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,
}

impl ExecutionError {
  /// The error kind matched by catch lists.
  pub fn kind(&self) -> &str {
    match self {
      ExecutionError::Invocation { .. } => "InvocationError",
      ExecutionError::Timeout { .. } => "TimeoutError",
      ExecutionError::MapItem { .. } => "MapItemError",
      ExecutionError::StateFail { error, .. } => error,
      ExecutionError::ItemsNotArray { .. } => "ItemsPathError",
      ExecutionError::Unrecoverable { kind, .. } => kind,
      ExecutionError::InvalidGraph { .. } => "InvalidGraphError",
      ExecutionError::Cancelled => "CancelledError",
    }
  }

  /// The state that raised this error, when one did.
  pub fn state(&self) -> Option<&str> {
    match self {
      ExecutionError::Invocation { state, .. }
      | ExecutionError::Timeout { state, .. }
      | ExecutionError::MapItem { state, .. }
      | ExecutionError::StateFail { state, .. }
      | ExecutionError::ItemsNotArray { state, .. }
      | ExecutionError::Unrecoverable { state, .. } => Some(state),
      ExecutionError::InvalidGraph { .. } | ExecutionError::Cancelled => None,
    }
  }

  /// Whether catch lists may recover from this error.
  ///
  /// Cancellation, graph bugs, and errors already past the last recovery
  /// point always terminate the execution.
  pub fn is_catchable(&self) -> bool {
    !matches!(
      self,
      ExecutionError::Cancelled
        | ExecutionError::InvalidGraph { .. }
        | ExecutionError::Unrecoverable { .. }
    )
  }

  /// The JSON object attached at a catcher's result path.
  pub fn to_error_value(&self) -> Value {
    json!({
      "error": self.kind(),
      "cause": self.to_string(),
    })
  }
}
