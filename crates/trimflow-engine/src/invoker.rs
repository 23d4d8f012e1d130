//! Worker invocation.
//!
//! Every Task state delegates to an external stateless worker through the
//! [`WorkerInvoker`] trait. The engine never knows what a worker does; it
//! hands over a JSON input, awaits a JSON output, and unwraps the
//! conventional result envelope before merging.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A worker returned a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("worker '{worker}' failed: {message}")]
pub struct InvokeError {
  pub worker: String,
  pub message: String,
}

impl InvokeError {
  pub fn new(worker: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      worker: worker.into(),
      message: message.into(),
    }
  }
}

/// Dispatches one unit of work to an external stateless worker.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
  async fn invoke(&self, worker: &str, input: Value) -> Result<Value, InvokeError>;
}

/// Unwrap the conventional result envelope.
///
/// Workers wrap their actual payload in an object with a `payload` field;
/// anything else is taken as the output itself.
pub fn unwrap_envelope(value: Value) -> Value {
  match value {
    Value::Object(mut map) if map.contains_key("payload") => {
      map.remove("payload").unwrap_or(Value::Null)
    }
    other => other,
  }
}
