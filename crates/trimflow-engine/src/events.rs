//! Execution events and notifiers for observability.
//!
//! Events are emitted during execution to allow consumers to observe
//! progress, persist state, stream to clients, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during a pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Execution has started.
  ExecutionStarted { execution_id: String },

  /// A state has been entered.
  StateEntered { execution_id: String, state: String },

  /// A state has completed and its result was merged.
  StateCompleted { execution_id: String, state: String },

  /// A state has raised an error (it may still be caught).
  StateFailed {
    execution_id: String,
    state: String,
    error: String,
  },

  /// Execution reached its success terminal.
  ExecutionSucceeded { execution_id: String },

  /// Execution reached its failure terminal.
  ExecutionFailed { execution_id: String, error: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide what to
/// do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
///
/// Useful for tests or when event observation is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this when you need to consume events asynchronously (e.g., persist
/// job status, push to a client over a websocket, etc.).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // NOTE: unbounded so a slow consumer never blocks the engine. Event volume
  // is low (a handful per state transition), so memory growth is unlikely in
  // practice.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
