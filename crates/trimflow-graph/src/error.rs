use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("state '{from}' has a dangling edge to index {target}")]
  DanglingEdge { from: String, target: usize },

  #[error("cycle detected through state '{state}'")]
  CycleDetected { state: String },

  #[error("duplicate state name: '{0}'")]
  DuplicateState(String),

  #[error("choice state '{state}' has no default target; rules may not match at runtime")]
  ChoiceNoMatch { state: String },

  #[error("cannot patch a next edge onto state '{state}'")]
  InvalidPatch { state: String },

  #[error("graph has no states")]
  Empty,
}
