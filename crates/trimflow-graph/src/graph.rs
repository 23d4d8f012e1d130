use serde::{Deserialize, Serialize};

use crate::state::{State, StateId};

/// A validated, immutable pipeline graph.
///
/// Constructed once through [`crate::GraphBuilder::build`]; every `StateId`
/// handed out by the builder is guaranteed to resolve, and the edge relation
/// is acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateGraph {
  pub(crate) states: Vec<State>,
  pub(crate) start: StateId,
}

impl StateGraph {
  pub fn start(&self) -> StateId {
    self.start
  }

  pub fn get(&self, id: StateId) -> Option<&State> {
    self.states.get(id.0)
  }

  pub fn len(&self) -> usize {
    self.states.len()
  }

  pub fn is_empty(&self) -> bool {
    self.states.is_empty()
  }

  /// Find a state by name.
  pub fn find(&self, name: &str) -> Option<StateId> {
    self
      .states
      .iter()
      .position(|s| s.name() == name)
      .map(StateId)
  }

  pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
    self.states.iter().enumerate().map(|(i, s)| (StateId(i), s))
  }
}
