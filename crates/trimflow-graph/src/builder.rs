use std::collections::HashSet;

use crate::error::GraphError;
use crate::graph::StateGraph;
use crate::state::{State, StateId};

/// Assembles a [`StateGraph`].
///
/// States are pushed with [`add`](GraphBuilder::add), which returns the
/// `StateId` used to wire later states to earlier ones. Building a pipeline
/// terminal-first avoids forward references entirely; [`set_next`] exists for
/// the cases where a forward edge is unavoidable.
///
/// [`set_next`]: GraphBuilder::set_next
#[derive(Debug, Default)]
pub struct GraphBuilder {
  states: Vec<State>,
  rejected_patches: Vec<String>,
}

impl GraphBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Push a state into the arena and return its id.
  pub fn add(&mut self, state: State) -> StateId {
    let id = StateId(self.states.len());
    self.states.push(state);
    id
  }

  /// Patch the `next` edge of an already-added state.
  ///
  /// Terminal variants (Succeed, Fail) and Choice states have no single
  /// `next` edge; patching one (or an id outside the arena) is recorded and
  /// fails `build` rather than silently dropping the edge.
  pub fn set_next(&mut self, from: StateId, to: StateId) {
    match self.states.get_mut(from.0) {
      Some(State::Task(s)) => s.next = Some(to),
      Some(State::Parallel(s)) => s.next = Some(to),
      Some(State::Map(s)) => s.next = Some(to),
      Some(State::Pass(s)) => s.next = Some(to),
      Some(state) => {
        let name = state.name().to_string();
        self.rejected_patches.push(name);
      }
      None => self.rejected_patches.push(format!("#{}", from.0)),
    }
  }

  /// Validate and freeze the graph.
  pub fn build(self, start: StateId) -> Result<StateGraph, GraphError> {
    if self.states.is_empty() {
      return Err(GraphError::Empty);
    }
    if let Some(state) = self.rejected_patches.first() {
      return Err(GraphError::InvalidPatch {
        state: state.clone(),
      });
    }
    self.check_edges(start)?;
    self.check_duplicate_names()?;
    self.check_choice_defaults()?;
    self.check_acyclic()?;

    Ok(StateGraph {
      states: self.states,
      start,
    })
  }

  fn check_edges(&self, start: StateId) -> Result<(), GraphError> {
    if start.0 >= self.states.len() {
      return Err(GraphError::DanglingEdge {
        from: "<start>".to_string(),
        target: start.0,
      });
    }
    for state in &self.states {
      for edge in state.edges() {
        if edge.0 >= self.states.len() {
          return Err(GraphError::DanglingEdge {
            from: state.name().to_string(),
            target: edge.0,
          });
        }
      }
    }
    Ok(())
  }

  fn check_duplicate_names(&self) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for state in &self.states {
      if !seen.insert(state.name()) {
        return Err(GraphError::DuplicateState(state.name().to_string()));
      }
    }
    Ok(())
  }

  fn check_choice_defaults(&self) -> Result<(), GraphError> {
    for state in &self.states {
      if let State::Choice(choice) = state
        && choice.default.is_none()
      {
        return Err(GraphError::ChoiceNoMatch {
          state: choice.name.clone(),
        });
      }
    }
    Ok(())
  }

  /// Colored DFS over the full edge relation (next, catch, choice targets,
  /// branch and item entries). Sub-graphs share the arena, so one pass covers
  /// Map item graphs and Parallel branches as well.
  fn check_acyclic(&self) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
      White,
      Gray,
      Black,
    }

    let mut colors = vec![Color::White; self.states.len()];

    for root in 0..self.states.len() {
      if colors[root] != Color::White {
        continue;
      }
      // Iterative DFS; (index, child cursor) pairs.
      let mut stack = vec![(root, 0usize)];
      colors[root] = Color::Gray;

      while let Some(frame) = stack.last_mut() {
        let index = frame.0;
        let edges = self.states[index].edges();
        if frame.1 < edges.len() {
          let child = edges[frame.1].0;
          frame.1 += 1;
          match colors[child] {
            Color::White => {
              colors[child] = Color::Gray;
              stack.push((child, 0));
            }
            Color::Gray => {
              return Err(GraphError::CycleDetected {
                state: self.states[child].name().to_string(),
              });
            }
            Color::Black => {}
          }
        } else {
          colors[index] = Color::Black;
          stack.pop();
        }
      }
    }
    Ok(())
  }
}
