use serde::{Deserialize, Serialize};
use serde_json::Value;
use trimflow_context::Path;

use crate::choice::ChoiceRule;

/// Index of a state in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub(crate) usize);

impl StateId {
  pub fn index(&self) -> usize {
    self.0
  }
}

/// Wildcard error matcher: catches every error kind.
pub const CATCH_ALL: &str = "Error.ALL";

/// A recovery edge: redirects control to `next` when a raised error's kind is
/// listed in `errors` (or `errors` contains [`CATCH_ALL`]). The error object
/// is merged into the context at `result_path` before the transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catcher {
  pub errors: Vec<String>,
  pub result_path: Path,
  pub next: StateId,
}

impl Catcher {
  pub fn catch_all(result_path: Path, next: StateId) -> Self {
    Self {
      errors: vec![CATCH_ALL.to_string()],
      result_path,
      next,
    }
  }

  pub fn matches(&self, kind: &str) -> bool {
    self.errors.iter().any(|e| e == CATCH_ALL || e == kind)
  }
}

/// Delegates one unit of work to an external stateless worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
  pub name: String,
  /// Name of the external worker to invoke.
  pub worker: String,
  /// Context sub-path handed to the worker as input.
  pub input_path: Path,
  /// Where the (envelope-unwrapped) worker result is merged.
  pub result_path: Path,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  pub next: Option<StateId>,
  #[serde(default)]
  pub catch: Vec<Catcher>,
}

/// Routes to the first rule whose condition holds, else to `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
  pub name: String,
  pub rules: Vec<ChoiceRule>,
  pub default: Option<StateId>,
}

/// Runs fixed branches concurrently against independent context forks.
///
/// The ordered list of branch outputs is merged at `result_path`; the node
/// fails as a whole if any branch fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelState {
  pub name: String,
  /// Entry state of each branch sub-graph.
  pub branches: Vec<StateId>,
  pub result_path: Path,
  pub next: Option<StateId>,
  #[serde(default)]
  pub catch: Vec<Catcher>,
}

/// Bounded-concurrency, order-preserving fan-out of a sub-graph over the
/// items found at `items_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
  pub name: String,
  pub items_path: Path,
  /// Entry state of the item sub-graph, run once per item.
  pub item_entry: StateId,
  /// Configured cap; the effective cap is `min(this, resolved quota)`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_concurrency: Option<usize>,
  pub result_path: Path,
  pub next: Option<StateId>,
  #[serde(default)]
  pub catch: Vec<Catcher>,
}

/// Merges a static result into the context without invoking a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassState {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  pub result_path: Path,
  pub next: Option<StateId>,
}

/// Terminal success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceedState {
  pub name: String,
}

/// Terminal failure with a declared error kind and cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailState {
  pub name: String,
  pub error: String,
  pub cause: String,
}

/// A pipeline state: the tagged union over all node variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum State {
  Task(TaskState),
  Choice(ChoiceState),
  Parallel(ParallelState),
  Map(MapState),
  Pass(PassState),
  Succeed(SucceedState),
  Fail(FailState),
}

impl State {
  pub fn name(&self) -> &str {
    match self {
      State::Task(s) => &s.name,
      State::Choice(s) => &s.name,
      State::Parallel(s) => &s.name,
      State::Map(s) => &s.name,
      State::Pass(s) => &s.name,
      State::Succeed(s) => &s.name,
      State::Fail(s) => &s.name,
    }
  }

  /// Recovery edges declared on this state, in declaration order.
  pub fn catchers(&self) -> &[Catcher] {
    match self {
      State::Task(s) => &s.catch,
      State::Parallel(s) => &s.catch,
      State::Map(s) => &s.catch,
      _ => &[],
    }
  }

  /// All outgoing edges, for validation.
  pub(crate) fn edges(&self) -> Vec<StateId> {
    let mut edges = Vec::new();
    match self {
      State::Task(s) => {
        edges.extend(s.next);
        edges.extend(s.catch.iter().map(|c| c.next));
      }
      State::Choice(s) => {
        edges.extend(s.rules.iter().map(|r| r.next));
        edges.extend(s.default);
      }
      State::Parallel(s) => {
        edges.extend(s.branches.iter().copied());
        edges.extend(s.next);
        edges.extend(s.catch.iter().map(|c| c.next));
      }
      State::Map(s) => {
        edges.push(s.item_entry);
        edges.extend(s.next);
        edges.extend(s.catch.iter().map(|c| c.next));
      }
      State::Pass(s) => {
        edges.extend(s.next);
      }
      State::Succeed(_) | State::Fail(_) => {}
    }
    edges
  }
}
