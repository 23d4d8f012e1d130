//! Trimflow State Graph
//!
//! This crate provides the declarative pipeline definition: a tagged union of
//! state variants {Task, Choice, Parallel, Map, Pass, Succeed, Fail} stored
//! in an index-addressed arena. Edges are [`StateId`] indices, not embedded
//! references, so sub-graphs (Map item graphs, Parallel branches) live in the
//! same arena without ownership cycles.
//!
//! A graph is assembled through [`GraphBuilder`] and validated once at
//! [`GraphBuilder::build`]:
//! - every edge must point into the arena (no dangling edges);
//! - the graph and all sub-graphs must form a DAG;
//! - state names must be unique;
//! - a Choice must declare a default target (there is no runtime no-match).
//!
//! The built [`StateGraph`] is immutable thereafter and ready to be walked by
//! an execution engine.

mod builder;
mod choice;
mod error;
mod graph;
mod state;

pub use builder::GraphBuilder;
pub use choice::{ChoiceRule, Condition};
pub use error::GraphError;
pub use graph::StateGraph;
pub use state::{
  CATCH_ALL, Catcher, ChoiceState, FailState, MapState, ParallelState, PassState, State, StateId,
  SucceedState, TaskState,
};
