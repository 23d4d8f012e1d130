//! Trimflow Execution Context
//!
//! This crate provides the structured value that is threaded through a
//! pipeline execution. Every state reads its input from a [`Path`] into the
//! context and merges its result back at a declared path.
//!
//! The merge itself is a pure function (`merge(value, path, update)`) so that
//! its semantics can be tested independently of execution:
//! - merging at the root path (`$`) replaces the whole value;
//! - merging at a sub-path creates intermediate objects as needed and
//!   replaces whatever was at the leaf.

mod context;
mod error;
mod path;

pub use context::Context;
pub use error::PathError;
pub use path::{Path, merge};
