//! Trimflow Execution Engine
//!
//! This crate interprets a [`trimflow_graph::StateGraph`] and drives one job
//! execution to exactly one terminal outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  - holds the WorkerInvoker and the resolved quota           │
//! │  - execute(graph, input, cancel) → Outcome                  │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     interpreter loop                        │
//! │  - walks StateIds, merges results into the context          │
//! │  - Parallel/Map fork the context and join concurrently      │
//! │  - errors route through catch lists, first match wins       │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerInvoker                         │
//! │  - dispatches task states to external stateless workers     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine never recalls work already handed to a worker: cancellation and
//! fail-fast joins only stop waiting on results and discard them.

mod engine;
mod error;
mod events;
mod invoker;
mod quota;

pub use engine::{Engine, EngineConfig, ExecutionStatus, Outcome};
pub use error::ExecutionError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use invoker::{InvokeError, WorkerInvoker, unwrap_envelope};
pub use quota::{DEFAULT_QUOTA, QuotaError, QuotaResolver, StaticQuota, resolve_quota};
