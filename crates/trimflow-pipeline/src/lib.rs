//! Trimflow Video Pipeline
//!
//! This crate defines the concrete multi-stage video-processing pipeline:
//! the worker names, the wire types shared with the worker fleet, the
//! trigger-event parsing that starts an execution, and [`build_pipeline`],
//! which wires the whole state graph.
//!
//! The crate deliberately knows nothing about codecs or object storage; it
//! only shapes the graph and the JSON the workers exchange.

mod job;
mod pipeline;
mod trigger;
pub mod workers;

pub use job::{Chunk, Job, JobStatus, LabelParams};
pub use pipeline::{PipelineError, build_pipeline};
pub use trigger::{ORIGINAL_MARKER, TriggerError, TriggerEvent};
