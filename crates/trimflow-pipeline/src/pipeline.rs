//! The video-processing pipeline graph.
//!
//! ```text
//! ProbeJob ──► ExtractParallel ──────────────► NotifySuccess ──► Cleanup ──► Done
//!    │          ├ ExtractData                        │              │
//!    │          ├ CheckAudio ─► ExtractAudio         │              │
//!    │          │            └► SkipAudio            │              │
//!    │          └ Preprocess ─► ProcessChunks (Map)  │              │
//!    │                        ─► PostProcess         │              │
//!    │                           ├ ReduceChunks      │              │
//!    │                           └ LabelChunks (Map) │              │
//!    │                        ─► GenerateThumbnail   │              │
//!    ▼ (catch)                                       ▼ (catch)      ▼ (catch)
//! HandleError ──► NotifyFailure ──► CleanupAfterError ──► JobFailed
//! ```
//!
//! Every path through the graph reaches cleanup before its terminal: the
//! success tail runs `Cleanup`, and every recovery edge funnels into
//! `HandleError`, whose tail runs `CleanupAfterError` against the same
//! idempotent worker.

use serde_json::json;
use thiserror::Error;
use trimflow_context::{Path, PathError};
use trimflow_graph::{
  Catcher, ChoiceRule, ChoiceState, Condition, FailState, GraphBuilder, GraphError, MapState,
  ParallelState, PassState, State, StateGraph, StateId, SucceedState, TaskState,
};

use crate::job::LabelParams;
use crate::workers;

/// Per-chunk transcode allowance. Chunks are a fixed target duration, so a
/// transcode exceeding this is stuck, not slow.
const PROCESS_CHUNK_TIMEOUT_MS: u64 = 900_000;

/// Probe inspects stream headers only; it finishes in seconds or not at all.
const PROBE_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Path(#[from] PathError),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

fn task(name: &str, worker: &str, result_path: Path, next: Option<StateId>) -> State {
  State::Task(TaskState {
    name: name.to_string(),
    worker: worker.to_string(),
    input_path: Path::root(),
    result_path,
    timeout_ms: None,
    next,
    catch: vec![],
  })
}

/// Wire the full pipeline graph.
///
/// `chunk_concurrency` caps the chunk-processing fan-out; the engine further
/// clamps it to the resolved account quota at run time.
pub fn build_pipeline(chunk_concurrency: usize) -> Result<StateGraph, PipelineError> {
  let mut b = GraphBuilder::new();
  let error_path = Path::parse("$.error")?;

  // Failure tail. Reached only through recovery edges; ends in the failure
  // terminal after cleanup.
  let job_failed = b.add(State::Fail(FailState {
    name: "JobFailed".to_string(),
    error: "JobFailedError".to_string(),
    cause: "video processing failed".to_string(),
  }));
  let cleanup_after_error = b.add(task(
    "CleanupAfterError",
    workers::CLEANUP,
    Path::parse("$.cleanup")?,
    Some(job_failed),
  ));
  let notify_failure = b.add(task(
    "NotifyFailure",
    workers::TERMINATE,
    Path::parse("$.notify")?,
    Some(cleanup_after_error),
  ));
  let handle_error = b.add(task(
    "HandleError",
    workers::HANDLE_ERROR,
    Path::parse("$.handled")?,
    Some(notify_failure),
  ));

  // Success tail.
  let done = b.add(State::Succeed(SucceedState {
    name: "Done".to_string(),
  }));
  let cleanup = b.add(State::Task(TaskState {
    name: "Cleanup".to_string(),
    worker: workers::CLEANUP.to_string(),
    input_path: Path::root(),
    result_path: Path::parse("$.cleanup")?,
    timeout_ms: None,
    next: Some(done),
    catch: vec![Catcher::catch_all(error_path.clone(), handle_error)],
  }));
  let notify_success = b.add(State::Task(TaskState {
    name: "NotifySuccess".to_string(),
    worker: workers::TERMINATE.to_string(),
    input_path: Path::root(),
    result_path: Path::parse("$.notify")?,
    timeout_ms: None,
    next: Some(cleanup),
    catch: vec![Catcher::catch_all(error_path.clone(), handle_error)],
  }));

  // Branch: metadata extraction.
  let extract_data = b.add(task(
    "ExtractData",
    workers::EXTRACT_DATA,
    Path::parse("$.metadata")?,
    None,
  ));

  // Branch: conditional audio extraction. The probe decides whether the
  // source carries an audio track worth extracting.
  let extract_audio = b.add(task(
    "ExtractAudio",
    workers::EXTRACT_AUDIO,
    Path::parse("$.audio")?,
    None,
  ));
  let skip_audio = b.add(State::Pass(PassState {
    name: "SkipAudio".to_string(),
    result: None,
    result_path: Path::root(),
    next: None,
  }));
  let check_audio = b.add(State::Choice(ChoiceState {
    name: "CheckAudio".to_string(),
    rules: vec![ChoiceRule {
      condition: Condition::BoolEquals {
        path: Path::parse("$.extractAudio")?,
        value: true,
      },
      next: extract_audio,
    }],
    default: Some(skip_audio),
  }));

  // Branch: chunked transcode. Preprocess splits the source, ProcessChunks
  // fans the transcode out, PostProcess reduces and labels concurrently,
  // GenerateThumbnail renders from the reduced output.
  let generate_thumbnail = b.add(task(
    "GenerateThumbnail",
    workers::GENERATE_THUMBNAIL,
    Path::parse("$.thumbnail")?,
    None,
  ));

  let extract_labels = b.add(task(
    "ExtractLabels",
    workers::EXTRACT_LABELS,
    Path::parse("$.labels")?,
    None,
  ));
  let with_label_params = b.add(State::Pass(PassState {
    name: "WithLabelParams".to_string(),
    result: Some(json!(LabelParams::default())),
    result_path: Path::parse("$.labelParams")?,
    next: Some(extract_labels),
  }));
  let label_chunks = b.add(State::Map(MapState {
    name: "LabelChunks".to_string(),
    items_path: Path::parse("$.processedChunks")?,
    item_entry: with_label_params,
    max_concurrency: Some(chunk_concurrency),
    result_path: Path::parse("$.chunkLabels")?,
    next: None,
    catch: vec![],
  }));
  let reduce_chunks = b.add(task(
    "ReduceChunks",
    workers::REDUCE_CHUNKS,
    Path::parse("$.result")?,
    None,
  ));
  let post_process = b.add(State::Parallel(ParallelState {
    name: "PostProcess".to_string(),
    branches: vec![reduce_chunks, label_chunks],
    result_path: Path::parse("$.postProcess")?,
    next: Some(generate_thumbnail),
    catch: vec![],
  }));

  let process_chunk = b.add(State::Task(TaskState {
    name: "ProcessChunk".to_string(),
    worker: workers::PROCESS_CHUNK.to_string(),
    input_path: Path::root(),
    result_path: Path::root(),
    timeout_ms: Some(PROCESS_CHUNK_TIMEOUT_MS),
    next: None,
    catch: vec![],
  }));
  let process_chunks = b.add(State::Map(MapState {
    name: "ProcessChunks".to_string(),
    items_path: Path::parse("$.chunks")?,
    item_entry: process_chunk,
    max_concurrency: Some(chunk_concurrency),
    result_path: Path::parse("$.processedChunks")?,
    next: Some(post_process),
    catch: vec![],
  }));
  // Preprocess replaces the branch context with `{jobId, chunks}`; the
  // fan-out and everything after it only need those two fields.
  let preprocess = b.add(State::Task(TaskState {
    name: "Preprocess".to_string(),
    worker: workers::PREPROCESS.to_string(),
    input_path: Path::root(),
    result_path: Path::root(),
    timeout_ms: None,
    next: Some(process_chunks),
    catch: vec![],
  }));

  // Head of the graph. Errors anywhere inside the branches bubble to
  // ExtractParallel and route to HandleError from there.
  let extract_parallel = b.add(State::Parallel(ParallelState {
    name: "ExtractParallel".to_string(),
    branches: vec![extract_data, check_audio, preprocess],
    result_path: Path::parse("$.results")?,
    next: Some(notify_success),
    catch: vec![Catcher::catch_all(error_path.clone(), handle_error)],
  }));
  let probe = b.add(State::Task(TaskState {
    name: "ProbeJob".to_string(),
    worker: workers::JOB_PROBE.to_string(),
    input_path: Path::root(),
    result_path: Path::root(),
    timeout_ms: Some(PROBE_TIMEOUT_MS),
    next: Some(extract_parallel),
    catch: vec![Catcher::catch_all(error_path, handle_error)],
  }));

  Ok(b.build(probe)?)
}
