//! Names of the external workers the pipeline delegates to.
//!
//! Each constant is the logical worker name a [`trimflow_engine::WorkerInvoker`]
//! resolves to an actual endpoint. The engine treats them as opaque strings.

/// Validates the source object and probes video metadata.
pub const JOB_PROBE: &str = "job-probe";

/// Extracts container/stream metadata from the source.
pub const EXTRACT_DATA: &str = "extract-data";

/// Extracts the audio track into its own object.
pub const EXTRACT_AUDIO: &str = "extract-audio";

/// Splits the source into fixed-duration chunks.
pub const PREPROCESS: &str = "preprocess";

/// Transcodes one chunk.
pub const PROCESS_CHUNK: &str = "process-chunk";

/// Runs content-label recognition on one processed chunk.
pub const EXTRACT_LABELS: &str = "extract-labels";

/// Concatenates processed chunks into the final output.
pub const REDUCE_CHUNKS: &str = "reduce-chunks";

/// Renders a thumbnail from the final output.
pub const GENERATE_THUMBNAIL: &str = "generate-thumbnail";

/// Records a failure against the job before the notify/cleanup tail runs.
pub const HANDLE_ERROR: &str = "handle-error";

/// Updates the job status and notifies subscribed clients.
pub const TERMINATE: &str = "terminate";

/// Deletes intermediate artifacts. Must be idempotent: the pipeline may
/// reach it from the success tail and again from the failure tail of a
/// retried job, and a double invocation must leave the same end state.
pub const CLEANUP: &str = "cleanup";
