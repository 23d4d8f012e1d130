//! Trigger-event parsing.
//!
//! An execution starts when the source video lands in object storage. The
//! storage notification arrives as a key plus size; only the original upload
//! (`<jobId>/original.<ext>`) starts a pipeline run - chunk and artifact
//! writes under the same prefix must not re-trigger it.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// File stem that marks the original upload of a job.
pub const ORIGINAL_MARKER: &str = "original";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
  /// The object is not the original upload; no execution starts.
  #[error("key '{key}' is not an original upload")]
  NotOriginal { key: String },

  /// The key does not follow the `<jobId>/<name>.<ext>` layout.
  #[error("malformed object key '{key}'")]
  MalformedKey { key: String },
}

/// An object-creation notification from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
  pub key: String,
  pub size: u64,
}

impl TriggerEvent {
  /// Build the initial execution context for this event.
  ///
  /// Returns [`TriggerError::NotOriginal`] for keys that must be ignored
  /// (chunks, processed artifacts, thumbnails written back under the job
  /// prefix).
  pub fn initial_context(&self) -> Result<Value, TriggerError> {
    let (job_id, file) =
      self
        .key
        .split_once('/')
        .ok_or_else(|| TriggerError::MalformedKey {
          key: self.key.clone(),
        })?;
    let (stem, extension) = file.rsplit_once('.').ok_or_else(|| TriggerError::MalformedKey {
      key: self.key.clone(),
    })?;
    if job_id.is_empty() || extension.is_empty() {
      return Err(TriggerError::MalformedKey {
        key: self.key.clone(),
      });
    }
    if stem != ORIGINAL_MARKER {
      return Err(TriggerError::NotOriginal {
        key: self.key.clone(),
      });
    }

    Ok(json!({
      "jobId": job_id,
      "key": self.key,
      "extension": extension,
      "size": self.size,
    }))
  }
}
