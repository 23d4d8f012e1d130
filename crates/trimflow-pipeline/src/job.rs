//! Wire types shared with the worker fleet.
//!
//! The engine itself never deserializes these; workers read and write them,
//! and the pipeline carries them through the context. They are defined here
//! so the fleet and any front-end agree on one shape.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job, persisted by the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
  Created,
  Running,
  Completed,
  Failed,
}

/// One submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
  pub job_id: String,
  pub status: JobStatus,
  /// Object key of the uploaded source video.
  pub key: String,
  pub extension: String,
  pub size: u64,
}

/// One video chunk produced by the preprocess worker and consumed by the
/// chunk-processing fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
  pub key: String,
  pub job_id: String,
  pub extension: String,
  pub size: u64,
}

/// Parameters for content-label recognition, handed to the labels worker
/// with each chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelParams {
  pub max_labels: u32,
  pub min_confidence: f64,
  /// Label categories to restrict detection to; empty means all categories.
  #[serde(default)]
  pub categories: Vec<String>,
}

impl Default for LabelParams {
  fn default() -> Self {
    Self {
      max_labels: 10,
      min_confidence: 80.0,
      categories: vec![],
    }
  }
}
