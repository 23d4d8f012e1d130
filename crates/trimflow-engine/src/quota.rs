//! Concurrency quota resolution.
//!
//! The quota is an account-level ceiling bounding simultaneous Map item
//! executions. It is resolved once per deployment, before any job executions
//! begin, and injected into the engine as plain configuration; the graph
//! builder never performs the lookup.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Fallback ceiling used when the quota lookup fails.
pub const DEFAULT_QUOTA: usize = 10;

#[derive(Debug, Error)]
#[error("quota lookup failed: {0}")]
pub struct QuotaError(pub String);

/// One-shot lookup against an external account-limit service.
#[async_trait]
pub trait QuotaResolver: Send + Sync {
  async fn resolve(&self) -> Result<usize, QuotaError>;
}

/// A fixed quota, for configuration and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticQuota(pub usize);

#[async_trait]
impl QuotaResolver for StaticQuota {
  async fn resolve(&self) -> Result<usize, QuotaError> {
    Ok(self.0)
  }
}

/// Resolve the quota, falling back to [`DEFAULT_QUOTA`] on failure.
///
/// A failed lookup must not fail engine construction; it is logged and the
/// conservative default applies. A resolved quota of zero is clamped to one.
pub async fn resolve_quota(resolver: &dyn QuotaResolver) -> usize {
  match resolver.resolve().await {
    Ok(quota) => {
      let quota = quota.max(1);
      info!(quota, "resolved concurrency quota");
      quota
    }
    Err(e) => {
      warn!(error = %e, fallback = DEFAULT_QUOTA, "quota lookup failed, using fallback");
      DEFAULT_QUOTA
    }
  }
}
