//! Error types for `regis-ingest`.

use std::sync::Arc;

use regis_core::ExternalId;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a bulk run as a whole. Per-identifier failures never surface
/// here; they are counted on the run.
#[derive(Debug, Error)]
pub enum IngestError {
  /// The bulk request cannot be run as given.
  #[error("invalid bulk request: {0}")]
  InvalidRequest(String),

  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum NormalizeError {
  #[error("nothing staged for {0}")]
  NothingStaged(ExternalId),

  /// The company extract is missing or invalid and no canonical row exists
  /// to attach the other kinds to.
  #[error("no usable company data staged for {0}")]
  NoCompanyData(ExternalId),

  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

impl NormalizeError {
  /// Whether this describes the staged data rather than a storage fault.
  pub fn is_skip(&self) -> bool {
    matches!(self, Self::NothingStaged(_) | Self::NoCompanyData(_))
  }
}

/// Shared by every caller waiting on the same on-demand fetch, hence
/// `Clone`.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
  /// Upstream could not be reached in time and nothing is cached locally.
  /// Callers may retry later.
  #[error("temporarily unavailable: {0}")]
  Unavailable(String),

  #[error("upstream rejected the request: {0}")]
  Fatal(String),

  #[error("store error: {0}")]
  Store(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl GatewayError {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Arc::new(e))
  }
}

impl From<NormalizeError> for GatewayError {
  fn from(e: NormalizeError) -> Self {
    match e {
      NormalizeError::Store(inner) => Self::Store(Arc::from(inner)),
      skip => Self::Fatal(skip.to_string()),
    }
  }
}
