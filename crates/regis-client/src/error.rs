//! Error type for `regis-client`.
//!
//! "Not found" is deliberately absent: upstream confirming that an
//! identifier does not exist is a [`FetchOutcome`](crate::FetchOutcome).

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
  /// Timeouts, connection failures, 408/425/429 and 5xx. Worth retrying.
  #[error("transient upstream failure: {0}")]
  Transient(String),

  /// Rejected requests (auth, malformed) and undecodable responses.
  #[error("fatal upstream failure: {0}")]
  Fatal(String),

  #[error("invalid client configuration: {0}")]
  Config(String),
}

impl FetchError {
  pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

pub type Result<T, E = FetchError> = std::result::Result<T, E>;
