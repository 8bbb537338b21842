//! Error types for `regis-core`.

use thiserror::Error;

use crate::extract::ExtractKind;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid external identifier: {0:?}")]
  InvalidExternalId(String),

  /// A staged payload lacks a field the canonical model requires.
  #[error("{kind} payload is missing required field `{field}`")]
  MissingField {
    kind:  ExtractKind,
    field: &'static str,
  },

  /// A staged payload has the wrong shape for its kind.
  #[error("{kind} payload is malformed: {reason}")]
  Malformed {
    kind:   ExtractKind,
    reason: String,
  },

  #[error("unknown extract kind discriminant: {0:?}")]
  UnknownExtractKind(String),

  #[error("unknown discriminant {value:?} for {field}")]
  UnknownDiscriminant {
    field: &'static str,
    value: String,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether this error describes bad staged data rather than a programming
  /// or storage fault.
  pub fn is_data_quality(&self) -> bool {
    matches!(self, Self::MissingField { .. } | Self::Malformed { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
