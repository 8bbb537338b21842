//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use regis_ingest::{GatewayError, IngestError, NormalizeError};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// Upstream is unreachable and nothing usable is cached. Retry later.
  #[error("temporarily unavailable: {0}")]
  Unavailable(String),

  #[error("upstream error: {0}")]
  Upstream(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
      ApiError::Store(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

impl From<GatewayError> for ApiError {
  fn from(e: GatewayError) -> Self {
    match e {
      GatewayError::Unavailable(m) => Self::Unavailable(m),
      GatewayError::Fatal(m) => Self::Upstream(m),
      store @ GatewayError::Store(_) => Self::Store(Box::new(store)),
    }
  }
}

impl From<NormalizeError> for ApiError {
  fn from(e: NormalizeError) -> Self { Self::Store(Box::new(e)) }
}

impl From<IngestError> for ApiError {
  fn from(e: IngestError) -> Self {
    match e {
      IngestError::InvalidRequest(m) => Self::BadRequest(m),
      other => Self::Store(Box::new(other)),
    }
  }
}
