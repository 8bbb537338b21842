//! Handler for `GET /search`.
//!
//! Ranks canonical companies by name. Never calls upstream.

use axum::{
  extract::{Query, State},
  response::Response,
};
use regis_client::RegistryClient;
use regis_core::store::RegistryStore;
use regis_ingest::Query as Lookup;
use serde::Deserialize;

use crate::{AppState, companies::respond, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
  pub q:     String,
  pub limit: Option<usize>,
}

/// `GET /search?q=<text>[&limit=N]`
pub async fn handler<S, C>(
  State(state): State<AppState<S, C>>,
  Query(params): Query<SearchParams>,
) -> Result<Response, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let resolution = state
    .gateway
    .resolve(Lookup::Text { q: params.q, limit: params.limit })
    .await?;
  respond(resolution, "company")
}
