//! Handlers for `/companies` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/companies/{external_id}` | Fetches upstream on a miss; 404, 503 |
//! | `GET`  | `/companies?name=` | Exact, case-insensitive name |
//! | `GET`  | `/companies/{external_id}/extracts` | Staging audit trail, newest first |

use axum::{
  Json,
  extract::{Path, Query, State},
  response::{IntoResponse, Response},
};
use regis_client::RegistryClient;
use regis_core::{ExternalId, extract::StagingExtract, store::RegistryStore};
use regis_ingest::{Query as Lookup, Resolution};
use serde::Deserialize;

use crate::{AppState, error::ApiError};

fn parse_id(raw: &str) -> Result<ExternalId, ApiError> {
  ExternalId::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Shared by every lookup route.
pub(crate) fn respond(resolution: Resolution, what: &str) -> Result<Response, ApiError> {
  match resolution {
    Resolution::Company(profile) => Ok(Json(profile).into_response()),
    Resolution::Companies(list) => Ok(Json(list).into_response()),
    Resolution::NotFound => Err(ApiError::NotFound(format!("{what} not found"))),
  }
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /companies/{external_id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  Path(raw): Path<String>,
) -> Result<Response, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let id = parse_id(&raw)?;
  let what = format!("company {id}");
  let resolution = state.gateway.resolve(Lookup::Identifier(id)).await?;
  respond(resolution, &what)
}

// ─── By name ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NameParams {
  pub name: String,
}

/// `GET /companies?name=<exact name>`
pub async fn by_name<S, C>(
  State(state): State<AppState<S, C>>,
  Query(params): Query<NameParams>,
) -> Result<Response, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let what = format!("company named {:?}", params.name);
  let resolution = state.gateway.resolve(Lookup::ExactName(params.name)).await?;
  respond(resolution, &what)
}

// ─── Extracts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExtractParams {
  pub limit: Option<usize>,
}

/// `GET /companies/{external_id}/extracts[?limit=N]`
pub async fn extracts<S, C>(
  State(state): State<AppState<S, C>>,
  Path(raw): Path<String>,
  Query(params): Query<ExtractParams>,
) -> Result<Json<Vec<StagingExtract>>, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let id = parse_id(&raw)?;
  let extracts = state
    .store
    .list_extracts(&id, params.limit)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  Ok(Json(extracts))
}
