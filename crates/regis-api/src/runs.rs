//! Handlers for bulk runs and the normalization sweep.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/runs` | Body: [`BulkRequest`]; 202 with the new run |
//! | `GET`  | `/runs/{run_id}` | Live counters; 404 if unknown |
//! | `POST` | `/normalize` | Runs the sweep to completion |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use regis_client::RegistryClient;
use regis_core::{run::IngestionRun, store::RegistryStore};
use regis_ingest::{BulkRequest, NormalizeReport};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

// ─── Start ────────────────────────────────────────────────────────────────────

/// `POST /runs`. The run proceeds in the background, tracked on the state so
/// shutdown can wait for it; poll `GET /runs/{run_id}` for progress.
pub async fn start<S, C>(
  State(state): State<AppState<S, C>>,
  Json(request): Json<BulkRequest>,
) -> Result<impl IntoResponse, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let run = state.pool.create_run(&request).await?;

  let pool = state.pool.clone();
  let shutdown = state.shutdown.clone();
  let pending = run.clone();
  {
    let mut runs = state.runs.lock();
    // Reap finished runs.
    while runs.try_join_next().is_some() {}
    runs.spawn(async move {
      let run_id = pending.run_id;
      if let Err(e) = pool.execute(pending, request.strategy, shutdown).await {
        tracing::error!(%run_id, error = %e, "bulk run failed");
      }
    });
  }

  Ok((StatusCode::ACCEPTED, Json(run)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /runs/{run_id}`
pub async fn get_one<S, C>(
  State(state): State<AppState<S, C>>,
  Path(run_id): Path<Uuid>,
) -> Result<Json<IngestionRun>, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let run = state
    .store
    .get_run(run_id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;
  Ok(Json(run))
}

// ─── Normalize ────────────────────────────────────────────────────────────────

/// `POST /normalize`
pub async fn normalize<S, C>(
  State(state): State<AppState<S, C>>,
) -> Result<Json<NormalizeReport>, ApiError>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  let report = state.normalizer.normalize_pending(state.normalize_page).await?;
  Ok(Json(report))
}
