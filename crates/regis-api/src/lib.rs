//! JSON REST control surface for the registry pipeline.
//!
//! Exposes an axum [`Router`] over any [`RegistryStore`] and
//! [`RegistryClient`]: company lookups through the fetch-on-miss gateway,
//! local search, the staging audit trail, bulk runs and the normalization
//! sweep. Auth and TLS are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", regis_api::api_router(state))
//! ```

pub mod companies;
pub mod error;
pub mod runs;
pub mod search;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use regis_client::{RateLimiter, RegistryClient};
use regis_core::store::RegistryStore;
use parking_lot::Mutex;
use regis_ingest::{Gateway, GatewayConfig, IngestConfig, IngestionPool, Normalizer};
use tokio::{sync::watch, task::JoinSet};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S, C> {
  pub store:          Arc<S>,
  pub gateway:        Gateway<S, C>,
  pub normalizer:     Normalizer<S>,
  pub pool:           IngestionPool<S, C>,
  /// Handed to every background run; flipping it cancels them all.
  pub shutdown:       watch::Receiver<bool>,
  /// Background runs started through `POST /runs`.
  pub runs:           Arc<Mutex<JoinSet<()>>>,
  pub normalize_page: usize,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:          self.store.clone(),
      gateway:        self.gateway.clone(),
      normalizer:     self.normalizer.clone(),
      pool:           self.pool.clone(),
      shutdown:       self.shutdown.clone(),
      runs:           self.runs.clone(),
      normalize_page: self.normalize_page,
    }
  }
}

impl<S, C> AppState<S, C>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  /// Wire the pipeline components around one store and one client.
  /// `limiter` must be the limiter `client` draws from.
  pub fn new(
    store: Arc<S>,
    client: Arc<C>,
    limiter: Arc<RateLimiter>,
    ingest: IngestConfig,
    gateway: GatewayConfig,
    shutdown: watch::Receiver<bool>,
  ) -> Self {
    Self {
      gateway: Gateway::new(store.clone(), client.clone(), gateway),
      normalizer: Normalizer::new(store.clone()),
      normalize_page: ingest.normalize_page,
      pool: IngestionPool::new(store.clone(), client, limiter, ingest),
      store,
      shutdown,
      runs: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  /// Wait for every background run to finalize. Call after flipping the
  /// shutdown flag so cancelled runs record their partial counts.
  pub async fn drain_runs(&self) {
    let mut runs = std::mem::take(&mut *self.runs.lock());
    if !runs.is_empty() {
      tracing::info!(runs = runs.len(), "waiting for bulk runs to finish");
    }
    while let Some(joined) = runs.join_next().await {
      if let Err(e) = joined {
        tracing::error!(error = %e, "bulk run task aborted");
      }
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the API router. The returned `Router<()>` can be nested into any
/// parent router regardless of its own state type.
pub fn api_router<S, C>(state: AppState<S, C>) -> Router<()>
where
  S: RegistryStore + 'static,
  C: RegistryClient + 'static,
{
  Router::new()
    // Companies
    .route("/companies", get(companies::by_name::<S, C>))
    .route("/companies/{external_id}", get(companies::get_one::<S, C>))
    .route("/companies/{external_id}/extracts", get(companies::extracts::<S, C>))
    // Search
    .route("/search", get(search::handler::<S, C>))
    // Ingestion
    .route("/runs", post(runs::start::<S, C>))
    .route("/runs/{run_id}", get(runs::get_one::<S, C>))
    .route("/normalize", post(runs::normalize::<S, C>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────
