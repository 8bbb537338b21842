//! Client for the upstream business registry.
//!
//! [`RegistryClient`] is the seam the pipeline depends on.
//! [`HttpRegistryClient`] speaks the registry's REST API;
//! [`ResilientClient`] wraps any client with the shared rate limiter, a
//! per-call timeout and the bounded [`RetryPolicy`].

// Native `async fn` in trait impls; `Send` bounds are spelled out on the trait.
#![allow(async_fn_in_trait)]

use std::future::Future;

use regis_core::{ExternalId, extract::RawRecord};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod resilient;
pub mod retry;

pub use config::RegistryConfig;
pub use error::{FetchError, Result};
pub use http::HttpRegistryClient;
pub use limiter::RateLimiter;
pub use resilient::ResilientClient;
pub use retry::RetryPolicy;

// ─── Types ───────────────────────────────────────────────────────────────────

/// Result of a successful exchange with upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  Found(RawRecord),
  /// Upstream confirmed the identifier does not exist.
  NotFound,
}

/// Upstream search parameters. Unset filters are omitted from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
  pub name:       Option<String>,
  pub legal_form: Option<String>,
  pub locality:   Option<String>,
  pub limit:      usize,
}

/// One upstream search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
  pub external_id: ExternalId,
  pub name:        Option<String>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the upstream registry.
///
/// Implementations perform network I/O only; they never write to storage.
pub trait RegistryClient: Send + Sync {
  fn fetch<'a>(
    &'a self,
    id: &'a ExternalId,
  ) -> impl Future<Output = Result<FetchOutcome>> + Send + 'a;

  fn search<'a>(
    &'a self,
    params: &'a SearchParams,
  ) -> impl Future<Output = Result<Vec<Candidate>>> + Send + 'a;
}

impl<C: RegistryClient> RegistryClient for std::sync::Arc<C> {
  async fn fetch(&self, id: &ExternalId) -> Result<FetchOutcome> {
    (**self).fetch(id).await
  }

  async fn search(&self, params: &SearchParams) -> Result<Vec<Candidate>> {
    (**self).search(params).await
  }
}
