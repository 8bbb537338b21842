//! [`ResilientClient`]: rate limiting, per-call timeout and retry around any
//! [`RegistryClient`].

use std::{future::Future, sync::Arc, time::Duration};

use regis_core::ExternalId;

use crate::{
  Candidate, FetchOutcome, RegistryClient, SearchParams,
  config::RegistryConfig,
  error::{FetchError, Result},
  http::HttpRegistryClient,
  limiter::RateLimiter,
  retry::RetryPolicy,
};

/// Every attempt, retries included, first takes a token from the shared
/// limiter and then runs under `call_timeout`.
pub struct ResilientClient<C> {
  inner:        C,
  limiter:      Arc<RateLimiter>,
  retry:        RetryPolicy,
  call_timeout: Duration,
}

impl<C: RegistryClient> ResilientClient<C> {
  pub fn new(
    inner: C,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    call_timeout: Duration,
  ) -> Self {
    Self { inner, limiter, retry, call_timeout }
  }

  /// The shared limiter, for callers that adjust the rate of a run.
  pub fn limiter(&self) -> &Arc<RateLimiter> { &self.limiter }

  async fn attempt<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
    self.limiter.acquire().await;
    match tokio::time::timeout(self.call_timeout, call).await {
      Ok(result) => result,
      Err(_) => Err(FetchError::Transient(format!(
        "no response within {}s",
        self.call_timeout.as_secs_f64()
      ))),
    }
  }
}

impl ResilientClient<HttpRegistryClient> {
  /// The production stack: HTTP client, a fresh limiter at the configured
  /// ceiling, and the configured retry policy.
  pub fn from_config(config: &RegistryConfig) -> Result<Self> {
    Ok(Self::new(
      HttpRegistryClient::new(config)?,
      Arc::new(RateLimiter::new(config.rate_per_sec, config.burst)),
      RetryPolicy::from_config(config),
      config.timeout(),
    ))
  }
}

impl<C: RegistryClient> RegistryClient for ResilientClient<C> {
  async fn fetch(&self, id: &ExternalId) -> Result<FetchOutcome> {
    let outcome = self
      .retry
      .run(move || self.attempt(self.inner.fetch(id)))
      .await;
    if let Err(e) = &outcome {
      tracing::error!(external_id = %id, error = %e, "fetch failed");
    }
    outcome
  }

  async fn search(&self, params: &SearchParams) -> Result<Vec<Candidate>> {
    self
      .retry
      .run(move || self.attempt(self.inner.search(params)))
      .await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use regis_core::extract::RawRecord;
  use serde_json::json;
  use tokio::time::Instant;

  use super::*;

  /// Hangs for `hang` on the first `slow_calls` calls, then answers.
  struct Sluggish {
    calls:      AtomicU32,
    slow_calls: u32,
    hang:       Duration,
  }

  impl RegistryClient for Sluggish {
    async fn fetch(&self, id: &ExternalId) -> Result<FetchOutcome> {
      if self.calls.fetch_add(1, Ordering::SeqCst) < self.slow_calls {
        tokio::time::sleep(self.hang).await;
      }
      Ok(FetchOutcome::Found(RawRecord {
        external_id: id.clone(),
        body:        json!({ "name": "Late GmbH" }),
      }))
    }

    async fn search(&self, _: &SearchParams) -> Result<Vec<Candidate>> { Ok(vec![]) }
  }

  fn client(slow_calls: u32, max_attempts: u32) -> ResilientClient<Sluggish> {
    ResilientClient::new(
      Sluggish { calls: AtomicU32::new(0), slow_calls, hang: Duration::from_secs(60) },
      Arc::new(RateLimiter::new(1.0, 1)),
      RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
      },
      Duration::from_secs(2),
    )
  }

  fn id() -> ExternalId { ExternalId::parse("77").unwrap() }

  #[tokio::test(start_paused = true)]
  async fn timeout_is_transient_and_retried() {
    let c = client(1, 3);
    let outcome = c.fetch(&id()).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Found(_)));
    assert_eq!(c.inner.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn exhausted_timeouts_surface_as_transient() {
    let c = client(5, 2);
    let err = c.fetch(&id()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(c.inner.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn every_attempt_waits_for_the_limiter() {
    let c = client(0, 1);
    let start = Instant::now();
    for _ in 0..3 {
      c.fetch(&id()).await.unwrap();
    }
    // One token up front, then one per second.
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
  }
}
