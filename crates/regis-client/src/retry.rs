//! Bounded retry with exponential backoff and jitter.

use std::{future::Future, time::Duration};

use tokio_retry::{
  RetryIf,
  strategy::{ExponentialBackoff, jitter},
};

use crate::{config::RegistryConfig, error::FetchError};

/// Retry schedule for transient upstream failures. Fatal errors are never
/// retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  /// Delay before the first retry; doubles for each one after.
  pub base_delay:   Duration,
  pub max_delay:    Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self::from_config(&RegistryConfig::default()) }
}

impl RetryPolicy {
  pub fn from_config(config: &RegistryConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      base_delay:   Duration::from_millis(config.base_backoff_ms),
      max_delay:    Duration::from_millis(config.max_backoff_ms),
    }
  }

  /// Delays between attempts: `base, 2·base, 4·base, …` capped at
  /// `max_delay`, each scaled by a random jitter factor.
  pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
    // `from_millis(2)` yields 2, 4, 8, …; the factor rescales that to base.
    let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
    ExponentialBackoff::from_millis(2)
      .factor(factor)
      .max_delay(self.max_delay)
      .map(jitter)
      .take(self.max_attempts.saturating_sub(1) as usize)
  }

  /// Run `op` until it succeeds, fails fatally, or attempts run out.
  pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, FetchError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    RetryIf::spawn(self.delays(), op, |e: &FetchError| {
      let retry = e.is_transient();
      if retry {
        tracing::warn!(error = %e, "transient upstream failure");
      }
      retry
    })
    .await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
      max_attempts,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_millis(8000),
    }
  }

  #[test]
  fn delays_are_bounded_and_capped() {
    let delays: Vec<_> = policy(6).delays().collect();
    assert_eq!(delays.len(), 5);
    let caps = [500, 1000, 2000, 4000, 8000];
    for (delay, cap) in delays.iter().zip(caps) {
      assert!(*delay <= Duration::from_millis(cap), "{delay:?} > {cap}ms");
    }
  }

  #[tokio::test(start_paused = true)]
  async fn retries_transient_until_success() {
    let calls = &AtomicU32::new(0);
    let result = policy(3)
      .run(|| async move {
        match calls.fetch_add(1, Ordering::SeqCst) {
          0 | 1 => Err(FetchError::Transient("503".into())),
          _ => Ok("record"),
        }
      })
      .await;
    assert_eq!(result.unwrap(), "record");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn gives_up_after_max_attempts() {
    let calls = &AtomicU32::new(0);
    let result: Result<(), _> = policy(3)
      .run(|| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Transient("timeout".into()))
      })
      .await;
    assert!(result.unwrap_err().is_transient());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn fatal_is_not_retried() {
    let calls = &AtomicU32::new(0);
    let result: Result<(), _> = policy(3)
      .run(|| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Fatal("401".into()))
      })
      .await;
    assert!(matches!(result, Err(FetchError::Fatal(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
