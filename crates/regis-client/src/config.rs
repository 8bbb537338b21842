//! Upstream connection and politeness settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
  pub base_url:        String,
  /// Sent as a bearer token when present.
  pub api_key:         Option<String>,
  /// Per-call timeout, applied to every attempt.
  pub timeout_secs:    u64,
  /// Upstream ceiling shared by every caller in the process.
  pub rate_per_sec:    f64,
  pub burst:           u32,
  pub max_attempts:    u32,
  pub base_backoff_ms: u64,
  pub max_backoff_ms:  u64,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      base_url:        "http://localhost:8080".into(),
      api_key:         None,
      timeout_secs:    30,
      rate_per_sec:    1.0,
      burst:           1,
      max_attempts:    3,
      base_backoff_ms: 500,
      max_backoff_ms:  8000,
    }
  }
}

impl RegistryConfig {
  pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}
