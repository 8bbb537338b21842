//! Settings for bulk ingestion and the fetch-on-miss gateway.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Locality codes searched by the `localities` strategy: Wien, Graz, Linz,
/// Salzburg, Innsbruck, Klagenfurt, Bregenz, Wels, St. Pölten.
pub const DEFAULT_LOCALITIES: &[&str] = &[
  "90001", "60101", "40101", "50101", "70101", "20101", "80227", "40301", "31701",
];

/// Legal-form codes searched by the `legal_forms` strategy.
pub const DEFAULT_LEGAL_FORMS: &[&str] = &["GES", "AG", "KEG"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  pub concurrency:     usize,
  pub max_identifiers: u64,
  /// Identifiers ingested successfully within this window are skipped.
  pub freshness_hours: u64,
  /// Log progress every this many finished identifiers.
  pub progress_every:  u64,
  /// Hits requested per discovery search.
  pub search_limit:    usize,
  /// Batch size of the normalization sweep.
  pub normalize_page:  usize,
  pub localities:      Vec<String>,
  pub legal_forms:     Vec<String>,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      concurrency:     4,
      max_identifiers: 1000,
      freshness_hours: 24,
      progress_every:  10,
      search_limit:    100,
      normalize_page:  200,
      localities:      DEFAULT_LOCALITIES.iter().map(|s| s.to_string()).collect(),
      legal_forms:     DEFAULT_LEGAL_FORMS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl IngestConfig {
  pub fn freshness(&self) -> chrono::Duration {
    chrono::Duration::hours(self.freshness_hours as i64)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  /// Canonical rows fetched longer ago than this are refreshed on lookup.
  pub staleness_hours:      u64,
  /// How long an upstream "not found" is remembered.
  pub negative_ttl_secs:    u64,
  /// Upper bound on how long a caller waits for an on-demand fetch.
  pub resolve_timeout_secs: u64,
  /// Default result count for free-text search.
  pub search_limit:         usize,
  /// Upstream hits considered for an exact-name miss.
  pub name_candidates:      usize,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      staleness_hours:      168,
      negative_ttl_secs:    300,
      resolve_timeout_secs: 20,
      search_limit:         20,
      name_candidates:      5,
    }
  }
}

impl GatewayConfig {
  pub fn staleness(&self) -> chrono::Duration {
    chrono::Duration::hours(self.staleness_hours as i64)
  }

  pub fn negative_ttl(&self) -> Duration { Duration::from_secs(self.negative_ttl_secs) }

  pub fn resolve_timeout(&self) -> Duration {
    Duration::from_secs(self.resolve_timeout_secs)
  }
}
