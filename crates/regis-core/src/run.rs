//! Bulk ingestion bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, ids::ExternalId};

// ─── Discovery strategy ──────────────────────────────────────────────────────

/// How a bulk run finds candidate identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryStrategy {
  /// Search upstream once per configured locality code.
  Localities,
  /// Search upstream once per configured legal-form code, crossed with the
  /// configured localities.
  LegalForms,
  /// Probe every `step`-th register number in `start..=end`.
  IdRange { start: u32, end: u32, step: u32 },
  /// A fixed list of identifiers.
  Explicit { ids: Vec<ExternalId> },
  /// Several strategies chained; duplicates across them are yielded once.
  Chain { strategies: Vec<DiscoveryStrategy> },
}

impl DiscoveryStrategy {
  /// Short label recorded on the run row.
  pub fn label(&self) -> String {
    match self {
      Self::Localities => "localities".into(),
      Self::LegalForms => "legal_forms".into(),
      Self::IdRange { start, end, step } => format!("range:{start}-{end}/{step}"),
      Self::Explicit { ids } => format!("explicit:{}", ids.len()),
      Self::Chain { strategies } => strategies
        .iter()
        .map(Self::label)
        .collect::<Vec<_>>()
        .join("+"),
    }
  }
}

// ─── IngestionRun ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Completed,
  /// Stopped by an operator before the candidate stream ran out.
  Cancelled,
}

impl RunStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Running => "running",
      Self::Completed => "completed",
      Self::Cancelled => "cancelled",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "running" => Ok(Self::Running),
      "completed" => Ok(Self::Completed),
      "cancelled" => Ok(Self::Cancelled),
      other => Err(Error::UnknownDiscriminant {
        field: "run status",
        value: other.to_owned(),
      }),
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One bulk discovery+fetch batch. Counters only grow while the run is
/// `Running`; the row is read-only once finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
  pub run_id:          Uuid,
  pub started_at:      DateTime<Utc>,
  pub finished_at:     Option<DateTime<Utc>>,
  pub strategy:        String,
  pub max_identifiers: u64,
  pub concurrency:     u32,
  pub rate_per_sec:    f64,
  pub attempted:       u64,
  pub succeeded:       u64,
  pub failed:          u64,
  pub skipped:         u64,
  pub status:          RunStatus,
}

/// Input to [`crate::store::RegistryStore::create_run`].
#[derive(Debug, Clone)]
pub struct NewRun {
  pub strategy:        String,
  pub max_identifiers: u64,
  pub concurrency:     u32,
  pub rate_per_sec:    f64,
}

/// What happened to one candidate identifier. Every outcome also counts as
/// an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  Succeeded,
  Failed,
  Skipped,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strategy_labels() {
    let chain = DiscoveryStrategy::Chain {
      strategies: vec![
        DiscoveryStrategy::Localities,
        DiscoveryStrategy::IdRange { start: 1, end: 500, step: 10 },
      ],
    };
    assert_eq!(chain.label(), "localities+range:1-500/10");
  }

  #[test]
  fn strategy_deserializes_from_tagged_json() {
    let parsed: DiscoveryStrategy =
      serde_json::from_str(r#"{"kind":"explicit","ids":["FN 1 a","22"]}"#).unwrap();
    let DiscoveryStrategy::Explicit { ids } = parsed else { panic!("wrong variant") };
    assert_eq!(ids[0].as_str(), "1A");
  }
}
