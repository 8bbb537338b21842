//! The `RegistryStore` trait.
//!
//! One backend owns three groups of tables: the append-only Staging Store,
//! the Canonical Store, and ingestion run bookkeeping. The pipeline crates
//! depend on this abstraction, not on a concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  canonical::{CanonicalCompany, CompanyProfile, CompanyQuery, CompanySnapshot},
  extract::{NewExtract, StagingExtract},
  ids::ExternalId,
  run::{IngestionRun, NewRun, RunOutcome, RunStatus},
};

/// Abstraction over a registry store backend.
///
/// All methods return `Send` futures so the store can be shared between
/// worker tasks and `axum` handlers.
pub trait RegistryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Staging: append-only writes ───────────────────────────────────────

  /// Persist a new extract. The store assigns `extract_id` and an
  /// `extracted_at` strictly greater than any earlier extract for the same
  /// identifier.
  fn append_extract(
    &self,
    input: NewExtract,
  ) -> impl Future<Output = Result<StagingExtract, Self::Error>> + Send + '_;

  /// Persist every slice of one upstream fetch in a single transaction.
  /// All rows share one `extracted_at`, so the latest extract of each kind
  /// always comes from the same fetch.
  fn append_fetch(
    &self,
    inputs: Vec<NewExtract>,
  ) -> impl Future<Output = Result<Vec<StagingExtract>, Self::Error>> + Send + '_;

  // ── Staging: reads ────────────────────────────────────────────────────

  /// The newest successful extract of each kind for `id`. Kinds that were
  /// never staged successfully are absent.
  fn latest_extracts<'a>(
    &'a self,
    id: &'a ExternalId,
  ) -> impl Future<Output = Result<Vec<StagingExtract>, Self::Error>> + Send + 'a;

  /// All extracts for `id`, newest first. Audit trail.
  fn list_extracts<'a>(
    &'a self,
    id: &'a ExternalId,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<StagingExtract>, Self::Error>> + Send + 'a;

  /// Timestamp of the newest successful extract for `id`, if any.
  fn last_ingested_at<'a>(
    &'a self,
    id: &'a ExternalId,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + 'a;

  /// Identifiers with successful extracts newer than their canonical row's
  /// `last_normalized_at` (or with no canonical row), in ascending order,
  /// strictly after `after`.
  fn pending_normalization<'a>(
    &'a self,
    after: Option<&'a ExternalId>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ExternalId>, Self::Error>> + Send + 'a;

  // ── Canonical: writes ─────────────────────────────────────────────────

  /// Apply one company's normalization result in a single transaction.
  ///
  /// Returns `None` without writing anything when the snapshot carries no
  /// company fields and no canonical row exists yet.
  fn apply_snapshot(
    &self,
    snapshot: CompanySnapshot,
  ) -> impl Future<Output = Result<Option<CanonicalCompany>, Self::Error>> + Send + '_;

  // ── Canonical: reads ──────────────────────────────────────────────────

  fn get_company<'a>(
    &'a self,
    id: &'a ExternalId,
  ) -> impl Future<Output = Result<Option<CanonicalCompany>, Self::Error>> + Send + 'a;

  /// Companies whose name equals `name` ignoring case and surrounding
  /// whitespace.
  fn find_by_name<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Vec<CanonicalCompany>, Self::Error>> + Send + 'a;

  /// Prefilter for free-text search. Uses SQL `LIKE`; ranking is left to
  /// the caller.
  fn search_companies<'a>(
    &'a self,
    query: &'a CompanyQuery,
  ) -> impl Future<Output = Result<Vec<CanonicalCompany>, Self::Error>> + Send + 'a;

  /// Company plus officers, addresses and outgoing links, all read in one
  /// transaction.
  fn load_profile<'a>(
    &'a self,
    id: &'a ExternalId,
  ) -> impl Future<Output = Result<Option<CompanyProfile>, Self::Error>> + Send + 'a;

  // ── Runs ──────────────────────────────────────────────────────────────

  fn create_run(
    &self,
    input: NewRun,
  ) -> impl Future<Output = Result<IngestionRun, Self::Error>> + Send + '_;

  /// Atomically bump `attempted` and the counter for `outcome`.
  fn record_outcome(
    &self,
    run_id: Uuid,
    outcome: RunOutcome,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Stamp `finished_at` and the final status. Returns the finished run.
  fn finish_run(
    &self,
    run_id: Uuid,
    status: RunStatus,
  ) -> impl Future<Output = Result<IngestionRun, Self::Error>> + Send + '_;

  fn get_run(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<Option<IngestionRun>, Self::Error>> + Send + '_;
}
