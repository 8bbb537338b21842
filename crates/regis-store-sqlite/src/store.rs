//! [`SqliteStore`], the SQLite implementation of [`RegistryStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use regis_core::{
  ExternalId,
  canonical::{CanonicalCompany, CompanyProfile, CompanyQuery, CompanySnapshot},
  clean::match_key,
  extract::{
    ExtractBody, ExtractKind, IngestStatus, NewExtract, SourceTag, StagingExtract, payload_digest,
  },
  run::{IngestionRun, NewRun, RunOutcome, RunStatus},
  store::RegistryStore,
};

use crate::{
  Error, Result,
  encode::{
    ADDRESS_COLUMNS, COMPANY_COLUMNS, EXTRACT_COLUMNS, LINK_COLUMNS, OFFICER_COLUMNS,
    RUN_COLUMNS, RawAddress, RawCompany, RawExtract, RawLink, RawOfficer, RawRun,
    decode_dt, encode_date, encode_dt, encode_source, encode_status, encode_uuid,
    next_extracted_at, now_micros,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A registry store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests and one-off runs.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_companies(
    &self,
    sql: String,
    params: Vec<String>,
  ) -> Result<Vec<CanonicalCompany>> {
    let raws: Vec<RawCompany> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawCompany::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCompany::into_company).collect()
  }
}

/// Escape `LIKE` wildcards so a search token matches literally.
fn like_pattern(token: &str) -> String {
  let escaped = token
    .replace('\\', "\\\\")
    .replace('%', "\\%")
    .replace('_', "\\_");
  format!("%{escaped}%")
}

fn outcome_column(outcome: RunOutcome) -> &'static str {
  match outcome {
    RunOutcome::Succeeded => "succeeded",
    RunOutcome::Failed => "failed",
    RunOutcome::Skipped => "skipped",
  }
}

// ─── RegistryStore impl ──────────────────────────────────────────────────────

impl RegistryStore for SqliteStore {
  type Error = Error;

  // ── Staging: append-only writes ───────────────────────────────────────────

  async fn append_extract(&self, input: NewExtract) -> Result<StagingExtract> {
    let mut staged = self.append_fetch(vec![input]).await?;
    staged.pop().ok_or(Error::EmptyFetch)
  }

  async fn append_fetch(&self, inputs: Vec<NewExtract>) -> Result<Vec<StagingExtract>> {
    if inputs.is_empty() {
      return Ok(vec![]);
    }

    struct Row {
      external_id:  ExternalId,
      kind:         ExtractKind,
      source:       SourceTag,
      extract_id:   Uuid,
      payload:      Option<serde_json::Value>,
      payload_text: Option<String>,
      digest:       Option<String>,
      status:       IngestStatus,
      error_detail: Option<String>,
    }

    let mut rows = Vec::with_capacity(inputs.len());
    for NewExtract { external_id, kind, source, body } in inputs {
      let (payload, digest, status, error_detail) = match body {
        ExtractBody::Payload(value) => {
          let digest = payload_digest(&value);
          (Some(value), Some(digest), IngestStatus::Ok, None)
        }
        ExtractBody::Failed(detail) => (None, None, IngestStatus::Error, Some(detail)),
      };
      let payload_text = payload.as_ref().map(serde_json::to_string).transpose()?;
      rows.push(Row {
        external_id,
        kind,
        source,
        extract_id: Uuid::new_v4(),
        payload,
        payload_text,
        digest,
        status,
        error_detail,
      });
    }

    let params: Vec<[Option<String>; 8]> = rows
      .iter()
      .map(|row| {
        [
          Some(encode_uuid(row.extract_id)),
          Some(row.external_id.as_str().to_owned()),
          Some(row.kind.as_str().to_owned()),
          Some(encode_source(row.source).to_owned()),
          row.payload_text.clone(),
          row.digest.clone(),
          Some(encode_status(row.status).to_owned()),
          row.error_detail.clone(),
        ]
      })
      .collect();

    // Every slice of one fetch shares a single timestamp, later than anything
    // already staged for the identifiers involved.
    let extracted_at: DateTime<Utc> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut at = now_micros();
        for [_, external, ..] in &params {
          let previous: Option<String> = tx.query_row(
            "SELECT MAX(extracted_at) FROM staging_extracts WHERE external_id = ?1",
            rusqlite::params![external],
            |r| r.get(0),
          )?;
          at = next_extracted_at(previous.as_deref(), at)
            .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
        }

        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO staging_extracts (
               extract_id, external_id, extract_kind, extracted_at, source_tag,
               payload, payload_digest, status, error_detail
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          )?;
          for [id, external, kind, source, payload, digest, status, detail] in &params {
            stmt.execute(rusqlite::params![
              id,
              external,
              kind,
              encode_dt(at),
              source,
              payload,
              digest,
              status,
              detail,
            ])?;
          }
        }
        tx.commit()?;
        Ok(at)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|row| StagingExtract {
          extract_id: row.extract_id,
          external_id: row.external_id,
          kind: row.kind,
          extracted_at,
          source: row.source,
          payload: row.payload,
          payload_digest: row.digest,
          status: row.status,
          error_detail: row.error_detail,
        })
        .collect(),
    )
  }

  // ── Staging: reads ────────────────────────────────────────────────────────

  async fn latest_extracts(&self, id: &ExternalId) -> Result<Vec<StagingExtract>> {
    let external = id.as_str().to_owned();

    let raws: Vec<RawExtract> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EXTRACT_COLUMNS}
           FROM staging_extracts s
           WHERE s.external_id = ?1
             AND s.status = 'ok'
             AND s.extracted_at = (
               SELECT MAX(extracted_at) FROM staging_extracts
               WHERE external_id  = s.external_id
                 AND extract_kind = s.extract_kind
                 AND status       = 'ok'
             )
           ORDER BY s.extract_kind"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![external], RawExtract::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawExtract::into_extract).collect()
  }

  async fn list_extracts(
    &self,
    id: &ExternalId,
    limit: Option<usize>,
  ) -> Result<Vec<StagingExtract>> {
    let external  = id.as_str().to_owned();
    let limit_val = limit.map_or(-1, |l| l as i64);

    let raws: Vec<RawExtract> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EXTRACT_COLUMNS} FROM staging_extracts
           WHERE external_id = ?1
           ORDER BY extracted_at DESC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![external, limit_val], RawExtract::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawExtract::into_extract).collect()
  }

  async fn last_ingested_at(&self, id: &ExternalId) -> Result<Option<DateTime<Utc>>> {
    let external = id.as_str().to_owned();

    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT MAX(extracted_at) FROM staging_extracts
           WHERE external_id = ?1 AND status = 'ok'",
          rusqlite::params![external],
          |r| r.get(0),
        )?)
      })
      .await?;

    raw.as_deref().map(decode_dt).transpose()
  }

  async fn pending_normalization(
    &self,
    after: Option<&ExternalId>,
    limit: usize,
  ) -> Result<Vec<ExternalId>> {
    let after_str = after.map(|id| id.as_str().to_owned());
    let limit_val = limit as i64;

    let raws: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT s.external_id
           FROM staging_extracts s
           LEFT JOIN companies c ON c.external_id = s.external_id
           WHERE s.status = 'ok'
             AND (?1 IS NULL OR s.external_id > ?1)
           GROUP BY s.external_id
           HAVING MAX(s.extracted_at) > COALESCE(MAX(c.last_normalized_at), '')
           ORDER BY s.external_id
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![after_str, limit_val], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .iter()
      .map(|s| ExternalId::parse(s).map_err(Error::Core))
      .collect()
  }

  // ── Canonical: writes ─────────────────────────────────────────────────────

  async fn apply_snapshot(
    &self,
    snapshot: CompanySnapshot,
  ) -> Result<Option<CanonicalCompany>> {
    let raw: Option<RawCompany> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = snapshot.canonical_key.as_str();
        let normalized_at = encode_dt(snapshot.normalized_at);

        let exists = tx
          .query_row(
            "SELECT 1 FROM companies WHERE canonical_key = ?1",
            rusqlite::params![key],
            |_| Ok(()),
          )
          .optional()?
          .is_some();

        match &snapshot.company {
          Some(fields) => {
            tx.execute(
              "INSERT INTO companies (
                 canonical_key, external_id, name, name_key, legal_form, status,
                 city, country, created_at, updated_at, last_fetched_at,
                 last_normalized_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?9)
               ON CONFLICT (canonical_key) DO UPDATE SET
                 name               = excluded.name,
                 name_key           = excluded.name_key,
                 legal_form         = excluded.legal_form,
                 status             = excluded.status,
                 city               = excluded.city,
                 country            = excluded.country,
                 updated_at         = excluded.updated_at,
                 last_fetched_at    = COALESCE(excluded.last_fetched_at,
                                               companies.last_fetched_at),
                 last_normalized_at = excluded.last_normalized_at",
              rusqlite::params![
                key,
                snapshot.external_id.as_str(),
                fields.name,
                match_key(&fields.name),
                fields.legal_form,
                fields.status,
                fields.city,
                fields.country,
                normalized_at,
                snapshot.fetched_at.map(encode_dt),
              ],
            )?;
          }
          None if exists => {
            tx.execute(
              "UPDATE companies SET updated_at = ?2, last_normalized_at = ?2
               WHERE canonical_key = ?1",
              rusqlite::params![key, normalized_at],
            )?;
          }
          // Nothing to anchor the other kinds to; the transaction rolls back.
          None => return Ok(None),
        }

        if let Some(officers) = &snapshot.officers {
          tx.execute(
            "DELETE FROM officers WHERE canonical_key = ?1",
            rusqlite::params![key],
          )?;
          let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO officers ({OFFICER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
          ))?;
          for (position, o) in officers.iter().enumerate() {
            stmt.execute(rusqlite::params![
              key,
              position as u32,
              o.title,
              o.first_name,
              o.last_name,
              o.full_name,
              o.role,
              o.birth_date.map(encode_date),
              o.is_active,
              o.version_tag,
            ])?;
          }
        }

        if let Some(addresses) = &snapshot.addresses {
          tx.execute(
            "DELETE FROM addresses WHERE canonical_key = ?1",
            rusqlite::params![key],
          )?;
          let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO addresses ({ADDRESS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
          ))?;
          for (position, a) in addresses.iter().enumerate() {
            stmt.execute(rusqlite::params![
              key,
              position as u32,
              a.street,
              a.house_number,
              a.stairway,
              a.door_number,
              a.postal_code,
              a.city,
              a.state,
              a.country,
              a.is_deliverable,
              a.is_active,
              a.version_tag,
            ])?;
          }
          tx.execute(
            "UPDATE companies SET address_summary = ?2 WHERE canonical_key = ?1",
            rusqlite::params![key, snapshot.address_summary],
          )?;
        }

        if let Some(links) = &snapshot.links {
          let mut stmt = tx.prepare_cached(&format!(
            "INSERT INTO links ({LINK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (source_key, target_key, link_type) DO UPDATE SET
               target_external_id = excluded.target_external_id,
               share              = excluded.share,
               note               = excluded.note,
               updated_at         = excluded.updated_at"
          ))?;
          for link in links {
            stmt.execute(rusqlite::params![
              key,
              link.target.canonical_key().as_str(),
              link.target.as_str(),
              link.link_type.as_str(),
              link.share,
              link.note,
              normalized_at,
            ])?;
          }
        }

        let raw = tx.query_row(
          &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE canonical_key = ?1"),
          rusqlite::params![key],
          RawCompany::from_row,
        )?;
        tx.commit()?;
        Ok(Some(raw))
      })
      .await?;

    raw.map(RawCompany::into_company).transpose()
  }

  // ── Canonical: reads ──────────────────────────────────────────────────────

  async fn get_company(&self, id: &ExternalId) -> Result<Option<CanonicalCompany>> {
    let external = id.as_str().to_owned();

    let raw: Option<RawCompany> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE external_id = ?1"),
            rusqlite::params![external],
            RawCompany::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCompany::into_company).transpose()
  }

  async fn find_by_name(&self, name: &str) -> Result<Vec<CanonicalCompany>> {
    self
      .query_companies(
        format!(
          "SELECT {COMPANY_COLUMNS} FROM companies WHERE name_key = ?1
           ORDER BY external_id"
        ),
        vec![match_key(name)],
      )
      .await
  }

  async fn search_companies(&self, query: &CompanyQuery) -> Result<Vec<CanonicalCompany>> {
    let mut conds: Vec<String> = vec![];
    let mut params: Vec<String> = vec![];

    // Any token may match. Rows matching the whole name, then more tokens,
    // come first, so truncation drops the weakest candidates.
    let mut rank = String::new();
    if let Some(text) = query.text.as_deref() {
      let key = match_key(text);
      let mut any = vec![];
      for token in key.split(' ').filter(|t| !t.is_empty()) {
        params.push(like_pattern(token));
        any.push(format!("(name_key LIKE ?{} ESCAPE '\\')", params.len()));
      }
      if !any.is_empty() {
        conds.push(format!("({})", any.join(" OR ")));
        params.push(key);
        rank = format!("(name_key = ?{}) DESC, ({}) DESC, ", params.len(), any.join(" + "));
      }
    }
    if let Some(city) = query.city.as_deref() {
      params.push(city.trim().to_owned());
      conds.push(format!("city = ?{} COLLATE NOCASE", params.len()));
    }
    if let Some(form) = query.legal_form.as_deref() {
      params.push(form.trim().to_owned());
      conds.push(format!("legal_form = ?{} COLLATE NOCASE", params.len()));
    }

    let where_clause = if conds.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", conds.join(" AND "))
    };
    let limit  = query.limit.unwrap_or(100);
    let offset = query.offset.unwrap_or(0);

    self
      .query_companies(
        format!(
          "SELECT {COMPANY_COLUMNS} FROM companies
           {where_clause}
           ORDER BY {rank}name_key, external_id
           LIMIT {limit} OFFSET {offset}"
        ),
        params,
      )
      .await
  }

  async fn load_profile(&self, id: &ExternalId) -> Result<Option<CompanyProfile>> {
    let external = id.as_str().to_owned();

    type Rows = (RawCompany, Vec<RawOfficer>, Vec<RawAddress>, Vec<RawLink>);
    let raw: Option<Rows> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let Some(company) = tx
          .query_row(
            &format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE external_id = ?1"),
            rusqlite::params![external],
            RawCompany::from_row,
          )
          .optional()?
        else {
          return Ok(None);
        };
        let key = company.canonical_key.clone();

        let officers = tx
          .prepare(&format!(
            "SELECT {OFFICER_COLUMNS} FROM officers WHERE canonical_key = ?1
             ORDER BY position"
          ))?
          .query_map(rusqlite::params![key], RawOfficer::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let addresses = tx
          .prepare(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE canonical_key = ?1
             ORDER BY position"
          ))?
          .query_map(rusqlite::params![key], RawAddress::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let links = tx
          .prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE source_key = ?1
             ORDER BY target_key, link_type"
          ))?
          .query_map(rusqlite::params![key], RawLink::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        tx.commit()?;
        Ok(Some((company, officers, addresses, links)))
      })
      .await?;

    let Some((company, officers, addresses, links)) = raw else { return Ok(None) };

    Ok(Some(CompanyProfile {
      company:   company.into_company()?,
      officers:  officers
        .into_iter()
        .map(RawOfficer::into_officer)
        .collect::<Result<_>>()?,
      addresses: addresses.into_iter().map(RawAddress::into_address).collect(),
      links:     links.into_iter().map(RawLink::into_link).collect::<Result<_>>()?,
    }))
  }

  // ── Runs ──────────────────────────────────────────────────────────────────

  async fn create_run(&self, input: NewRun) -> Result<IngestionRun> {
    let run = IngestionRun {
      run_id:          Uuid::new_v4(),
      started_at:      now_micros(),
      finished_at:     None,
      strategy:        input.strategy,
      max_identifiers: input.max_identifiers,
      concurrency:     input.concurrency,
      rate_per_sec:    input.rate_per_sec,
      attempted:       0,
      succeeded:       0,
      failed:          0,
      skipped:         0,
      status:          RunStatus::Running,
    };

    let id_str   = encode_uuid(run.run_id);
    let at_str   = encode_dt(run.started_at);
    let strategy = run.strategy.clone();
    let max_ids  = run.max_identifiers as i64;
    let workers  = run.concurrency as i64;
    let rate     = run.rate_per_sec;
    let status   = run.status.as_str();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO ingestion_runs (
             run_id, started_at, strategy, max_identifiers, concurrency,
             rate_per_sec, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![id_str, at_str, strategy, max_ids, workers, rate, status],
        )?;
        Ok(())
      })
      .await?;

    Ok(run)
  }

  async fn record_outcome(&self, run_id: Uuid, outcome: RunOutcome) -> Result<()> {
    let id_str = encode_uuid(run_id);
    let column = outcome_column(outcome);

    let (changed, exists) = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          &format!(
            "UPDATE ingestion_runs
             SET attempted = attempted + 1, {column} = {column} + 1
             WHERE run_id = ?1 AND status = 'running'"
          ),
          rusqlite::params![id_str],
        )?;
        let exists = changed > 0
          || conn
            .query_row(
              "SELECT 1 FROM ingestion_runs WHERE run_id = ?1",
              rusqlite::params![id_str],
              |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok((changed, exists))
      })
      .await?;

    if !exists {
      return Err(Error::RunNotFound(run_id));
    }
    if changed == 0 {
      tracing::warn!(%run_id, ?outcome, "ignoring outcome for a finished run");
    }
    Ok(())
  }

  async fn finish_run(&self, run_id: Uuid, status: RunStatus) -> Result<IngestionRun> {
    let id_str     = encode_uuid(run_id);
    let at_str     = encode_dt(now_micros());
    let status_str = status.as_str();

    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE ingestion_runs SET finished_at = ?2, status = ?3
           WHERE run_id = ?1 AND status = 'running'",
          rusqlite::params![id_str, at_str, status_str],
        )?;
        Ok(conn
          .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE run_id = ?1"),
            rusqlite::params![id_str],
            RawRun::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.ok_or(Error::RunNotFound(run_id))?.into_run()
  }

  async fn get_run(&self, run_id: Uuid) -> Result<Option<IngestionRun>> {
    let id_str = encode_uuid(run_id);

    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM ingestion_runs WHERE run_id = ?1"),
            rusqlite::params![id_str],
            RawRun::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRun::into_run).transpose()
  }
}
