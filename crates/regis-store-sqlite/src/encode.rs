//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are fixed-width RFC 3339 strings with microseconds and a `Z`
//! suffix, so lexical order equals time order. Dates are `YYYY-MM-DD`.
//! UUIDs are hyphenated lowercase strings. Booleans are `0`/`1`.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, SubsecRound as _, Utc};
use regis_core::{
  CanonicalKey, ExternalId,
  canonical::{CanonicalAddress, CanonicalCompany, CanonicalLink, CanonicalOfficer},
  extract::{ExtractKind, IngestStatus, SourceTag, StagingExtract},
  payload::{AddressRecord, LinkType, OfficerRecord},
  run::{IngestionRun, RunStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── Time ────────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// The current time at the precision the store keeps.
pub fn now_micros() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// The next `extracted_at` for an identifier whose newest extract so far was
/// stamped `previous`: the current time, or one microsecond after
/// `previous` if the clock has not moved past it.
pub fn next_extracted_at(
  previous: Option<&str>,
  now: DateTime<Utc>,
) -> Result<DateTime<Utc>, chrono::ParseError> {
  let Some(previous) = previous else { return Ok(now) };
  let previous = DateTime::parse_from_rfc3339(previous)?.with_timezone(&Utc);
  Ok(now.max(previous + Duration::microseconds(1)))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Discriminants ───────────────────────────────────────────────────────────

pub fn encode_source(s: SourceTag) -> &'static str {
  match s {
    SourceTag::BulkDiscovery => "bulk_discovery",
    SourceTag::OnDemand => "on_demand",
  }
}

pub fn decode_source(s: &str) -> Result<SourceTag> {
  match s {
    "bulk_discovery" => Ok(SourceTag::BulkDiscovery),
    "on_demand" => Ok(SourceTag::OnDemand),
    other => Err(unknown("source tag", other)),
  }
}

pub fn encode_status(s: IngestStatus) -> &'static str {
  match s {
    IngestStatus::Ok => "ok",
    IngestStatus::Error => "error",
  }
}

pub fn decode_status(s: &str) -> Result<IngestStatus> {
  match s {
    "ok" => Ok(IngestStatus::Ok),
    "error" => Ok(IngestStatus::Error),
    other => Err(unknown("ingest status", other)),
  }
}

fn unknown(field: &'static str, value: &str) -> Error {
  Error::Core(regis_core::Error::UnknownDiscriminant { field, value: value.to_owned() })
}

fn decode_id(s: String) -> Result<ExternalId> { Ok(ExternalId::parse(&s)?) }

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const EXTRACT_COLUMNS: &str = "extract_id, external_id, extract_kind, extracted_at, \
   source_tag, payload, payload_digest, status, error_detail";

/// Raw strings read from a `staging_extracts` row.
pub struct RawExtract {
  pub extract_id:     String,
  pub external_id:    String,
  pub extract_kind:   String,
  pub extracted_at:   String,
  pub source_tag:     String,
  pub payload:        Option<String>,
  pub payload_digest: Option<String>,
  pub status:         String,
  pub error_detail:   Option<String>,
}

impl RawExtract {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      extract_id:     row.get(0)?,
      external_id:    row.get(1)?,
      extract_kind:   row.get(2)?,
      extracted_at:   row.get(3)?,
      source_tag:     row.get(4)?,
      payload:        row.get(5)?,
      payload_digest: row.get(6)?,
      status:         row.get(7)?,
      error_detail:   row.get(8)?,
    })
  }

  pub fn into_extract(self) -> Result<StagingExtract> {
    Ok(StagingExtract {
      extract_id:     decode_uuid(&self.extract_id)?,
      external_id:    decode_id(self.external_id)?,
      kind:           ExtractKind::from_discriminant(&self.extract_kind)?,
      extracted_at:   decode_dt(&self.extracted_at)?,
      source:         decode_source(&self.source_tag)?,
      payload:        self.payload.as_deref().map(serde_json::from_str).transpose()?,
      payload_digest: self.payload_digest,
      status:         decode_status(&self.status)?,
      error_detail:   self.error_detail,
    })
  }
}

pub const COMPANY_COLUMNS: &str = "canonical_key, external_id, name, legal_form, status, \
   city, country, address_summary, created_at, updated_at, last_fetched_at, \
   last_normalized_at";

pub struct RawCompany {
  pub canonical_key:      String,
  pub external_id:        String,
  pub name:               String,
  pub legal_form:         Option<String>,
  pub status:             Option<String>,
  pub city:               Option<String>,
  pub country:            Option<String>,
  pub address_summary:    Option<String>,
  pub created_at:         String,
  pub updated_at:         String,
  pub last_fetched_at:    Option<String>,
  pub last_normalized_at: String,
}

impl RawCompany {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      canonical_key:      row.get(0)?,
      external_id:        row.get(1)?,
      name:               row.get(2)?,
      legal_form:         row.get(3)?,
      status:             row.get(4)?,
      city:               row.get(5)?,
      country:            row.get(6)?,
      address_summary:    row.get(7)?,
      created_at:         row.get(8)?,
      updated_at:         row.get(9)?,
      last_fetched_at:    row.get(10)?,
      last_normalized_at: row.get(11)?,
    })
  }

  pub fn into_company(self) -> Result<CanonicalCompany> {
    Ok(CanonicalCompany {
      canonical_key:      CanonicalKey::from_stored(self.canonical_key),
      external_id:        decode_id(self.external_id)?,
      name:               self.name,
      legal_form:         self.legal_form,
      status:             self.status,
      city:               self.city,
      country:            self.country,
      address_summary:    self.address_summary,
      created_at:         decode_dt(&self.created_at)?,
      updated_at:         decode_dt(&self.updated_at)?,
      last_fetched_at:    decode_opt_dt(self.last_fetched_at)?,
      last_normalized_at: decode_dt(&self.last_normalized_at)?,
    })
  }
}

pub const OFFICER_COLUMNS: &str = "canonical_key, position, title, first_name, last_name, \
   full_name, role, birth_date, is_active, version_tag";

pub struct RawOfficer {
  pub canonical_key: String,
  pub position:      u32,
  pub title:         Option<String>,
  pub first_name:    Option<String>,
  pub last_name:     Option<String>,
  pub full_name:     String,
  pub role:          Option<String>,
  pub birth_date:    Option<String>,
  pub is_active:     bool,
  pub version_tag:   Option<String>,
}

impl RawOfficer {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      canonical_key: row.get(0)?,
      position:      row.get(1)?,
      title:         row.get(2)?,
      first_name:    row.get(3)?,
      last_name:     row.get(4)?,
      full_name:     row.get(5)?,
      role:          row.get(6)?,
      birth_date:    row.get(7)?,
      is_active:     row.get(8)?,
      version_tag:   row.get(9)?,
    })
  }

  pub fn into_officer(self) -> Result<CanonicalOfficer> {
    Ok(CanonicalOfficer {
      canonical_key: CanonicalKey::from_stored(self.canonical_key),
      position:      self.position,
      officer:       OfficerRecord {
        title:       self.title,
        first_name:  self.first_name,
        last_name:   self.last_name,
        full_name:   self.full_name,
        role:        self.role,
        birth_date:  self.birth_date.as_deref().map(decode_date).transpose()?,
        is_active:   self.is_active,
        version_tag: self.version_tag,
      },
    })
  }
}

pub const ADDRESS_COLUMNS: &str = "canonical_key, position, street, house_number, stairway, \
   door_number, postal_code, city, state, country, is_deliverable, is_active, version_tag";

pub struct RawAddress {
  pub canonical_key: String,
  pub position:      u32,
  pub address:       AddressRecord,
}

impl RawAddress {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      canonical_key: row.get(0)?,
      position:      row.get(1)?,
      address:       AddressRecord {
        street:         row.get(2)?,
        house_number:   row.get(3)?,
        stairway:       row.get(4)?,
        door_number:    row.get(5)?,
        postal_code:    row.get(6)?,
        city:           row.get(7)?,
        state:          row.get(8)?,
        country:        row.get(9)?,
        is_deliverable: row.get(10)?,
        is_active:      row.get(11)?,
        version_tag:    row.get(12)?,
      },
    })
  }

  pub fn into_address(self) -> CanonicalAddress {
    CanonicalAddress {
      canonical_key: CanonicalKey::from_stored(self.canonical_key),
      position:      self.position,
      address:       self.address,
    }
  }
}

pub const LINK_COLUMNS: &str =
  "source_key, target_key, target_external_id, link_type, share, note, updated_at";

pub struct RawLink {
  pub source_key:         String,
  pub target_key:         String,
  pub target_external_id: String,
  pub link_type:          String,
  pub share:              Option<f64>,
  pub note:               Option<String>,
  pub updated_at:         String,
}

impl RawLink {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      source_key:         row.get(0)?,
      target_key:         row.get(1)?,
      target_external_id: row.get(2)?,
      link_type:          row.get(3)?,
      share:              row.get(4)?,
      note:               row.get(5)?,
      updated_at:         row.get(6)?,
    })
  }

  pub fn into_link(self) -> Result<CanonicalLink> {
    Ok(CanonicalLink {
      source_key:         CanonicalKey::from_stored(self.source_key),
      target_key:         CanonicalKey::from_stored(self.target_key),
      target_external_id: decode_id(self.target_external_id)?,
      link_type:          LinkType::parse(&self.link_type),
      share:              self.share,
      note:               self.note,
      updated_at:         decode_dt(&self.updated_at)?,
    })
  }
}

pub const RUN_COLUMNS: &str = "run_id, started_at, finished_at, strategy, max_identifiers, \
   concurrency, rate_per_sec, attempted, succeeded, failed, skipped, status";

pub struct RawRun {
  pub run_id:          String,
  pub started_at:      String,
  pub finished_at:     Option<String>,
  pub strategy:        String,
  pub max_identifiers: i64,
  pub concurrency:     i64,
  pub rate_per_sec:    f64,
  pub attempted:       i64,
  pub succeeded:       i64,
  pub failed:          i64,
  pub skipped:         i64,
  pub status:          String,
}

impl RawRun {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:          row.get(0)?,
      started_at:      row.get(1)?,
      finished_at:     row.get(2)?,
      strategy:        row.get(3)?,
      max_identifiers: row.get(4)?,
      concurrency:     row.get(5)?,
      rate_per_sec:    row.get(6)?,
      attempted:       row.get(7)?,
      succeeded:       row.get(8)?,
      failed:          row.get(9)?,
      skipped:         row.get(10)?,
      status:          row.get(11)?,
    })
  }

  pub fn into_run(self) -> Result<IngestionRun> {
    Ok(IngestionRun {
      run_id:          decode_uuid(&self.run_id)?,
      started_at:      decode_dt(&self.started_at)?,
      finished_at:     decode_opt_dt(self.finished_at)?,
      strategy:        self.strategy,
      max_identifiers: self.max_identifiers.max(0) as u64,
      concurrency:     self.concurrency.max(0) as u32,
      rate_per_sec:    self.rate_per_sec,
      attempted:       self.attempted.max(0) as u64,
      succeeded:       self.succeeded.max(0) as u64,
      failed:          self.failed.max(0) as u64,
      skipped:         self.skipped.max(0) as u64,
      status:          RunStatus::from_discriminant(&self.status)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encoded_timestamps_sort_lexically() {
    let early = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
      .unwrap()
      .with_timezone(&Utc);
    let late = early + Duration::microseconds(1);
    let (a, b) = (encode_dt(early), encode_dt(late));
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(decode_dt(&b).unwrap(), late);
  }

  #[test]
  fn next_extracted_at_never_goes_backwards() {
    let now = now_micros();
    let ahead = encode_dt(now + Duration::seconds(5));
    let next = next_extracted_at(Some(&ahead), now).unwrap();
    assert_eq!(next, now + Duration::seconds(5) + Duration::microseconds(1));
    assert_eq!(next_extracted_at(None, now).unwrap(), now);
  }
}
