//! Staging types: raw per-kind snapshots of one upstream fetch.
//!
//! A staging extract is immutable evidence. Rows are appended, never updated;
//! a newer extract for the same identifier and kind supersedes an older one
//! simply by being newer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result, ids::ExternalId};

// ─── Discriminants ───────────────────────────────────────────────────────────

/// Which slice of a company record an extract carries.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExtractKind {
  Company,
  Officers,
  Addresses,
  Links,
}

impl ExtractKind {
  pub const ALL: [ExtractKind; 4] =
    [Self::Company, Self::Officers, Self::Addresses, Self::Links];

  /// The discriminant stored in the `extract_kind` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Company => "company",
      Self::Officers => "officers",
      Self::Addresses => "addresses",
      Self::Links => "links",
    }
  }

  pub fn from_discriminant(s: &str) -> Result<Self> {
    match s {
      "company" => Ok(Self::Company),
      "officers" => Ok(Self::Officers),
      "addresses" => Ok(Self::Addresses),
      "links" => Ok(Self::Links),
      other => Err(Error::UnknownExtractKind(other.to_owned())),
    }
  }
}

impl fmt::Display for ExtractKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which path produced an extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
  BulkDiscovery,
  OnDemand,
}

/// Outcome of the fetch that produced an extract.
///
/// Rows are immutable, so there is no separate "pending" state: an ok row is
/// pending until the canonical row's `last_normalized_at` catches up with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
  Ok,
  Error,
}

// ─── Raw upstream record ─────────────────────────────────────────────────────

/// An upstream response body for one identifier, treated as opaque JSON until
/// it is split into per-kind slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
  pub external_id: ExternalId,
  pub body:        Value,
}

const OFFICER_KEYS: &[&str] = &["officers", "persons"];
const ADDRESS_LIST_KEYS: &[&str] = &["addresses"];
const ADDRESS_SINGLE_KEYS: &[&str] = &["address", "registeredOffice"];
const LINK_KEYS: &[&str] = &["links", "relations"];

impl RawRecord {
  /// Split the record into one JSON slice per kind.
  ///
  /// Every kind is always produced; validation decides whether the company
  /// slice is usable. List fields are looked up on the `company` sub-object
  /// first and then on the root.
  pub fn split(&self) -> Vec<(ExtractKind, Value)> {
    let root = self.body.as_object();
    let container = root
      .and_then(|r| r.get("company"))
      .and_then(Value::as_object)
      .or(root);

    let lookup = |keys: &[&str]| -> Option<Value> {
      [container, root].into_iter().flatten().find_map(|obj| {
        keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()).cloned())
      })
    };

    let company = match container {
      Some(obj) => {
        let stripped: Map<String, Value> = obj
          .iter()
          .filter(|(k, _)| !is_list_key(k))
          .map(|(k, v)| (k.clone(), v.clone()))
          .collect();
        Value::Object(stripped)
      }
      None => self.body.clone(),
    };

    // A list the record leaves out is an empty list: the newer fetch
    // replaces the older roster instead of inheriting it.
    let officers = lookup(OFFICER_KEYS).unwrap_or_else(empty_list);
    let addresses = lookup(ADDRESS_LIST_KEYS)
      .or_else(|| lookup(ADDRESS_SINGLE_KEYS).map(|single| Value::Array(vec![single])))
      .unwrap_or_else(empty_list);
    let links = lookup(LINK_KEYS).unwrap_or_else(empty_list);

    vec![
      (ExtractKind::Company, company),
      (ExtractKind::Officers, officers),
      (ExtractKind::Addresses, addresses),
      (ExtractKind::Links, links),
    ]
  }
}

fn empty_list() -> Value { Value::Array(vec![]) }

fn is_list_key(key: &str) -> bool {
  OFFICER_KEYS
    .iter()
    .chain(ADDRESS_LIST_KEYS)
    .chain(ADDRESS_SINGLE_KEYS)
    .chain(LINK_KEYS)
    .any(|k| *k == key)
}

/// SHA-256 over the compact JSON text of a payload.
///
/// `serde_json` maps are key-sorted, so equal payloads always hash equally.
pub fn payload_digest(payload: &Value) -> String {
  let text = payload.to_string();
  hex::encode(Sha256::digest(text.as_bytes()))
}

// ─── StagingExtract ──────────────────────────────────────────────────────────

/// One immutable staged snapshot of one kind for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingExtract {
  pub extract_id:     Uuid,
  pub external_id:    ExternalId,
  pub kind:           ExtractKind,
  /// Store-assigned; strictly increasing per external identifier.
  pub extracted_at:   DateTime<Utc>,
  pub source:         SourceTag,
  /// Raw JSON slice; `None` for error rows.
  pub payload:        Option<Value>,
  pub payload_digest: Option<String>,
  pub status:         IngestStatus,
  pub error_detail:   Option<String>,
}

/// What a new extract carries.
#[derive(Debug, Clone)]
pub enum ExtractBody {
  Payload(Value),
  /// The fetch failed after retries; the detail is kept for audit.
  Failed(String),
}

/// Input to [`crate::store::RegistryStore::append_extract`].
/// `extract_id` and `extracted_at` are always assigned by the store.
#[derive(Debug, Clone)]
pub struct NewExtract {
  pub external_id: ExternalId,
  pub kind:        ExtractKind,
  pub source:      SourceTag,
  pub body:        ExtractBody,
}

impl NewExtract {
  pub fn payload(
    external_id: ExternalId,
    kind: ExtractKind,
    source: SourceTag,
    payload: Value,
  ) -> Self {
    Self { external_id, kind, source, body: ExtractBody::Payload(payload) }
  }

  /// An error row. Failures are recorded against the company kind because
  /// the fetch never got far enough to produce any slice.
  pub fn failed(
    external_id: ExternalId,
    source: SourceTag,
    detail: impl Into<String>,
  ) -> Self {
    Self {
      external_id,
      kind: ExtractKind::Company,
      source,
      body: ExtractBody::Failed(detail.into()),
    }
  }

  /// One extract per slice of `raw`.
  pub fn from_raw(raw: &RawRecord, source: SourceTag) -> Vec<Self> {
    raw
      .split()
      .into_iter()
      .map(|(kind, payload)| {
        Self::payload(raw.external_id.clone(), kind, source, payload)
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn raw(body: Value) -> RawRecord {
    RawRecord { external_id: ExternalId::parse("123M").unwrap(), body }
  }

  #[test]
  fn split_nested_company_container() {
    let record = raw(json!({
      "company": {
        "name": "Acme GmbH",
        "officers": [{ "fullName": "Jane Doe" }],
        "addresses": [{ "city": "Wien" }]
      },
      "links": [{ "target": "456A", "type": "ownership" }]
    }));

    let slices = record.split();
    let kinds: Vec<_> = slices.iter().map(|(k, _)| *k).collect();
    assert_eq!(
      kinds,
      vec![
        ExtractKind::Company,
        ExtractKind::Officers,
        ExtractKind::Addresses,
        ExtractKind::Links
      ]
    );
    assert_eq!(slices[0].1, json!({ "name": "Acme GmbH" }));
  }

  #[test]
  fn split_wraps_single_address() {
    let record = raw(json!({
      "name": "Solo KG",
      "registeredOffice": { "city": "Graz" }
    }));

    let slices = record.split();
    assert_eq!(slices.len(), 4);
    assert_eq!(slices[2].0, ExtractKind::Addresses);
    assert_eq!(slices[2].1, json!([{ "city": "Graz" }]));
  }

  #[test]
  fn missing_lists_split_as_empty() {
    let slices = raw(json!({ "company": { "name": "Acme GmbH" } })).split();
    assert_eq!(slices.len(), 4);
    assert_eq!(slices[0].1, json!({ "name": "Acme GmbH" }));
    for (kind, value) in &slices[1..] {
      assert_eq!(value, &json!([]), "{kind} should be an empty list");
    }
  }

  #[test]
  fn digest_ignores_key_order() {
    let a: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
    assert_eq!(payload_digest(&a), payload_digest(&b));
    assert_ne!(payload_digest(&a), payload_digest(&json!({"a": 1})));
  }
}
