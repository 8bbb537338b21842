//! Canonical entities: the deduplicated read model served to consumers.
//!
//! Canonical rows are only written through
//! [`RegistryStore::apply_snapshot`](crate::store::RegistryStore::apply_snapshot),
//! which swaps one company's whole entity group in a single transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  ids::{CanonicalKey, ExternalId},
  payload::{AddressRecord, LinkRecord, LinkType, OfficerRecord},
};

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One row per real-world company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCompany {
  pub canonical_key:      CanonicalKey,
  pub external_id:        ExternalId,
  pub name:               String,
  pub legal_form:         Option<String>,
  pub status:             Option<String>,
  pub city:               Option<String>,
  pub country:            Option<String>,
  pub address_summary:    Option<String>,
  pub created_at:         DateTime<Utc>,
  pub updated_at:         DateTime<Utc>,
  /// Timestamp of the newest company extract consumed.
  pub last_fetched_at:    Option<DateTime<Utc>>,
  /// Timestamp of the newest extract of any kind consumed.
  pub last_normalized_at: DateTime<Utc>,
}

impl CanonicalCompany {
  /// Whether the row was fetched within `max_age` of `now`.
  pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
    self.last_fetched_at.is_some_and(|at| now - at <= max_age)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOfficer {
  pub canonical_key: CanonicalKey,
  /// Position within the roster of the extract it came from.
  pub position:      u32,
  #[serde(flatten)]
  pub officer:       OfficerRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAddress {
  pub canonical_key: CanonicalKey,
  pub position:      u32,
  #[serde(flatten)]
  pub address:       AddressRecord,
}

/// Directed company-to-company relationship, unique per
/// `(source_key, target_key, link_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLink {
  pub source_key:         CanonicalKey,
  pub target_key:         CanonicalKey,
  pub target_external_id: ExternalId,
  pub link_type:          LinkType,
  pub share:              Option<f64>,
  pub note:               Option<String>,
  pub updated_at:         DateTime<Utc>,
}

/// A company with everything hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
  pub company:   CanonicalCompany,
  pub officers:  Vec<CanonicalOfficer>,
  pub addresses: Vec<CanonicalAddress>,
  pub links:     Vec<CanonicalLink>,
}

// ─── Write model ─────────────────────────────────────────────────────────────

/// Identity columns of a company as normalization computed them.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyFields {
  pub name:       String,
  pub legal_form: Option<String>,
  pub status:     Option<String>,
  pub city:       Option<String>,
  pub country:    Option<String>,
}

/// Everything one normalization pass decided for one company.
///
/// A `None` kind was absent or failed validation; the store leaves that part
/// of the canonical entity untouched. A `Some` list, even an empty one,
/// replaces the stored set wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanySnapshot {
  pub external_id:     ExternalId,
  pub canonical_key:   CanonicalKey,
  pub company:         Option<CompanyFields>,
  pub officers:        Option<Vec<OfficerRecord>>,
  pub addresses:       Option<Vec<AddressRecord>>,
  /// Written together with `addresses`.
  pub address_summary: Option<String>,
  pub links:           Option<Vec<LinkRecord>>,
  /// Timestamp of the company extract used, if any.
  pub fetched_at:      Option<DateTime<Utc>>,
  /// Newest extract timestamp among all kinds consumed.
  pub normalized_at:   DateTime<Utc>,
}

impl CompanySnapshot {
  pub fn new(external_id: ExternalId, normalized_at: DateTime<Utc>) -> Self {
    Self {
      canonical_key: external_id.canonical_key(),
      external_id,
      company: None,
      officers: None,
      addresses: None,
      address_summary: None,
      links: None,
      fetched_at: None,
      normalized_at,
    }
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// Parameters for
/// [`RegistryStore::search_companies`](crate::store::RegistryStore::search_companies).
#[derive(Debug, Clone, Default)]
pub struct CompanyQuery {
  /// Matches companies whose name contains any whitespace-separated token.
  pub text:       Option<String>,
  /// Exact, case-insensitive city filter.
  pub city:       Option<String>,
  pub legal_form: Option<String>,
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
}
