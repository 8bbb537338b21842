//! Identifiers: the upstream register number and the canonical key derived
//! from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Country prefix carried by every canonical key.
pub const CANONICAL_PREFIX: &str = "AT";

// ─── ExternalId ──────────────────────────────────────────────────────────────

/// The upstream registry's company reference (a Firmenbuch number), kept in
/// compact normalized form: digits plus an optional trailing check letter,
/// uppercase, no `FN` prefix and no whitespace (e.g. `348406M`).
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId(String);

impl ExternalId {
  /// Normalize and validate a raw register number.
  ///
  /// Accepts the spellings seen upstream: `FN 348406 m`, `348406m`,
  /// `FN348406M`.
  pub fn parse(raw: &str) -> Result<Self> {
    let upper = raw.trim().to_uppercase();
    let body = upper.strip_prefix("FN").unwrap_or(&upper);
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();

    let digits = compact.chars().take_while(char::is_ascii_digit).count();
    let rest = &compact[digits..];
    let valid = (1..=8).contains(&digits)
      && (rest.is_empty()
        || (rest.len() == 1 && rest.chars().all(|c| c.is_ascii_alphabetic())));

    if valid {
      Ok(Self(compact))
    } else {
      Err(Error::InvalidExternalId(raw.to_owned()))
    }
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// The deterministic canonical key for this identifier.
  pub fn canonical_key(&self) -> CanonicalKey { CanonicalKey::derive(self) }
}

impl fmt::Display for ExternalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for ExternalId {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

impl From<ExternalId> for String {
  fn from(id: ExternalId) -> Self { id.0 }
}

impl std::str::FromStr for ExternalId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

// ─── CanonicalKey ────────────────────────────────────────────────────────────

/// Stable key of a canonical company. Always derived from the external
/// identifier, so repeated normalization upserts the same row.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
  pub fn derive(id: &ExternalId) -> Self {
    Self(format!("{CANONICAL_PREFIX}-{}", id.as_str()))
  }

  /// Wrap a key read back from storage.
  pub fn from_stored(raw: String) -> Self { Self(raw) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CanonicalKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
