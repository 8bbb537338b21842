//! Typed staged payloads and their validation.
//!
//! Staged slices are loosely-typed upstream JSON. Normalization converts each
//! slice into an [`ExtractPayload`] variant here, and nothing untyped travels
//! past this boundary. A slice that cannot be converted is a data-quality
//! error for that kind only.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  clean::clean_text,
  extract::ExtractKind,
  ids::ExternalId,
};

// ─── Records ─────────────────────────────────────────────────────────────────

/// Identity fields of a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
  pub name:       String,
  pub legal_form: Option<String>,
  pub status:     Option<String>,
  pub city:       Option<String>,
  pub country:    Option<String>,
}

/// One person on a company's officer roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficerRecord {
  pub title:       Option<String>,
  pub first_name:  Option<String>,
  pub last_name:   Option<String>,
  /// Always present; built from the name parts when upstream omits it.
  pub full_name:   String,
  pub role:        Option<String>,
  pub birth_date:  Option<NaiveDate>,
  pub is_active:   bool,
  /// Upstream version number (`vnr`) of this entry.
  pub version_tag: Option<String>,
}

/// A postal address of a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
  pub street:         Option<String>,
  pub house_number:   Option<String>,
  pub stairway:       Option<String>,
  pub door_number:    Option<String>,
  pub postal_code:    Option<String>,
  pub city:           Option<String>,
  pub state:          Option<String>,
  pub country:        String,
  pub is_deliverable: bool,
  pub is_active:      bool,
  pub version_tag:    Option<String>,
}

impl AddressRecord {
  /// `"<street> <house>, <postal> <city>"`, skipping absent parts.
  pub fn summary(&self) -> Option<String> {
    let line1 = join_present(&[&self.street, &self.house_number]);
    let line2 = join_present(&[&self.postal_code, &self.city]);
    match (line1, line2) {
      (Some(a), Some(b)) => Some(format!("{a}, {b}")),
      (a, b) => a.or(b),
    }
  }
}

fn join_present(parts: &[&Option<String>]) -> Option<String> {
  let joined = parts
    .iter()
    .filter_map(|p| p.as_deref())
    .collect::<Vec<_>>()
    .join(" ");
  (!joined.is_empty()).then_some(joined)
}

/// The kind of a directed company-to-company relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
  Ownership,
  Management,
  Affiliation,
  Other(String),
}

impl LinkType {
  /// Parse an upstream type tag; unknown tags are kept verbatim.
  pub fn parse(raw: &str) -> Self {
    match raw.trim().to_lowercase().as_str() {
      "ownership" | "owner" | "shareholder" => Self::Ownership,
      "management" | "manager" => Self::Management,
      "affiliation" | "affiliate" => Self::Affiliation,
      other => Self::Other(other.to_owned()),
    }
  }

  /// The tag stored in the `link_type` column.
  pub fn as_str(&self) -> &str {
    match self {
      Self::Ownership => "ownership",
      Self::Management => "management",
      Self::Affiliation => "affiliation",
      Self::Other(tag) => tag,
    }
  }
}

/// One outgoing relationship hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
  pub target:    ExternalId,
  pub link_type: LinkType,
  /// Ownership share in percent, when upstream states one.
  pub share:     Option<f64>,
  pub note:      Option<String>,
}

// ─── ExtractPayload ──────────────────────────────────────────────────────────

/// A validated staged slice. The variant matches the extract kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ExtractPayload {
  Company(CompanyRecord),
  Officers(Vec<OfficerRecord>),
  Addresses(Vec<AddressRecord>),
  Links(Vec<LinkRecord>),
}

impl ExtractPayload {
  pub fn kind(&self) -> ExtractKind {
    match self {
      Self::Company(_) => ExtractKind::Company,
      Self::Officers(_) => ExtractKind::Officers,
      Self::Addresses(_) => ExtractKind::Addresses,
      Self::Links(_) => ExtractKind::Links,
    }
  }

  /// Validate a raw staged slice of the given kind.
  ///
  /// List entries that lack their own required fields are dropped with a
  /// warning; a slice of the wrong shape fails as a whole.
  pub fn decode(kind: ExtractKind, raw: &Value) -> Result<Self> {
    match kind {
      ExtractKind::Company => decode_company(raw).map(Self::Company),
      ExtractKind::Officers => {
        decode_list(kind, raw, decode_officer).map(Self::Officers)
      }
      ExtractKind::Addresses => {
        decode_list(kind, raw, decode_address).map(Self::Addresses)
      }
      ExtractKind::Links => decode_list(kind, raw, decode_link).map(Self::Links),
    }
  }
}

// ─── Decoders ────────────────────────────────────────────────────────────────

const NAME_KEYS: &[&str] = &["name", "companyName", "company_name", "firmenwortlaut"];

fn decode_company(raw: &Value) -> Result<CompanyRecord> {
  let obj = raw.as_object().ok_or_else(|| Error::Malformed {
    kind:   ExtractKind::Company,
    reason: format!("expected an object, got {}", type_name(raw)),
  })?;

  let name = text_field(obj, NAME_KEYS).ok_or(Error::MissingField {
    kind:  ExtractKind::Company,
    field: "name",
  })?;

  let legal_form = match field(obj, &["legalForm", "legal_form"]) {
    Some(Value::Object(inner)) => text_field(inner, &["text", "name"]),
    Some(other) => string_value(other),
    None => None,
  };

  Ok(CompanyRecord {
    name,
    legal_form,
    status: text_field(obj, &["status", "state", "companyStatus"]),
    city: text_field(obj, &["city"]),
    country: text_field(obj, &["country"]),
  })
}

fn decode_officer(obj: &Map<String, Value>) -> Option<OfficerRecord> {
  let title = text_field(obj, &["title"]);
  let first_name = text_field(obj, &["firstName", "first_name"]);
  let last_name = text_field(obj, &["lastName", "last_name"]);
  let full_name = text_field(obj, &["fullName", "full_name", "name"]).or_else(|| {
    let parts = [&title, &first_name, &last_name]
      .into_iter()
      .flatten()
      .map(String::as_str)
      .collect::<Vec<_>>()
      .join(" ");
    clean_text(&parts)
  })?;

  Some(OfficerRecord {
    title,
    first_name,
    last_name,
    full_name,
    role: text_field(obj, &["role", "function"]),
    birth_date: text_field(obj, &["birthDate", "birth_date"])
      .and_then(|s| parse_date(&s)),
    is_active: flag(obj, &["isActive", "is_active"], true),
    version_tag: text_field(obj, &["vnr", "version"]),
  })
}

fn decode_address(obj: &Map<String, Value>) -> Option<AddressRecord> {
  let address = AddressRecord {
    street:         text_field(obj, &["street", "streetName", "street_name"]),
    house_number:   text_field(obj, &["houseNumber", "house_number"]),
    stairway:       text_field(obj, &["stairway"]),
    door_number:    text_field(obj, &["doorNumber", "door_number"]),
    postal_code:    text_field(obj, &["postalCode", "postal_code"]),
    city:           text_field(obj, &["city", "municipality", "town"]),
    state:          text_field(obj, &["state", "province"]),
    country:        text_field(obj, &["country"]).unwrap_or_else(|| "AT".to_owned()),
    is_deliverable: flag(obj, &["isDeliverable", "is_deliverable"], true),
    is_active:      flag(obj, &["isActive", "is_active"], true),
    version_tag:    text_field(obj, &["vnr", "version"]),
  };

  // An entry with no locating information at all is noise.
  (address.street.is_some() || address.city.is_some() || address.postal_code.is_some())
    .then_some(address)
}

fn decode_link(obj: &Map<String, Value>) -> Option<LinkRecord> {
  let target = text_field(obj, &["target", "targetFnr", "fnr"])?;
  let target = ExternalId::parse(&target).ok()?;

  Some(LinkRecord {
    target,
    link_type: text_field(obj, &["type", "linkType", "link_type"])
      .map(|t| LinkType::parse(&t))
      .unwrap_or(LinkType::Affiliation),
    share: field(obj, &["share"]).and_then(|v| match v {
      Value::Number(n) => n.as_f64(),
      Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
      _ => None,
    }),
    note: text_field(obj, &["note", "description"]),
  })
}

fn decode_list<T>(
  kind: ExtractKind,
  raw: &Value,
  entry: fn(&Map<String, Value>) -> Option<T>,
) -> Result<Vec<T>> {
  let items = raw.as_array().ok_or_else(|| Error::Malformed {
    kind,
    reason: format!("expected a list, got {}", type_name(raw)),
  })?;

  let mut out = Vec::with_capacity(items.len());
  for (index, item) in items.iter().enumerate() {
    match item.as_object().and_then(entry) {
      Some(decoded) => out.push(decoded),
      None => tracing::warn!(%kind, index, "dropping unusable entry"),
    }
  }
  Ok(out)
}

// ─── Field helpers ───────────────────────────────────────────────────────────

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
  keys
    .iter()
    .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| obj.get(*k).and_then(string_value))
}

/// First usable string inside `value`: plain strings and numbers directly,
/// `{text|value|name}` wrappers and lists recursively.
fn string_value(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => clean_text(s),
    Value::Number(n) => Some(n.to_string()),
    Value::Object(obj) => text_field(obj, &["text", "value", "name", "$"]),
    Value::Array(items) => items.iter().find_map(string_value),
    Value::Bool(_) | Value::Null => None,
  }
}

fn flag(obj: &Map<String, Value>, keys: &[&str], default: bool) -> bool {
  match field(obj, keys) {
    Some(Value::Bool(b)) => *b,
    Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
      "true" | "yes" | "1" => true,
      "false" | "no" | "0" => false,
      _ => default,
    },
    _ => default,
  }
}

/// Accepts `YYYY-MM-DD` and timestamps that start with one.
fn parse_date(raw: &str) -> Option<NaiveDate> {
  let head = raw.get(..10).unwrap_or(raw);
  NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "a list",
    Value::Object(_) => "an object",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn company_requires_a_name() {
    let err = ExtractPayload::decode(ExtractKind::Company, &json!({ "status": "AKTIV" }))
      .unwrap_err();
    assert!(err.is_data_quality());
    assert!(matches!(err, Error::MissingField { field: "name", .. }));
  }

  #[test]
  fn company_name_from_wrapped_value() {
    let decoded = ExtractPayload::decode(
      ExtractKind::Company,
      &json!({
        "firmenwortlaut": { "text": "  Beispiel   GmbH " },
        "legalForm": { "text": "Gesellschaft mit beschränkter Haftung" },
        "state": "aktiv"
      }),
    )
    .unwrap();

    let ExtractPayload::Company(company) = decoded else { panic!("wrong variant") };
    assert_eq!(company.name, "Beispiel GmbH");
    assert_eq!(
      company.legal_form.as_deref(),
      Some("Gesellschaft mit beschränkter Haftung")
    );
    assert_eq!(company.status.as_deref(), Some("aktiv"));
  }

  #[test]
  fn officers_must_be_a_list() {
    let err = ExtractPayload::decode(ExtractKind::Officers, &json!({ "fullName": "x" }))
      .unwrap_err();
    assert!(matches!(err, Error::Malformed { kind: ExtractKind::Officers, .. }));
  }

  #[test]
  fn officers_drop_nameless_entries_and_build_full_name() {
    let decoded = ExtractPayload::decode(
      ExtractKind::Officers,
      &json!([
        { "title": "Dr.", "firstName": "Anna", "lastName": "Berger",
          "role": "Geschäftsführer", "birthDate": "1970-03-01T00:00:00",
          "isActive": "false", "vnr": 7 },
        { "role": "Prokurist" }
      ]),
    )
    .unwrap();

    let ExtractPayload::Officers(officers) = decoded else { panic!("wrong variant") };
    assert_eq!(officers.len(), 1);
    let anna = &officers[0];
    assert_eq!(anna.full_name, "Dr. Anna Berger");
    assert_eq!(anna.birth_date, NaiveDate::from_ymd_opt(1970, 3, 1));
    assert!(!anna.is_active);
    assert_eq!(anna.version_tag.as_deref(), Some("7"));
  }

  #[test]
  fn addresses_default_country_and_summary() {
    let decoded = ExtractPayload::decode(
      ExtractKind::Addresses,
      &json!([{ "streetName": "Ringstraße", "houseNumber": "1",
                "postalCode": "1010", "municipality": "Wien" }]),
    )
    .unwrap();

    let ExtractPayload::Addresses(addresses) = decoded else { panic!("wrong variant") };
    assert_eq!(addresses[0].country, "AT");
    assert!(addresses[0].is_deliverable);
    assert_eq!(addresses[0].summary().as_deref(), Some("Ringstraße 1, 1010 Wien"));
  }

  #[test]
  fn links_parse_targets_and_types() {
    let decoded = ExtractPayload::decode(
      ExtractKind::Links,
      &json!([
        { "target": "FN 456 a", "type": "Shareholder", "share": "25%" },
        { "target": "not-an-id", "type": "ownership" },
        { "fnr": "789", "type": "franchise" }
      ]),
    )
    .unwrap();

    let ExtractPayload::Links(links) = decoded else { panic!("wrong variant") };
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].target.as_str(), "456A");
    assert_eq!(links[0].link_type, LinkType::Ownership);
    assert_eq!(links[0].share, Some(25.0));
    assert_eq!(links[1].link_type, LinkType::Other("franchise".into()));
  }
}
