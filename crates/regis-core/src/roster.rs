//! Officer roster diffing.
//!
//! Normalization replaces a company's roster wholesale. This module computes
//! what that replacement means in terms of people, so the change can be
//! reported (and later tracked) without touching the swap itself.
//!
//! Officer identity across extracts is the whitespace- and case-normalized
//! full name plus the birth date. Upstream publishes no stable person id, so
//! this is an assumption: a reformatted name with an unchanged birth date is
//! still the same person, a corrected birth date is not.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::{clean::match_key, payload::OfficerRecord};

/// Matching identity of one officer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfficerIdentity {
  pub name:       String,
  pub birth_date: Option<NaiveDate>,
}

impl OfficerIdentity {
  pub fn of(officer: &OfficerRecord) -> Self {
    Self { name: match_key(&officer.full_name), birth_date: officer.birth_date }
  }
}

/// The effect of replacing `old` with `new`.
#[derive(Debug, Default)]
pub struct RosterDiff<'a> {
  /// Present in both rosters (taken from `new`).
  pub retained: Vec<&'a OfficerRecord>,
  pub added:    Vec<&'a OfficerRecord>,
  /// Present only in `old`.
  pub retired:  Vec<&'a OfficerRecord>,
}

impl RosterDiff<'_> {
  pub fn is_unchanged(&self) -> bool {
    self.added.is_empty() && self.retired.is_empty()
  }
}

pub fn diff_officers<'a>(
  old: &'a [OfficerRecord],
  new: &'a [OfficerRecord],
) -> RosterDiff<'a> {
  let old_ids: HashSet<OfficerIdentity> = old.iter().map(OfficerIdentity::of).collect();
  let new_ids: HashSet<OfficerIdentity> = new.iter().map(OfficerIdentity::of).collect();

  let mut diff = RosterDiff::default();
  for officer in new {
    if old_ids.contains(&OfficerIdentity::of(officer)) {
      diff.retained.push(officer);
    } else {
      diff.added.push(officer);
    }
  }
  diff.retired = old
    .iter()
    .filter(|o| !new_ids.contains(&OfficerIdentity::of(o)))
    .collect();
  diff
}

#[cfg(test)]
mod tests {
  use super::*;

  fn officer(name: &str, born: Option<(i32, u32, u32)>) -> OfficerRecord {
    OfficerRecord {
      title:       None,
      first_name:  None,
      last_name:   None,
      full_name:   name.to_owned(),
      role:        None,
      birth_date:  born.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
      is_active:   true,
      version_tag: None,
    }
  }

  #[test]
  fn reformatted_name_is_retained() {
    let old = [officer("Anna  BERGER", Some((1970, 3, 1)))];
    let new = [officer("anna berger", Some((1970, 3, 1)))];
    let diff = diff_officers(&old, &new);
    assert!(diff.is_unchanged());
    assert_eq!(diff.retained.len(), 1);
  }

  #[test]
  fn birth_date_distinguishes_namesakes() {
    let old = [officer("Max Muster", Some((1960, 1, 1)))];
    let new = [
      officer("Max Muster", Some((1990, 1, 1))),
      officer("Eva Neu", None),
    ];
    let diff = diff_officers(&old, &new);
    assert_eq!(diff.added.len(), 2);
    assert_eq!(diff.retired.len(), 1);
    assert!(diff.retained.is_empty());
  }
}
