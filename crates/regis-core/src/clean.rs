//! Text cleaning applied while mapping staged payloads into canonical rows.

/// Trim and collapse inner whitespace; `None` when nothing is left.
pub fn clean_text(raw: &str) -> Option<String> {
  let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
  (!collapsed.is_empty()).then_some(collapsed)
}

/// Title-case a place name: `"ST. PÖLTEN"` → `"St. Pölten"`,
/// `"bruck an der mur"` → `"Bruck An Der Mur"`.
pub fn title_case(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut at_word_start = true;
  for c in raw.chars() {
    if c.is_alphanumeric() {
      if at_word_start {
        out.extend(c.to_uppercase());
      } else {
        out.extend(c.to_lowercase());
      }
      at_word_start = false;
    } else {
      out.push(c);
      at_word_start = c.is_whitespace() || c == '-' || c == '.';
    }
  }
  out
}

/// Lowercased, whitespace-collapsed form used for case-insensitive matching.
pub fn match_key(raw: &str) -> String {
  raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clean_collapses_whitespace() {
    assert_eq!(clean_text("  Acme \t  GmbH \n").as_deref(), Some("Acme GmbH"));
    assert_eq!(clean_text("   "), None);
  }

  #[test]
  fn title_case_handles_separators() {
    assert_eq!(title_case("ST. PÖLTEN"), "St. Pölten");
    assert_eq!(title_case("wiener neustadt"), "Wiener Neustadt");
    assert_eq!(title_case("klein-pöchlarn"), "Klein-Pöchlarn");
  }
}
