//! Search queries over stored records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the single queried field is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTerm {
  /// Substring containment, case-sensitive as authored.
  Fuzzy(String),
  /// String equality.
  Exact(String),
}

/// A single-field query: exactly one field, exactly one term kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
  pub field: String,
  pub term: MatchTerm,
}

impl SearchQuery {
  pub fn fuzzy(field: impl Into<String>, term: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      term: MatchTerm::Fuzzy(term.into()),
    }
  }

  pub fn exact(field: impl Into<String>, term: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      term: MatchTerm::Exact(term.into()),
    }
  }

  /// Whether a record's payload satisfies this query.
  pub fn matches(&self, data: &Value) -> bool {
    let Some(value) = data.get(&self.field).and_then(Value::as_str) else {
      return false;
    };

    match &self.term {
      MatchTerm::Fuzzy(needle) => value.contains(needle.as_str()),
      MatchTerm::Exact(expected) => value == expected,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn fuzzy_is_case_sensitive_containment() {
    let query = SearchQuery::fuzzy("name", "App");
    assert!(query.matches(&json!({"name": "Green Apple"})));
    assert!(!query.matches(&json!({"name": "green apple"})));
    assert!(!query.matches(&json!({"name": "Banana"})));
  }

  #[test]
  fn exact_requires_equality() {
    let query = SearchQuery::exact("name", "Banana");
    assert!(query.matches(&json!({"name": "Banana"})));
    assert!(!query.matches(&json!({"name": "Banana Bread"})));
  }

  #[test]
  fn missing_or_non_string_field_never_matches() {
    let query = SearchQuery::fuzzy("name", "x");
    assert!(!query.matches(&json!({"brand": "x"})));
    assert!(!query.matches(&json!({"name": 42})));
  }
}
