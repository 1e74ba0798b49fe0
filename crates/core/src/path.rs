//! Structured record paths.
//!
//! A `PathKey` is an ordered list of non-empty segments. Building keys from
//! segments instead of string concatenation keeps prefix semantics exact: a
//! descendant check never depends on whether a caller remembered a trailing
//! slash.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PathError, Result};

/// A slash-delimited location of a record or a subtree of records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
  segments: Vec<String>,
}

impl PathKey {
  /// Parse a `/a/b/c` style path. Empty segments are ignored.
  pub fn parse(raw: &str) -> Result<Self> {
    let segments: Vec<String> = raw
      .split('/')
      .filter(|s| !s.is_empty())
      .map(|s| s.to_string())
      .collect();

    if segments.is_empty() {
      return Err(PathError::Empty);
    }

    Ok(Self { segments })
  }

  /// Build a path from already-split segments.
  pub fn from_segments<I, S>(segments: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
    if segments.is_empty() {
      return Err(PathError::Empty);
    }
    if segments.iter().any(|s| s.is_empty() || s.contains('/')) {
      return Err(PathError::EmptySegment);
    }
    Ok(Self { segments })
  }

  /// Extend the path by one segment.
  pub fn child(&self, segment: impl AsRef<str>) -> Self {
    let mut segments = self.segments.clone();
    segments.extend(segment.as_ref().split('/').filter(|s| !s.is_empty()).map(String::from));
    Self { segments }
  }

  /// Parent path, or `None` at the top level.
  pub fn parent(&self) -> Option<Self> {
    if self.segments.len() <= 1 {
      return None;
    }
    Some(Self {
      segments: self.segments[..self.segments.len() - 1].to_vec(),
    })
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  pub fn last_segment(&self) -> &str {
    self.segments.last().map(String::as_str).unwrap_or_default()
  }

  /// True when `self` lies strictly below `other`.
  pub fn is_descendant_of(&self, other: &PathKey) -> bool {
    self.segments.len() > other.segments.len() && self.segments[..other.segments.len()] == other.segments[..]
  }

  /// The string prefix shared by every descendant, trailing slash included.
  pub fn child_prefix(&self) -> String {
    format!("{}/", self)
  }
}

impl fmt::Display for PathKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for segment in &self.segments {
      write!(f, "/{}", segment)?;
    }
    Ok(())
  }
}

impl FromStr for PathKey {
  type Err = PathError;

  fn from_str(s: &str) -> Result<Self> {
    Self::parse(s)
  }
}

impl Serialize for PathKey {
  fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for PathKey {
  fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Self::parse(&raw).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn parse_and_display_round_trip() {
    let path = PathKey::parse("/products/123").unwrap();
    assert_eq!(path.to_string(), "/products/123");
    assert_eq!(path.segments(), &["products".to_string(), "123".to_string()]);
  }

  #[test]
  fn parse_ignores_empty_segments() {
    let path = PathKey::parse("products//123/").unwrap();
    assert_eq!(path.to_string(), "/products/123");
  }

  #[test]
  fn parse_rejects_empty() {
    assert!(PathKey::parse("").is_err());
    assert!(PathKey::parse("///").is_err());
  }

  #[test]
  fn child_extends_path() {
    let path = PathKey::parse("/products").unwrap().child("123");
    assert_eq!(path.to_string(), "/products/123");
    assert_eq!(path.last_segment(), "123");
  }

  #[test]
  fn from_segments_validates() {
    let path = PathKey::from_segments(["products", "123"]).unwrap();
    assert_eq!(path.to_string(), "/products/123");
    assert!(PathKey::from_segments(["a", ""]).is_err());
    assert!(PathKey::from_segments(["a/b"]).is_err());
    assert!(PathKey::from_segments(Vec::<String>::new()).is_err());
  }

  #[test]
  fn descendant_is_strict() {
    let root = PathKey::parse("/a").unwrap();
    let child = PathKey::parse("/a/x").unwrap();
    let sibling = PathKey::parse("/ab/x").unwrap();

    assert!(child.is_descendant_of(&root));
    assert!(!root.is_descendant_of(&root));
    assert!(!sibling.is_descendant_of(&root));
  }

  #[test]
  fn child_prefix_has_trailing_slash() {
    let path = PathKey::parse("/a/b").unwrap();
    assert_eq!(path.child_prefix(), "/a/b/");
  }

  #[test]
  fn parent_walks_up() {
    let path = PathKey::parse("/a/b/c").unwrap();
    assert_eq!(path.parent().unwrap().to_string(), "/a/b");
    assert_eq!(PathKey::parse("/a").unwrap().parent(), None);
  }
}
