//! Catalog domain records.
//!
//! The feed alternates between a verbose field naming (`name`, `brand`,
//! `macros.kcal`) and a compact one (`n`, `b`, `k`). Deserialization accepts
//! both; records are always persisted in the canonical verbose form.

use serde::{Deserialize, Serialize};

use crate::path::PathKey;

/// Version of the canonical on-disk schema. Bumping it invalidates existing
/// ingestion markers, forcing a full re-ingest of the catalog.
pub const SCHEMA_VERSION: u32 = 1;

/// Per-100g macro values for a catalog entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Macros {
  #[serde(alias = "k", skip_serializing_if = "Option::is_none")]
  pub kcal: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub serving_size: Option<String>,
  #[serde(alias = "p", skip_serializing_if = "Option::is_none")]
  pub protein: Option<f64>,
  #[serde(alias = "f", skip_serializing_if = "Option::is_none")]
  pub fat: Option<f64>,
  #[serde(alias = "c", skip_serializing_if = "Option::is_none")]
  pub carbs: Option<f64>,
}

/// One product in the catalog, keyed by its stable `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub code: String,
  #[serde(alias = "n", skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(alias = "b", skip_serializing_if = "Option::is_none")]
  pub brand: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub creator: Option<String>,
  #[serde(alias = "mc", skip_serializing_if = "Option::is_none")]
  pub main_category: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub categories: Vec<String>,
  #[serde(alias = "m", skip_serializing_if = "Option::is_none")]
  pub macros: Option<Macros>,
}

impl CatalogEntry {
  /// The storage path for this entry: `/products/{code}`.
  pub fn product_path(&self) -> PathKey {
    PathKey::parse("/products").expect("constant path is valid").child(&self.code)
  }
}
