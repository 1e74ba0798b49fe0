//! Store configuration and data directory resolution.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "fooddex.toml";
const DEFAULT_DB_NAME: &str = "app_store";
const DEFAULT_SQLITE_IDLE_SECS: u64 = 300;

/// Which engine backs the path store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
  /// Whole tree serialized as one JSON blob in a single file.
  FlatBlob,
  /// Transactional key-ordered store with native range scans.
  IndexedTree,
  /// Embedded SQLite with a lazily-managed connection.
  Relational,
}

impl BackendKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      BackendKind::FlatBlob => "flat-blob",
      BackendKind::IndexedTree => "indexed-tree",
      BackendKind::Relational => "relational",
    }
  }
}

impl std::str::FromStr for BackendKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "flat-blob" | "blob" => Ok(BackendKind::FlatBlob),
      "indexed-tree" | "tree" => Ok(BackendKind::IndexedTree),
      "relational" | "sqlite" => Ok(BackendKind::Relational),
      other => Err(format!("unknown backend: {other}")),
    }
  }
}

impl std::fmt::Display for BackendKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Configuration for opening a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub backend: BackendKind,
  pub data_dir: PathBuf,
  pub db_name: String,
  /// Seconds of inactivity before the relational backend closes its
  /// connection.
  pub sqlite_idle_secs: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      backend: BackendKind::IndexedTree,
      data_dir: default_data_dir(),
      db_name: DEFAULT_DB_NAME.to_string(),
      sqlite_idle_secs: DEFAULT_SQLITE_IDLE_SECS,
    }
  }
}

impl StoreConfig {
  /// Config rooted at an explicit directory, for tests and tools.
  pub fn at_dir(backend: BackendKind, data_dir: impl Into<PathBuf>) -> Self {
    Self {
      backend,
      data_dir: data_dir.into(),
      ..Self::default()
    }
  }

  /// Load `fooddex.toml` from `dir`, falling back to defaults when the file
  /// is absent or unreadable.
  pub fn load(dir: &Path) -> Self {
    let path = dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
      Ok(raw) => toml::from_str(&raw).unwrap_or_default(),
      Err(_) => Self::default(),
    }
  }

  pub fn sqlite_idle_timeout(&self) -> Duration {
    Duration::from_secs(self.sqlite_idle_secs)
  }
}

/// Default base path for fooddex data.
///
/// Respects the following environment variables (in order of precedence):
/// 1. DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("fooddex");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("fooddex")
}
