//! Path-addressed record storage over interchangeable engines.
//!
//! Every backend exposes the same CRUD + prefix-search contract; callers
//! pick an engine through [`StoreConfig`] and hold the store as an explicit
//! `Arc<dyn PathStore>` handle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use fooddex_core::{PathError, PathKey, StoreConfig, WriteRecord};

pub mod blob;
pub mod query;
pub mod sqlite;
pub mod tree;

pub use blob::FlatBlobBackend;
pub use query::{MatchTerm, SearchQuery};
pub use sqlite::RelationalBackend;
pub use tree::IndexedTreeBackend;

/// Buffered matches per in-flight search before the producer blocks.
pub(crate) const SEARCH_BUFFER: usize = 32;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("no data found at {0}")]
  NoDataFound(String),

  #[error("search is not supported by the {0} backend")]
  SearchUnsupported(&'static str),

  #[error("cannot {0} a non-object payload")]
  NonObjectPayload(&'static str),

  #[error("path: {0}")]
  Path(#[from] PathError),

  #[error("tree backend: {0}")]
  Tree(#[from] redb::Error),

  #[error("relational backend: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("connection: {0}")]
  Connection(String),

  #[error("serialization: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for StoreError {
  fn from(e: redb::DatabaseError) -> Self {
    StoreError::Tree(e.into())
  }
}

impl From<redb::TransactionError> for StoreError {
  fn from(e: redb::TransactionError) -> Self {
    StoreError::Tree(e.into())
  }
}

impl From<redb::TableError> for StoreError {
  fn from(e: redb::TableError) -> Self {
    StoreError::Tree(e.into())
  }
}

impl From<redb::StorageError> for StoreError {
  fn from(e: redb::StorageError) -> Self {
    StoreError::Tree(e.into())
  }
}

impl From<redb::CommitError> for StoreError {
  fn from(e: redb::CommitError) -> Self {
    StoreError::Tree(e.into())
  }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The uniform operation set over a path-addressed record store.
#[async_trait]
pub trait PathStore: Send + Sync {
  /// Data at the exact path, or the descendants of `path` keyed by their
  /// embedded id (newest first). Fails with `NoDataFound` when both miss.
  async fn get(&self, path: &PathKey) -> Result<Value>;

  /// Every descendant of `path`, newest first. Fails with `NoDataFound`
  /// when there are none.
  async fn get_all(&self, path: &PathKey) -> Result<Vec<Value>>;

  /// Store `data`. With `generate_id` a fresh id is minted, appended to the
  /// path as a new segment, and injected into the payload; without it the
  /// record lands exactly at `path`.
  async fn create(&self, path: &PathKey, data: Value, generate_id: bool) -> Result<Value>;

  /// Sequential `create` per descriptor. Not atomic: a failure partway
  /// leaves the prior records committed.
  async fn create_many(&self, records: Vec<WriteRecord>, generate_id: bool) -> Result<()> {
    for record in records {
      self.create(&record.path, record.data, generate_id).await?;
    }
    Ok(())
  }

  /// Shallow-merge `patch` over the record at the exact path and rewrite it
  /// with a fresh timestamp. Fails with `NoDataFound` when absent.
  async fn update(&self, path: &PathKey, patch: Value) -> Result<Value>;

  /// Remove the record at the exact path. Tolerant of absence.
  async fn delete(&self, path: &PathKey) -> Result<()>;

  /// Stream every descendant of `path` matching `query`, incrementally.
  /// Dropping the receiver cancels the scan.
  async fn search(&self, path: &PathKey, query: SearchQuery) -> Result<mpsc::Receiver<Value>>;
}

/// Open the backend selected by `config`.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn PathStore>> {
  Ok(match config.backend {
    fooddex_core::BackendKind::FlatBlob => Arc::new(FlatBlobBackend::open(config)?),
    fooddex_core::BackendKind::IndexedTree => Arc::new(IndexedTreeBackend::open(config)?),
    fooddex_core::BackendKind::Relational => Arc::new(RelationalBackend::open(config)?),
  })
}

/// Resolve the final path and payload for a `create`.
pub(crate) fn prepare_record(path: &PathKey, data: Value, generate_id: bool) -> Result<(PathKey, Value)> {
  if !generate_id {
    return Ok((path.clone(), data));
  }

  let id = Uuid::new_v4().to_string();
  let mut data = data;
  match data.as_object_mut() {
    Some(map) => {
      map.insert("id".to_string(), Value::String(id.clone()));
    }
    None => return Err(StoreError::NonObjectPayload("assign an id to")),
  }
  Ok((path.child(&id), data))
}

/// Shallow merge: top-level keys of `patch` replace those of `existing`;
/// nested structures are swapped wholesale, never merged.
pub(crate) fn merge_top_level(existing: Value, patch: Value) -> Result<Value> {
  let mut base = match existing {
    Value::Object(map) => map,
    _ => return Err(StoreError::NonObjectPayload("merge into")),
  };
  let patch = match patch {
    Value::Object(map) => map,
    _ => return Err(StoreError::NonObjectPayload("merge")),
  };

  for (key, value) in patch {
    base.insert(key, value);
  }
  Ok(Value::Object(base))
}

/// Map key for a collected child record: its embedded id, or the terminal
/// path segment when the payload carries none.
pub(crate) fn record_key(data: &Value, path: &str) -> String {
  data
    .get("id")
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path).to_string())
}

/// Assemble `get`'s children form from rows already ordered newest-first.
pub(crate) fn children_object(rows: Vec<(String, Value)>) -> Value {
  let mut map = serde_json::Map::new();
  for (path, data) in rows {
    map.insert(record_key(&data, &path), data);
  }
  Value::Object(map)
}
