//! Indexed tree backend: a transactional key-ordered store with native
//! range scans.
//!
//! One table maps `path -> (timestamp, payload)`. The path ordering of the
//! table doubles as the prefix index, so descendant collection and search
//! are cursor walks over the half-open range `[path + "/", path + "/\u{ffff}")`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, trace, warn};

use fooddex_core::{PathKey, StoreConfig, next_timestamp};

use crate::query::SearchQuery;
use crate::{PathStore, Result, SEARCH_BUFFER, StoreError, children_object, merge_top_level, prepare_record};

const RECORDS: TableDefinition<&str, (i64, &str)> = TableDefinition::new("records");

pub struct IndexedTreeBackend {
  file: PathBuf,
  // Shared in-flight open: concurrent first calls race to one initialization.
  db: OnceCell<Arc<Database>>,
}

impl IndexedTreeBackend {
  pub fn open(config: &StoreConfig) -> Result<Self> {
    std::fs::create_dir_all(&config.data_dir)?;
    Ok(Self {
      file: config.data_dir.join(format!("{}.redb", config.db_name)),
      db: OnceCell::new(),
    })
  }

  async fn db(&self) -> Result<Arc<Database>> {
    self
      .db
      .get_or_try_init(|| async {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
          debug!(file = %file.display(), "opening tree database");
          let db = Database::create(&file)?;
          let txn = db.begin_write()?;
          {
            txn.open_table(RECORDS)?;
          }
          txn.commit()?;
          Ok::<_, StoreError>(Arc::new(db))
        })
        .await
        .map_err(join_error)?
      })
      .await
      .cloned()
  }
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
  StoreError::Connection(format!("storage task failed: {e}"))
}

/// Collect every record in the descendant range of `prefix`, newest first.
fn collect_descendants(db: &Database, prefix: &str) -> Result<Vec<(String, Value)>> {
  let txn = db.begin_read()?;
  let table = txn.open_table(RECORDS)?;
  let end = format!("{prefix}\u{ffff}");

  let mut rows: Vec<(i64, String, Value)> = Vec::new();
  for item in table.range::<&str>(prefix..end.as_str())? {
    let (key, value) = item?;
    let (timestamp, json) = value.value();
    rows.push((timestamp, key.value().to_string(), serde_json::from_str(json)?));
  }

  rows.sort_by(|a, b| b.0.cmp(&a.0));
  Ok(rows.into_iter().map(|(_, path, data)| (path, data)).collect())
}

#[async_trait]
impl PathStore for IndexedTreeBackend {
  async fn get(&self, path: &PathKey) -> Result<Value> {
    let db = self.db().await?;
    let path_str = path.to_string();
    let prefix = path.child_prefix();

    tokio::task::spawn_blocking(move || {
      {
        let txn = db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        if let Some(guard) = table.get(path_str.as_str())? {
          let (_, json) = guard.value();
          return Ok(serde_json::from_str(json)?);
        }
      }

      let rows = collect_descendants(&db, &prefix)?;
      if rows.is_empty() {
        return Err(StoreError::NoDataFound(path_str));
      }
      Ok(children_object(rows))
    })
    .await
    .map_err(join_error)?
  }

  async fn get_all(&self, path: &PathKey) -> Result<Vec<Value>> {
    let db = self.db().await?;
    let path_str = path.to_string();
    let prefix = path.child_prefix();

    tokio::task::spawn_blocking(move || {
      let rows = collect_descendants(&db, &prefix)?;
      if rows.is_empty() {
        return Err(StoreError::NoDataFound(path_str));
      }
      Ok(rows.into_iter().map(|(_, data)| data).collect())
    })
    .await
    .map_err(join_error)?
  }

  async fn create(&self, path: &PathKey, data: Value, generate_id: bool) -> Result<Value> {
    let db = self.db().await?;
    let (full_path, new_data) = prepare_record(path, data, generate_id)?;
    let full_path = full_path.to_string();
    let timestamp = next_timestamp();
    let json = serde_json::to_string(&new_data)?;

    tokio::task::spawn_blocking(move || {
      let txn = db.begin_write()?;
      {
        let mut table = txn.open_table(RECORDS)?;
        table.insert(full_path.as_str(), (timestamp, json.as_str()))?;
      }
      txn.commit()?;
      trace!(path = %full_path, "tree create");
      Ok(new_data)
    })
    .await
    .map_err(join_error)?
  }

  async fn update(&self, path: &PathKey, patch: Value) -> Result<Value> {
    let db = self.db().await?;
    let path_str = path.to_string();
    let timestamp = next_timestamp();

    tokio::task::spawn_blocking(move || {
      let txn = db.begin_write()?;
      let merged;
      {
        let mut table = txn.open_table(RECORDS)?;
        let existing: Value = match table.get(path_str.as_str())? {
          Some(guard) => serde_json::from_str(guard.value().1)?,
          None => return Err(StoreError::NoDataFound(path_str)),
        };

        merged = merge_top_level(existing, patch)?;
        let json = serde_json::to_string(&merged)?;
        table.insert(path_str.as_str(), (timestamp, json.as_str()))?;
      }
      txn.commit()?;
      Ok(merged)
    })
    .await
    .map_err(join_error)?
  }

  async fn delete(&self, path: &PathKey) -> Result<()> {
    let db = self.db().await?;
    let path_str = path.to_string();

    tokio::task::spawn_blocking(move || {
      let txn = db.begin_write()?;
      {
        let mut table = txn.open_table(RECORDS)?;
        table.remove(path_str.as_str())?;
      }
      txn.commit()?;
      Ok(())
    })
    .await
    .map_err(join_error)?
  }

  async fn search(&self, path: &PathKey, query: SearchQuery) -> Result<mpsc::Receiver<Value>> {
    let db = self.db().await?;
    let prefix = path.child_prefix();
    let (tx, rx) = mpsc::channel(SEARCH_BUFFER);

    tokio::task::spawn_blocking(move || {
      let scan = || -> Result<()> {
        let txn = db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let end = format!("{prefix}\u{ffff}");

        for item in table.range::<&str>(prefix.as_str()..end.as_str())? {
          let (_, value) = item?;
          let data: Value = serde_json::from_str(value.value().1)?;
          if query.matches(&data) && tx.blocking_send(data).is_err() {
            // receiver dropped: consumer cancelled the scan
            break;
          }
        }
        Ok(())
      };

      if let Err(e) = scan() {
        warn!(error = %e, "tree search scan failed");
      }
    });

    Ok(rx)
  }
}
