//! Flat blob backend: the whole tree as one serialized JSON document.
//!
//! The backing medium holds a single value per key, so every operation is a
//! synchronous read-modify-write of the entire blob: deserialize the root,
//! walk nested object levels by path segment, mutate, reserialize. Writes
//! cost O(total stored size); there is no range scan, so `search` is not
//! supported here.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::trace;

use fooddex_core::{PathKey, StoreConfig};

use crate::query::SearchQuery;
use crate::{PathStore, Result, StoreError, prepare_record};

pub struct FlatBlobBackend {
  file: PathBuf,
  // Serializes the read-modify-write cycle; the medium has no transactions.
  lock: Mutex<()>,
}

impl FlatBlobBackend {
  pub fn open(config: &StoreConfig) -> Result<Self> {
    std::fs::create_dir_all(&config.data_dir)?;
    Ok(Self {
      file: config.data_dir.join(format!("{}.json", config.db_name)),
      lock: Mutex::new(()),
    })
  }

  fn load_root(&self) -> Result<Map<String, Value>> {
    let raw = match std::fs::read_to_string(&self.file) {
      Ok(raw) => raw,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
      Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&raw)?)
  }

  fn store_root(&self, root: &Map<String, Value>) -> Result<()> {
    std::fs::write(&self.file, serde_json::to_string(root)?)?;
    Ok(())
  }

  /// Walk to the node at `path`, or `None` if any level is missing.
  fn walk<'a>(root: &'a Map<String, Value>, path: &PathKey) -> Option<&'a Value> {
    let mut segments = path.segments().iter();
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
      current = current.get(segment)?;
    }
    Some(current)
  }

  /// Walk to the node at `path`, creating object levels as needed.
  fn walk_mut<'a>(root: &'a mut Map<String, Value>, path: &PathKey) -> &'a mut Map<String, Value> {
    let mut current = root;
    for segment in path.segments() {
      let slot = current
        .entry(segment.clone())
        .or_insert_with(|| Value::Object(Map::new()));
      if !slot.is_object() {
        *slot = Value::Object(Map::new());
      }
      current = slot.as_object_mut().expect("slot coerced to object");
    }
    current
  }
}

#[async_trait]
impl PathStore for FlatBlobBackend {
  async fn get(&self, path: &PathKey) -> Result<Value> {
    let _guard = self.lock.lock().expect("blob lock poisoned");
    let root = self.load_root()?;
    Self::walk(&root, path)
      .cloned()
      .ok_or_else(|| StoreError::NoDataFound(path.to_string()))
  }

  async fn get_all(&self, path: &PathKey) -> Result<Vec<Value>> {
    let _guard = self.lock.lock().expect("blob lock poisoned");
    let root = self.load_root()?;
    let node = Self::walk(&root, path).ok_or_else(|| StoreError::NoDataFound(path.to_string()))?;

    let children = match node.as_object() {
      Some(map) if !map.is_empty() => map.values().cloned().collect(),
      _ => return Err(StoreError::NoDataFound(path.to_string())),
    };
    Ok(children)
  }

  async fn create(&self, path: &PathKey, data: Value, generate_id: bool) -> Result<Value> {
    let _guard = self.lock.lock().expect("blob lock poisoned");
    let (full_path, new_data) = prepare_record(path, data, generate_id)?;

    let mut root = self.load_root()?;
    match full_path.parent() {
      Some(parent_path) => {
        let parent = Self::walk_mut(&mut root, &parent_path);
        parent.insert(full_path.last_segment().to_string(), new_data.clone());
      }
      None => {
        root.insert(full_path.last_segment().to_string(), new_data.clone());
      }
    }
    self.store_root(&root)?;

    trace!(path = %full_path, "blob create");
    Ok(new_data)
  }

  async fn update(&self, path: &PathKey, patch: Value) -> Result<Value> {
    let _guard = self.lock.lock().expect("blob lock poisoned");
    let mut root = self.load_root()?;

    let existing = Self::walk(&root, path)
      .cloned()
      .ok_or_else(|| StoreError::NoDataFound(path.to_string()))?;
    let merged = crate::merge_top_level(existing, patch)?;

    match path.parent() {
      Some(parent_path) => {
        let parent = Self::walk_mut(&mut root, &parent_path);
        parent.insert(path.last_segment().to_string(), merged.clone());
      }
      None => {
        root.insert(path.last_segment().to_string(), merged.clone());
      }
    }
    self.store_root(&root)?;

    Ok(merged)
  }

  async fn delete(&self, path: &PathKey) -> Result<()> {
    let _guard = self.lock.lock().expect("blob lock poisoned");
    let mut root = self.load_root()?;

    let removed = match path.parent() {
      Some(parent_path) => match Self::walk(&root, &parent_path) {
        Some(_) => {
          let parent = Self::walk_mut(&mut root, &parent_path);
          parent.remove(path.last_segment()).is_some()
        }
        None => false,
      },
      None => root.remove(path.last_segment()).is_some(),
    };

    if removed {
      self.store_root(&root)?;
    }
    Ok(())
  }

  async fn search(&self, _path: &PathKey, _query: SearchQuery) -> Result<mpsc::Receiver<Value>> {
    Err(StoreError::SearchUnsupported("flat-blob"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use fooddex_core::BackendKind;
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tempfile::TempDir;

  fn backend(dir: &TempDir) -> FlatBlobBackend {
    FlatBlobBackend::open(&StoreConfig::at_dir(BackendKind::FlatBlob, dir.path())).unwrap()
  }

  #[tokio::test]
  async fn create_then_get_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/items").unwrap();

    let created = store.create(&path, json!({"name": "Test Item", "value": 42}), true).await.unwrap();
    let id = created.get("id").and_then(Value::as_str).unwrap().to_string();

    let fetched = store.get(&path.child(&id)).await.unwrap();
    assert_eq!(fetched, created);
  }

  #[tokio::test]
  async fn get_of_parent_returns_children_keyed_by_id() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/products").unwrap();

    let a = store.create(&path, json!({"name": "Product 1"}), true).await.unwrap();
    let b = store.create(&path, json!({"name": "Product 2"}), true).await.unwrap();

    let children = store.get(&path).await.unwrap();
    let map = children.as_object().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map[a["id"].as_str().unwrap()], a);
    assert_eq!(map[b["id"].as_str().unwrap()], b);
  }

  #[tokio::test]
  async fn update_merges_top_level_only() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/items").unwrap();

    let created = store
      .create(&path, json!({"a": 1, "nested": {"x": 1, "y": 2}}), true)
      .await
      .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    let item_path = path.child(&id);

    let updated = store.update(&item_path, json!({"a": 2})).await.unwrap();
    assert_eq!(updated["a"], json!(2));
    assert_eq!(updated["nested"], json!({"x": 1, "y": 2}));

    let replaced = store.update(&item_path, json!({"nested": {"x": 9}})).await.unwrap();
    assert_eq!(replaced["nested"], json!({"x": 9}));
  }

  #[tokio::test]
  async fn update_missing_path_fails() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/nothing/here").unwrap();

    assert!(matches!(
      store.update(&path, json!({"a": 1})).await,
      Err(StoreError::NoDataFound(_))
    ));
  }

  #[tokio::test]
  async fn delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/items").unwrap();

    let created = store.create(&path, json!({"name": "x"}), true).await.unwrap();
    let item_path = path.child(created["id"].as_str().unwrap());

    store.delete(&item_path).await.unwrap();
    store.delete(&item_path).await.unwrap();
    assert!(matches!(store.get(&item_path).await, Err(StoreError::NoDataFound(_))));
  }

  #[tokio::test]
  async fn create_without_id_writes_exact_path() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/local/app-data/marker").unwrap();

    store.create(&path, json!({"exists": true}), false).await.unwrap();
    let fetched = store.get(&path).await.unwrap();
    assert_eq!(fetched, json!({"exists": true}));
  }

  #[tokio::test]
  async fn search_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let store = backend(&dir);
    let path = PathKey::parse("/products").unwrap();

    assert!(matches!(
      store.search(&path, SearchQuery::fuzzy("name", "x")).await,
      Err(StoreError::SearchUnsupported("flat-blob"))
    ));
  }

  #[tokio::test]
  async fn blob_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    let path = PathKey::parse("/items").unwrap();

    let created = {
      let store = backend(&dir);
      store.create(&path, json!({"name": "keep"}), true).await.unwrap()
    };

    let reopened = backend(&dir);
    let fetched = reopened.get(&path.child(created["id"].as_str().unwrap())).await.unwrap();
    assert_eq!(fetched, created);
  }
}
