//! One-time ingestion guard.
//!
//! A sentinel record per catalog URL gates re-download: the marker is
//! written only after the worker reports `Done`, so a terminated or failed
//! run leaves no marker and the next attempt re-ingests from scratch.

use std::sync::Arc;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use fooddex_core::{PathKey, SCHEMA_VERSION};
use store::{PathStore, StoreError};

use crate::worker::{IngestEvent, spawn_worker};
use crate::{IngestError, Result};

const MARKER_ROOT: &str = "/local/app-data/catalog";

/// Marker path for a catalog URL: a digest keeps URLs of any shape one
/// segment long.
pub fn marker_path(url: &str) -> PathKey {
  let digest = hex::encode(Sha256::digest(url.as_bytes()));
  PathKey::parse(MARKER_ROOT)
    .expect("marker root is a valid path")
    .child(&digest[..16])
}

fn marker_value() -> Value {
  json!({ "exists": true, "schema_version": SCHEMA_VERSION })
}

fn marker_is_current(value: &Value) -> bool {
  value.get("exists").and_then(Value::as_bool) == Some(true)
    && value.get("schema_version").and_then(Value::as_u64) == Some(u64::from(SCHEMA_VERSION))
}

/// A spawned ingestion run. Dropping it detaches the run (the marker still
/// lands on `Done`); `terminate` kills the worker outright, leaving the
/// store partially written and unmarked — safe to retry, not safe to
/// assume complete.
pub struct IngestRun {
  pub events: mpsc::Receiver<IngestEvent>,
  worker: JoinHandle<()>,
  relay: JoinHandle<()>,
}

impl IngestRun {
  pub fn terminate(self) {
    self.worker.abort();
    self.relay.abort();
  }
}

pub struct CatalogGuard {
  store: Arc<dyn PathStore>,
  // Serializes check-and-spawn so two concurrent calls cannot both race
  // past an absent marker.
  claim: Mutex<()>,
}

impl CatalogGuard {
  pub fn new(store: Arc<dyn PathStore>) -> Self {
    Self {
      store,
      claim: Mutex::new(()),
    }
  }

  /// Start ingesting `url` unless a current marker already exists.
  ///
  /// Returns `None` when the catalog is already loaded (zero fetches), or
  /// the running ingestion's event stream otherwise. The marker is written
  /// by an internal relay as soon as `Done` is observed, then forwarded.
  pub async fn ensure(&self, url: &str) -> Result<Option<IngestRun>> {
    let marker = marker_path(url);
    let _claim = self.claim.lock().await;

    match self.store.get(&marker).await {
      Ok(value) if marker_is_current(&value) => {
        debug!(url, "catalog already ingested, skipping");
        return Ok(None);
      }
      Ok(_) => {
        info!(url, "stale catalog marker, re-ingesting");
      }
      Err(StoreError::NoDataFound(_)) => {}
      Err(e) => return Err(IngestError::Store(e)),
    }

    let handle = spawn_worker(self.store.clone());
    handle.start(url).await?;
    let (_commands, mut events, worker) = handle.into_parts();

    let (out_tx, out_rx) = mpsc::channel(64);
    let store = self.store.clone();
    let relay = tokio::spawn(async move {
      while let Some(event) = events.recv().await {
        let done = matches!(event, IngestEvent::Done);
        if done {
          if let Err(e) = store.create(&marker, marker_value(), false).await {
            error!(error = %e, "failed to write ingestion marker");
          }
        }
        // the caller may have stopped listening; the marker write above
        // must still happen, so a failed forward does not end the loop
        let _ = out_tx.send(event).await;
        if done {
          break;
        }
      }
    });

    Ok(Some(IngestRun {
      events: out_rx,
      worker,
      relay,
    }))
  }
}
