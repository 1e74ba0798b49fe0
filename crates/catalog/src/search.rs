//! Incremental catalog search.
//!
//! `SearchGenerator` adapts the store's raw value stream to typed entries,
//! yielded as the backend produces them so a caller can stop consuming
//! mid-scan. `DebouncedSearch` coalesces rapid successive queries and
//! discards superseded in-flight scans.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use fooddex_core::{CatalogEntry, PathKey};
use store::{PathStore, SearchQuery};

const DEFAULT_DEBOUNCE_MS: u64 = 250;
const RESULT_BUFFER: usize = 32;

#[derive(Clone)]
pub struct SearchGenerator {
  store: Arc<dyn PathStore>,
}

impl SearchGenerator {
  pub fn new(store: Arc<dyn PathStore>) -> Self {
    Self { store }
  }

  /// Stream entries under `root` matching `query`. Dropping the receiver
  /// cancels the underlying scan.
  pub async fn search(&self, root: &PathKey, query: SearchQuery) -> store::Result<mpsc::Receiver<CatalogEntry>> {
    let mut raw = self.store.search(root, query).await?;
    let (tx, rx) = mpsc::channel(RESULT_BUFFER);

    tokio::spawn(async move {
      while let Some(value) = raw.recv().await {
        match serde_json::from_value::<CatalogEntry>(value) {
          Ok(entry) => {
            if tx.send(entry).await.is_err() {
              break;
            }
          }
          Err(e) => trace!(error = %e, "skipping non-catalog record in search range"),
        }
      }
    });

    Ok(rx)
  }
}

/// Debounce layer over [`SearchGenerator`]: each new query supersedes the
/// previous one, cancelling it whether it was still waiting out the window
/// or already scanning.
pub struct DebouncedSearch {
  generator: SearchGenerator,
  window: Duration,
  current: Mutex<Option<CancellationToken>>,
}

impl DebouncedSearch {
  pub fn new(store: Arc<dyn PathStore>) -> Self {
    Self::with_window(store, Duration::from_millis(DEFAULT_DEBOUNCE_MS))
  }

  pub fn with_window(store: Arc<dyn PathStore>, window: Duration) -> Self {
    Self {
      generator: SearchGenerator::new(store),
      window,
      current: Mutex::new(None),
    }
  }

  /// Schedule a query. Results arrive on the returned channel once the
  /// debounce window passes without a newer query; a superseded query's
  /// channel simply closes. A failed scan also closes the channel without
  /// yielding — absence of results, not an error, is what the caller sees.
  pub async fn query(&self, root: PathKey, query: SearchQuery) -> mpsc::Receiver<CatalogEntry> {
    let token = CancellationToken::new();
    {
      let mut current = self.current.lock().await;
      if let Some(previous) = current.replace(token.clone()) {
        previous.cancel();
      }
    }

    let (tx, rx) = mpsc::channel(RESULT_BUFFER);
    let generator = self.generator.clone();
    let window = self.window;

    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(window) => {}
      }

      let mut results = match generator.search(&root, query).await {
        Ok(results) => results,
        Err(e) => {
          debug!(error = %e, "debounced search failed");
          return;
        }
      };

      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          entry = results.recv() => match entry {
            Some(entry) => {
              if tx.send(entry).await.is_err() {
                break;
              }
            }
            None => break,
          },
        }
      }
    });

    rx
  }
}
