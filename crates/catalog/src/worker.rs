//! Catalog ingestion worker.
//!
//! The worker is an isolated task that shares nothing with its spawner:
//! commands in, events out, and termination only by aborting the task.
//! Errors never escape as panics or return values; they cross the boundary
//! as [`IngestEvent::Error`].

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fooddex_core::{CatalogEntry, WriteRecord};
use store::PathStore;

use crate::lines::NdjsonDecoder;
use crate::{IngestError, Result};

/// Write descriptors buffered before a `create_many` flush.
pub const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum IngestCommand {
  Start { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum IngestEvent {
  /// Cumulative count of entries written so far.
  Progress { count: u64 },
  Done,
  Error { message: String },
}

/// Handle to a spawned worker. Dropping it leaves the worker running;
/// `terminate` kills it outright (no cancellation message exists in the
/// protocol).
pub struct WorkerHandle {
  commands: mpsc::Sender<IngestCommand>,
  pub events: mpsc::Receiver<IngestEvent>,
  task: JoinHandle<()>,
}

impl WorkerHandle {
  pub async fn start(&self, url: impl Into<String>) -> Result<()> {
    self
      .commands
      .send(IngestCommand::Start { url: url.into() })
      .await
      .map_err(|_| IngestError::Transport("ingestion worker is gone".into()))
  }

  /// Split the handle into its command side and event stream.
  pub fn into_parts(self) -> (mpsc::Sender<IngestCommand>, mpsc::Receiver<IngestEvent>, JoinHandle<()>) {
    (self.commands, self.events, self.task)
  }

  pub fn terminate(self) {
    self.task.abort();
  }
}

/// Spawn an ingestion worker writing through `store`.
pub fn spawn_worker(store: Arc<dyn PathStore>) -> WorkerHandle {
  let (command_tx, mut command_rx) = mpsc::channel::<IngestCommand>(4);
  let (event_tx, event_rx) = mpsc::channel::<IngestEvent>(64);

  let task = tokio::spawn(async move {
    while let Some(IngestCommand::Start { url }) = command_rx.recv().await {
      if let Err(e) = run(store.clone(), &url, &event_tx).await {
        warn!(url = %url, error = %e, "catalog ingestion failed");
        let _ = event_tx.send(IngestEvent::Error { message: e.to_string() }).await;
      }
    }
  });

  WorkerHandle {
    commands: command_tx,
    events: event_rx,
    task,
  }
}

async fn run(store: Arc<dyn PathStore>, url: &str, events: &mpsc::Sender<IngestEvent>) -> Result<()> {
  info!(url, "catalog ingestion starting");

  let response = reqwest::Client::new().get(url).send().await?;
  if !response.status().is_success() {
    return Err(IngestError::Transport(format!("HTTP {}", response.status())));
  }

  let mut stream = response.bytes_stream();
  let mut decoder = NdjsonDecoder::new();
  let mut batch: Vec<WriteRecord> = Vec::with_capacity(BATCH_SIZE);
  let mut count: u64 = 0;
  let mut skipped: u64 = 0;

  while let Some(chunk) = stream.next().await {
    let chunk = chunk?;
    for line in decoder.push(&chunk)? {
      collect_line(&line, &mut batch, &mut skipped);
      if batch.len() >= BATCH_SIZE {
        flush(&*store, &mut batch, &mut count, events).await?;
      }
    }
  }

  for line in decoder.finish()? {
    collect_line(&line, &mut batch, &mut skipped);
  }
  if !batch.is_empty() {
    flush(&*store, &mut batch, &mut count, events).await?;
  }

  if skipped > 0 {
    warn!(url, skipped, "skipped malformed catalog lines");
  }
  info!(url, count, "catalog ingestion complete");
  let _ = events.send(IngestEvent::Done).await;
  Ok(())
}

/// Parse one line into a write descriptor. Malformed lines are skipped and
/// counted, never fatal to the stream.
fn collect_line(line: &[u8], batch: &mut Vec<WriteRecord>, skipped: &mut u64) {
  let parsed = std::str::from_utf8(line)
    .map_err(|e| e.to_string())
    .and_then(|text| serde_json::from_str::<CatalogEntry>(text).map_err(|e| e.to_string()));

  match parsed {
    Ok(entry) if !entry.code.is_empty() => {
      let path = entry.product_path();
      match serde_json::to_value(&entry) {
        Ok(data) => batch.push(WriteRecord::new(path, data)),
        Err(e) => {
          *skipped += 1;
          warn!(error = %e, "failed to serialize catalog entry");
        }
      }
    }
    Ok(_) => {
      *skipped += 1;
      warn!("skipping catalog line with empty code");
    }
    Err(e) => {
      *skipped += 1;
      warn!(error = %e, "skipping malformed catalog line");
    }
  }
}

async fn flush(
  store: &dyn PathStore,
  batch: &mut Vec<WriteRecord>,
  count: &mut u64,
  events: &mpsc::Sender<IngestEvent>,
) -> Result<()> {
  let records = std::mem::take(batch);
  let written = records.len() as u64;
  store.create_many(records, false).await?;

  *count += written;
  debug!(count = *count, "flushed catalog batch");
  let _ = events.send(IngestEvent::Progress { count: *count }).await;
  Ok(())
}
