//! Streaming catalog ingestion and incremental search.
//!
//! A remote catalog is a gzip-compressed stream of newline-delimited JSON
//! entries. The worker fetches it, reassembles lines across chunk
//! boundaries, and bulk-loads entries through a [`store::PathStore`];
//! the guard makes ingestion a one-time operation per URL.

use thiserror::Error;

pub mod guard;
pub mod lines;
pub mod search;
pub mod worker;

pub use guard::{CatalogGuard, IngestRun, marker_path};
pub use lines::{LineAssembler, NdjsonDecoder};
pub use search::{DebouncedSearch, SearchGenerator};
pub use worker::{BATCH_SIZE, IngestCommand, IngestEvent, WorkerHandle, spawn_worker};

#[derive(Error, Debug)]
pub enum IngestError {
  /// Non-OK response or a body that ended unusably.
  #[error("transport: {0}")]
  Transport(String),

  #[error("http: {0}")]
  Http(#[from] reqwest::Error),

  /// The gzip stream could not be decompressed.
  #[error("decompress: {0}")]
  Decompress(#[from] std::io::Error),

  #[error("store: {0}")]
  Store(#[from] store::StoreError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
