//! Write descriptors and record timestamps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::path::PathKey;

/// One pending write: a destination path and an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRecord {
  pub path: PathKey,
  pub data: Value,
}

impl WriteRecord {
  pub fn new(path: PathKey, data: Value) -> Self {
    Self { path, data }
  }
}

static CLOCK: AtomicI64 = AtomicI64::new(0);

/// Millisecond timestamp for a stored record.
///
/// Strictly increasing across the process: two records written in the same
/// wall-clock millisecond still order deterministically.
pub fn next_timestamp() -> i64 {
  let wall = chrono::Utc::now().timestamp_millis();
  let mut prev = CLOCK.load(Ordering::Relaxed);
  loop {
    let next = wall.max(prev + 1);
    match CLOCK.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
      Ok(_) => return next,
      Err(observed) => prev = observed,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_strictly_increase() {
    let a = next_timestamp();
    let b = next_timestamp();
    let c = next_timestamp();
    assert!(a < b);
    assert!(b < c);
  }

  #[test]
  fn timestamps_track_wall_clock() {
    let now = chrono::Utc::now().timestamp_millis();
    let ts = next_timestamp();
    assert!(ts >= now);
  }
}
