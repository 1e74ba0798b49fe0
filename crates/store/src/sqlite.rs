//! Relational backend: embedded SQLite with a lazily-managed connection.
//!
//! The connection lives on a dedicated thread that owns the `rusqlite`
//! handle; every operation is one request/response round trip over a
//! command channel. The thread is spawned on first use (one in-flight spawn
//! at a time) and exits after `idle_timeout` without traffic, closing the
//! connection; the next operation transparently respawns it.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use fooddex_core::{PathKey, StoreConfig, next_timestamp};

use crate::query::SearchQuery;
use crate::{PathStore, Result, SEARCH_BUFFER, StoreError, children_object, merge_top_level, prepare_record};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    path TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_path ON records(path);
"#;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
  Get {
    path: String,
    prefix: String,
    reply: Reply<Value>,
  },
  GetAll {
    path: String,
    prefix: String,
    reply: Reply<Vec<Value>>,
  },
  Put {
    path: String,
    json: String,
    timestamp: i64,
    reply: Reply<()>,
  },
  Update {
    path: String,
    patch: Value,
    timestamp: i64,
    reply: Reply<Value>,
  },
  Delete {
    path: String,
    reply: Reply<()>,
  },
  Search {
    prefix: String,
    query: SearchQuery,
    matches: mpsc::Sender<Value>,
  },
}

pub struct RelationalBackend {
  file: PathBuf,
  idle_timeout: Duration,
  // Guards the single in-flight spawn of the connection thread.
  sender: Mutex<Option<Sender<Command>>>,
}

impl RelationalBackend {
  pub fn open(config: &StoreConfig) -> Result<Self> {
    std::fs::create_dir_all(&config.data_dir)?;
    Ok(Self {
      file: config.data_dir.join(format!("{}.db", config.db_name)),
      idle_timeout: config.sqlite_idle_timeout(),
      sender: Mutex::new(None),
    })
  }

  /// Hand a command to the connection thread, spawning it if the previous
  /// one exited on idle timeout (or was never started).
  async fn send(&self, command: Command) -> Result<()> {
    let mut guard = self.sender.lock().await;
    let mut command = command;

    if let Some(tx) = guard.as_ref() {
      match tx.send(command) {
        Ok(()) => return Ok(()),
        Err(crossbeam_channel::SendError(returned)) => {
          // thread idled out since the last call
          command = returned;
          *guard = None;
        }
      }
    }

    let (tx, rx) = unbounded();
    let file = self.file.clone();
    let idle_timeout = self.idle_timeout;
    std::thread::Builder::new()
      .name("fooddex-sqlite".into())
      .spawn(move || connection_thread(file, rx, idle_timeout))
      .map_err(|e| StoreError::Connection(format!("failed to spawn connection thread: {e}")))?;

    tx.send(command)
      .map_err(|_| StoreError::Connection("connection thread exited during startup".into()))?;
    *guard = Some(tx);
    Ok(())
  }

  async fn round_trip<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self.send(build(reply)).await?;
    rx.await
      .map_err(|_| StoreError::Connection("connection thread dropped the reply".into()))?
  }
}

#[async_trait]
impl PathStore for RelationalBackend {
  async fn get(&self, path: &PathKey) -> Result<Value> {
    let path_str = path.to_string();
    let prefix = path.child_prefix();
    self
      .round_trip(|reply| Command::Get {
        path: path_str,
        prefix,
        reply,
      })
      .await
  }

  async fn get_all(&self, path: &PathKey) -> Result<Vec<Value>> {
    let path_str = path.to_string();
    let prefix = path.child_prefix();
    self
      .round_trip(|reply| Command::GetAll {
        path: path_str,
        prefix,
        reply,
      })
      .await
  }

  async fn create(&self, path: &PathKey, data: Value, generate_id: bool) -> Result<Value> {
    let (full_path, new_data) = prepare_record(path, data, generate_id)?;
    let json = serde_json::to_string(&new_data)?;
    let timestamp = next_timestamp();
    self
      .round_trip(|reply| Command::Put {
        path: full_path.to_string(),
        json,
        timestamp,
        reply,
      })
      .await?;
    Ok(new_data)
  }

  async fn update(&self, path: &PathKey, patch: Value) -> Result<Value> {
    let path_str = path.to_string();
    let timestamp = next_timestamp();
    self
      .round_trip(|reply| Command::Update {
        path: path_str,
        patch,
        timestamp,
        reply,
      })
      .await
  }

  async fn delete(&self, path: &PathKey) -> Result<()> {
    let path_str = path.to_string();
    self.round_trip(|reply| Command::Delete { path: path_str, reply }).await
  }

  async fn search(&self, path: &PathKey, query: SearchQuery) -> Result<mpsc::Receiver<Value>> {
    let (tx, rx) = mpsc::channel(SEARCH_BUFFER);
    self
      .send(Command::Search {
        prefix: path.child_prefix(),
        query,
        matches: tx,
      })
      .await?;
    Ok(rx)
  }
}

// ---------------------------------------------------------------------------
// Connection thread
// ---------------------------------------------------------------------------

fn connection_thread(file: PathBuf, rx: Receiver<Command>, idle_timeout: Duration) {
  let conn = match open_connection(&file) {
    Ok(conn) => conn,
    Err(e) => {
      error!(file = %file.display(), error = %e, "failed to open sqlite database");
      let message = e.to_string();
      while let Ok(command) = rx.try_recv() {
        fail_command(command, &message);
      }
      return;
    }
  };

  debug!(file = %file.display(), "sqlite connection opened");

  loop {
    match rx.recv_timeout(idle_timeout) {
      Ok(command) => handle_command(&conn, command),
      Err(RecvTimeoutError::Timeout) => {
        debug!("closing sqlite connection after inactivity");
        break;
      }
      Err(RecvTimeoutError::Disconnected) => break,
    }
  }
}

fn open_connection(file: &PathBuf) -> Result<Connection> {
  let conn = Connection::open(file)?;
  conn.execute_batch("PRAGMA journal_mode = WAL;")?;
  conn.execute_batch(SCHEMA)?;
  Ok(conn)
}

fn fail_command(command: Command, message: &str) {
  let err = || StoreError::Connection(message.to_string());
  match command {
    Command::Get { reply, .. } => drop(reply.send(Err(err()))),
    Command::GetAll { reply, .. } => drop(reply.send(Err(err()))),
    Command::Put { reply, .. } => drop(reply.send(Err(err()))),
    Command::Update { reply, .. } => drop(reply.send(Err(err()))),
    Command::Delete { reply, .. } => drop(reply.send(Err(err()))),
    Command::Search { matches, .. } => drop(matches),
  }
}

fn handle_command(conn: &Connection, command: Command) {
  match command {
    Command::Get { path, prefix, reply } => {
      let _ = reply.send(get(conn, &path, &prefix));
    }
    Command::GetAll { path, prefix, reply } => {
      let _ = reply.send(get_all(conn, &path, &prefix));
    }
    Command::Put {
      path,
      json,
      timestamp,
      reply,
    } => {
      let _ = reply.send(put(conn, &path, &json, timestamp));
    }
    Command::Update {
      path,
      patch,
      timestamp,
      reply,
    } => {
      let _ = reply.send(update(conn, &path, patch, timestamp));
    }
    Command::Delete { path, reply } => {
      let _ = reply.send(delete(conn, &path));
    }
    Command::Search { prefix, query, matches } => {
      if let Err(e) = search(conn, &prefix, &query, &matches) {
        warn!(error = %e, "sqlite search scan failed");
      }
    }
  }
}

fn exact(conn: &Connection, path: &str) -> Result<Option<Value>> {
  let row: Option<String> = conn
    .query_row("SELECT data FROM records WHERE path = ?1", params![path], |row| row.get(0))
    .optional()?;
  Ok(match row {
    Some(json) => Some(serde_json::from_str(&json)?),
    None => None,
  })
}

/// Rows in the descendant range of `prefix`, newest first. The LIKE
/// pattern over-matches on `%`/`_` wildcards in the prefix; the
/// `starts_with` check makes the range exact.
fn descendants(conn: &Connection, prefix: &str) -> Result<Vec<(String, Value)>> {
  let mut stmt = conn.prepare("SELECT path, data FROM records WHERE path LIKE ?1 || '%' ORDER BY timestamp DESC")?;
  let rows = stmt.query_map(params![prefix], |row| {
    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
  })?;

  let mut out = Vec::new();
  for row in rows {
    let (path, json) = row?;
    if !path.starts_with(prefix) {
      continue;
    }
    out.push((path, serde_json::from_str(&json)?));
  }
  Ok(out)
}

fn get(conn: &Connection, path: &str, prefix: &str) -> Result<Value> {
  if let Some(data) = exact(conn, path)? {
    return Ok(data);
  }

  let rows = descendants(conn, prefix)?;
  if rows.is_empty() {
    return Err(StoreError::NoDataFound(path.to_string()));
  }
  Ok(children_object(rows))
}

fn get_all(conn: &Connection, path: &str, prefix: &str) -> Result<Vec<Value>> {
  let rows = descendants(conn, prefix)?;
  if rows.is_empty() {
    return Err(StoreError::NoDataFound(path.to_string()));
  }
  Ok(rows.into_iter().map(|(_, data)| data).collect())
}

fn put(conn: &Connection, path: &str, json: &str, timestamp: i64) -> Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO records (path, data, timestamp) VALUES (?1, ?2, ?3)",
    params![path, json, timestamp],
  )?;
  trace!(path, "sqlite create");
  Ok(())
}

fn update(conn: &Connection, path: &str, patch: Value, timestamp: i64) -> Result<Value> {
  let existing = exact(conn, path)?.ok_or_else(|| StoreError::NoDataFound(path.to_string()))?;
  let merged = merge_top_level(existing, patch)?;

  conn.execute(
    "UPDATE records SET data = ?1, timestamp = ?2 WHERE path = ?3",
    params![serde_json::to_string(&merged)?, timestamp, path],
  )?;
  Ok(merged)
}

fn delete(conn: &Connection, path: &str) -> Result<()> {
  conn.execute("DELETE FROM records WHERE path = ?1", params![path])?;
  Ok(())
}

fn search(conn: &Connection, prefix: &str, query: &SearchQuery, matches: &mpsc::Sender<Value>) -> Result<()> {
  let mut stmt = conn.prepare("SELECT path, data FROM records WHERE path LIKE ?1 || '%'")?;
  let rows = stmt.query_map(params![prefix], |row| {
    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
  })?;

  for row in rows {
    let (path, json) = row?;
    if !path.starts_with(prefix) {
      continue;
    }
    let data: Value = serde_json::from_str(&json)?;
    if query.matches(&data) && matches.blocking_send(data).is_err() {
      // receiver dropped: consumer cancelled the scan
      break;
    }
  }
  Ok(())
}
