//! End-to-end ingestion tests against a local HTTP server serving a
//! gzip-compressed NDJSON catalog.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use catalog::{CatalogGuard, IngestEvent, marker_path};
use fooddex_core::{BackendKind, PathKey, StoreConfig};
use store::PathStore;

fn gzip(data: &[u8]) -> Vec<u8> {
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(data).unwrap();
  encoder.finish().unwrap()
}

fn catalog_body(count: usize) -> Vec<u8> {
  let mut ndjson = String::new();
  for i in 0..count {
    ndjson.push_str(&json!({"code": format!("{i}"), "name": format!("Product {i}")}).to_string());
    ndjson.push('\n');
  }
  gzip(ndjson.as_bytes())
}

/// Serve `status` + `body` for every connection, counting fetches.
async fn serve(status: &'static str, body: Vec<u8>, hits: Arc<AtomicUsize>) -> String {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  tokio::spawn(async move {
    loop {
      let (mut socket, _) = match listener.accept().await {
        Ok(conn) => conn,
        Err(_) => break,
      };
      hits.fetch_add(1, Ordering::SeqCst);
      let body = body.clone();
      tokio::spawn(async move {
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;
        let head = format!(
          "HTTP/1.1 {status}\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
          body.len()
        );
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
      });
    }
  });

  format!("http://{addr}/catalog.jsonl.gz")
}

fn open_store(dir: &TempDir) -> Arc<dyn PathStore> {
  store::open(&StoreConfig::at_dir(BackendKind::IndexedTree, dir.path())).unwrap()
}

async fn drain(run: &mut catalog::IngestRun) -> Vec<IngestEvent> {
  let mut events = Vec::new();
  while let Some(event) = run.events.recv().await {
    let terminal = matches!(event, IngestEvent::Done | IngestEvent::Error { .. });
    events.push(event);
    if terminal {
      break;
    }
  }
  events
}

#[tokio::test]
async fn batch_boundaries_emit_cumulative_progress() {
  let dir = TempDir::new().unwrap();
  let store = open_store(&dir);
  let hits = Arc::new(AtomicUsize::new(0));
  let url = serve("200 OK", catalog_body(101), hits).await;

  let guard = CatalogGuard::new(store.clone());
  let mut run = guard.ensure(&url).await.unwrap().expect("first run ingests");
  let events = drain(&mut run).await;

  assert_eq!(
    events,
    vec![
      IngestEvent::Progress { count: 50 },
      IngestEvent::Progress { count: 100 },
      IngestEvent::Progress { count: 101 },
      IngestEvent::Done,
    ]
  );

  let all = store.get_all(&PathKey::parse("/products").unwrap()).await.unwrap();
  assert_eq!(all.len(), 101);
}

#[tokio::test]
async fn second_run_observes_marker_and_fetches_nothing() {
  let dir = TempDir::new().unwrap();
  let store = open_store(&dir);
  let hits = Arc::new(AtomicUsize::new(0));
  let url = serve("200 OK", catalog_body(3), hits.clone()).await;

  let guard = CatalogGuard::new(store.clone());
  let mut run = guard.ensure(&url).await.unwrap().expect("first run ingests");
  let events = drain(&mut run).await;
  assert_eq!(events.last(), Some(&IngestEvent::Done));

  // marker landed before Done was forwarded
  let marker = store.get(&marker_path(&url)).await.unwrap();
  assert_eq!(marker["exists"], json!(true));

  let second = guard.ensure(&url).await.unwrap();
  assert!(second.is_none());
  assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_failure_surfaces_as_error_event() {
  let dir = TempDir::new().unwrap();
  let store = open_store(&dir);
  let hits = Arc::new(AtomicUsize::new(0));
  let url = serve("500 Internal Server Error", Vec::new(), hits).await;

  let guard = CatalogGuard::new(store.clone());
  let mut run = guard.ensure(&url).await.unwrap().expect("marker absent, run starts");
  let events = drain(&mut run).await;

  match events.last() {
    Some(IngestEvent::Error { message }) => assert!(message.contains("500"), "unexpected message: {message}"),
    other => panic!("expected error event, got {other:?}"),
  }

  // no marker: the next attempt ingests again
  assert!(store.get(&marker_path(&url)).await.is_err());
  assert!(guard.ensure(&url).await.unwrap().is_some());
}

#[tokio::test]
async fn malformed_lines_are_skipped_not_fatal() {
  let dir = TempDir::new().unwrap();
  let store = open_store(&dir);
  let hits = Arc::new(AtomicUsize::new(0));

  let ndjson = concat!(
    "{\"code\":\"1\",\"name\":\"Good One\"}\n",
    "this is not json\n",
    "{\"code\":\"2\",\"name\":\"Good Two\"}\n",
  );
  let url = serve("200 OK", gzip(ndjson.as_bytes()), hits).await;

  let guard = CatalogGuard::new(store.clone());
  let mut run = guard.ensure(&url).await.unwrap().expect("first run ingests");
  let events = drain(&mut run).await;

  assert_eq!(
    events,
    vec![IngestEvent::Progress { count: 2 }, IngestEvent::Done]
  );

  let all = store.get_all(&PathKey::parse("/products").unwrap()).await.unwrap();
  assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn final_unterminated_line_is_ingested() {
  let dir = TempDir::new().unwrap();
  let store = open_store(&dir);
  let hits = Arc::new(AtomicUsize::new(0));

  let ndjson = "{\"code\":\"1\"}\n{\"code\":\"2\"}";
  let url = serve("200 OK", gzip(ndjson.as_bytes()), hits).await;

  let guard = CatalogGuard::new(store.clone());
  let mut run = guard.ensure(&url).await.unwrap().expect("first run ingests");
  drain(&mut run).await;

  let all = store.get_all(&PathKey::parse("/products").unwrap()).await.unwrap();
  assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn reingestion_overwrites_in_place() {
  let dir = TempDir::new().unwrap();
  let store = open_store(&dir);

  // two full runs against different URLs carrying the same codes: the
  // second overwrites rather than duplicating, because entries are keyed
  // by code with no generated id
  let first = serve("200 OK", catalog_body(5), Arc::new(AtomicUsize::new(0))).await;
  let second = serve("200 OK", catalog_body(5), Arc::new(AtomicUsize::new(0))).await;

  let guard = CatalogGuard::new(store.clone());
  let mut run = guard.ensure(&first).await.unwrap().unwrap();
  drain(&mut run).await;
  let mut run = guard.ensure(&second).await.unwrap().unwrap();
  drain(&mut run).await;

  let all = store.get_all(&PathKey::parse("/products").unwrap()).await.unwrap();
  assert_eq!(all.len(), 5);
}
