use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};

use catalog::{CatalogGuard, IngestEvent, SearchGenerator};
use fooddex_core::{BackendKind, PathKey, StoreConfig};
use store::SearchQuery;

#[derive(Parser)]
#[command(name = "fooddex", version, about = "Path-addressed record store and catalog ingestion")]
struct Cli {
  /// Storage backend: flat-blob, indexed-tree, or relational
  #[arg(long, global = true)]
  backend: Option<BackendKind>,

  /// Data directory override
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Download and ingest a catalog unless it is already present
  Ingest { url: String },

  /// Stream catalog entries matching a single-field query
  Search {
    field: String,
    text: String,
    /// Require equality instead of substring containment
    #[arg(long)]
    exact: bool,
    #[arg(long, default_value = "/products")]
    root: String,
  },

  /// Print the record or subtree at a path
  Get { path: String },

  /// Create a record (a generated id is appended unless --no-id)
  Add {
    path: String,
    json: String,
    #[arg(long)]
    no_id: bool,
  },

  /// Merge top-level fields into an existing record
  Update { path: String, json: String },

  /// Delete the record at a path
  Delete { path: String },
}

fn init_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  init_logging();
  let cli = Cli::parse();

  let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
  let mut config = StoreConfig::load(&cwd);
  if let Some(backend) = cli.backend {
    config.backend = backend;
  }
  if let Some(data_dir) = cli.data_dir {
    config.data_dir = data_dir;
  }

  let store = store::open(&config)?;

  match cli.command {
    Commands::Ingest { url } => {
      let guard = CatalogGuard::new(store);
      match guard.ensure(&url).await? {
        None => println!("catalog already ingested"),
        Some(mut run) => {
          while let Some(event) = run.events.recv().await {
            match event {
              IngestEvent::Progress { count } => println!("ingested {count} entries"),
              IngestEvent::Done => {
                println!("done");
                break;
              }
              IngestEvent::Error { message } => bail!("ingestion failed: {message}"),
            }
          }
        }
      }
    }

    Commands::Search {
      field,
      text,
      exact,
      root,
    } => {
      let root = PathKey::parse(&root)?;
      let query = if exact {
        SearchQuery::exact(field, text)
      } else {
        SearchQuery::fuzzy(field, text)
      };

      let generator = SearchGenerator::new(store);
      let mut results = generator.search(&root, query).await?;
      while let Some(entry) = results.recv().await {
        println!("{}", serde_json::to_string(&entry)?);
      }
    }

    Commands::Get { path } => {
      let data = store.get(&PathKey::parse(&path)?).await?;
      println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Commands::Add { path, json, no_id } => {
      let data = serde_json::from_str(&json)?;
      let created = store.create(&PathKey::parse(&path)?, data, !no_id).await?;
      println!("{}", serde_json::to_string_pretty(&created)?);
    }

    Commands::Update { path, json } => {
      let patch = serde_json::from_str(&json)?;
      let updated = store.update(&PathKey::parse(&path)?, patch).await?;
      println!("{}", serde_json::to_string_pretty(&updated)?);
    }

    Commands::Delete { path } => {
      store.delete(&PathKey::parse(&path)?).await?;
    }
  }

  Ok(())
}
