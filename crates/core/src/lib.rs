pub mod config;
pub mod entry;
pub mod error;
pub mod path;
pub mod record;

pub use config::{BackendKind, StoreConfig, default_data_dir};
pub use entry::{CatalogEntry, Macros, SCHEMA_VERSION};
pub use error::{PathError, Result};
pub use path::PathKey;
pub use record::{WriteRecord, next_timestamp};
