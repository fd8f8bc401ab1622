// Company Registry - Core Library
// Dated snapshots of the CVM public company registry, shared by the CLI,
// the terminal UI, the API server and tests

pub mod config;
pub mod error;
pub mod identifier;
pub mod ingest;
pub mod snapshot;
pub mod store;
pub mod views;

// Re-export commonly used types
pub use config::{Config, LatestMode, DEFAULT_DATABASE_PATH, DEFAULT_SOURCE_URL};
pub use error::{Error, Result};
pub use identifier::{format_cnpj, normalize};
pub use ingest::{ingest_payload, IngestReport};
pub use snapshot::{CompanyRecord, EntitySnapshot, COLUMNS};
pub use store::SnapshotStore;
pub use views::{History, Listing};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
