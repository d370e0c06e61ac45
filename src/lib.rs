pub mod backend;
pub mod catalog;
pub mod config;

pub use backend::{resolve, BackendKind, UnknownBackend};
pub use catalog::{Catalog, CatalogError};
pub use config::{CliArgs, Config};
pub use mixtape_core::models;
pub use mixtape_core::{StorageBackend, StorageError};
