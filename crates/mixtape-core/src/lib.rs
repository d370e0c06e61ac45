pub mod models;
pub mod storage;

pub use models::{Account, Collection, CollectionUpdate, MediaItem, NewAccount, NewCollection};
pub use storage::{StorageBackend, StorageError};
