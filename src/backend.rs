use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use mixtape_core::StorageBackend;
use mixtape_postgres::PostgresStore;
use mixtape_sled::SledStore;

use crate::config::DatabaseConfig;

/// The configured backend family names nothing we ship. Fatal at startup,
/// before any caller can reach the store.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported storage backend: {0} (expected 'sled' or 'postgres')")]
pub struct UnknownBackend(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sled,
    Postgres,
}

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sled" => Ok(BackendKind::Sled),
            "postgres" => Ok(BackendKind::Postgres),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

/// Construct the configured backend. Resolved once at startup; the returned
/// handle is the process-wide shared instance and the only place adapter
/// types appear. Everything downstream sees `dyn StorageBackend`.
pub fn resolve(config: &DatabaseConfig) -> Result<Arc<dyn StorageBackend>, UnknownBackend> {
    let store: Arc<dyn StorageBackend> = match config.backend.parse()? {
        BackendKind::Sled => Arc::new(SledStore::new(&config.sled_path)),
        BackendKind::Postgres => Arc::new(PostgresStore::new(&config.postgres_url)),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database_config(backend: &str) -> DatabaseConfig {
        DatabaseConfig {
            backend: backend.to_string(),
            sled_path: "./data/test".to_string(),
            postgres_url: "postgres://localhost:5432/test".to_string(),
        }
    }

    #[test]
    fn test_known_backends_resolve() {
        assert!(resolve(&database_config("sled")).is_ok());
        assert!(resolve(&database_config("postgres")).is_ok());
    }

    #[test]
    fn test_unknown_backend_is_fatal() {
        let err = match resolve(&database_config("mongodb")) {
            Err(err) => err,
            Ok(_) => panic!("expected mongodb to be rejected"),
        };
        assert_eq!(err, UnknownBackend("mongodb".to_string()));
    }

    #[test]
    fn test_kind_parses_exact_names_only() {
        assert_eq!("sled".parse(), Ok(BackendKind::Sled));
        assert_eq!("postgres".parse(), Ok(BackendKind::Postgres));
        assert!("Postgres".parse::<BackendKind>().is_err());
        assert!("".parse::<BackendKind>().is_err());
    }
}
