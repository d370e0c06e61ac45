use std::fmt::Display;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Account, Collection, CollectionUpdate, NewAccount, NewCollection};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage connection failed: {0}")]
    Connection(String),
    #[error("email already in use: {0}")]
    DuplicateEmail(String),
    #[error("no account with email: {0}")]
    UnknownOwner(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("no active transaction")]
    NoActiveTransaction,
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn connection<E: Display>(e: E) -> Self {
        StorageError::Connection(e.to_string())
    }

    pub fn backend<E: Display>(e: E) -> Self {
        StorageError::Backend(e.to_string())
    }

    /// True for constraint violations the caller can correct, as opposed to
    /// infrastructure failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::DuplicateEmail(_)
                | StorageError::UnknownOwner(_)
                | StorageError::MissingField(_)
        )
    }
}

/// Uniform persistence contract implemented by every backend.
///
/// Implementations map their native keys into canonical string ids on every
/// record they return, so callers never branch on the backend in use.
/// Absence is a value (`None` / `false`), never an error; an id that does
/// not parse as a canonical id refers to no record and behaves the same as
/// an absent one. Errors divide into connectivity failures and constraint
/// violations (see [`StorageError`]).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Establish the backend connection. Safe to call again after success;
    /// a failure here is a fatal startup error, not something to retry.
    async fn connect(&self) -> Result<(), StorageError>;

    /// Release the connection. No-op if never connected.
    async fn disconnect(&self) -> Result<(), StorageError>;

    // Accounts
    async fn create_account(&self, data: &NewAccount) -> Result<Account, StorageError>;
    async fn find_account_by_id(&self, id: &str) -> Result<Option<Account>, StorageError>;
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError>;
    /// Overwrite the account's owned-collection id list wholesale (no merge).
    /// Returns `None` if the account does not exist.
    async fn update_account_collections(
        &self,
        account_id: &str,
        collection_ids: &[String],
    ) -> Result<Option<Account>, StorageError>;

    // Collections
    async fn create_collection(&self, data: &NewCollection) -> Result<Collection, StorageError>;
    async fn find_collection_by_id(&self, id: &str) -> Result<Option<Collection>, StorageError>;
    /// Equality scan over `owner_email`. Order is backend-native but stable
    /// for repeated identical queries.
    async fn find_collections_by_owner_email(
        &self,
        email: &str,
    ) -> Result<Vec<Collection>, StorageError>;
    /// Replace name and items wholesale. Returns `None` if no such collection.
    async fn update_collection(
        &self,
        id: &str,
        data: &CollectionUpdate,
    ) -> Result<Option<Collection>, StorageError>;
    /// Returns true iff a collection existed and was removed.
    async fn delete_collection(&self, id: &str) -> Result<bool, StorageError>;
}
