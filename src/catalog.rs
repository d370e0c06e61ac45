use std::sync::Arc;

use thiserror::Error;

use mixtape_core::models::{Collection, MediaItem, NewCollection};
use mixtape_core::storage::{StorageBackend, StorageError};

/// Failures of the paired collection/account flows. The two `Dangling*`
/// variants report a partial write: the collection-side step succeeded but
/// the owner's id list could not be brought in line, and the caller now
/// holds enough information to repair it.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("collection {collection_id} does not belong to account {account_id}")]
    NotOwner {
        account_id: String,
        collection_id: String,
    },
    #[error("collection {collection_id} was created but not recorded on its owner: {source}")]
    DanglingCreate {
        collection_id: String,
        #[source]
        source: StorageError,
    },
    #[error("collection {collection_id} was deleted but is still listed by its owner: {source}")]
    DanglingDelete {
        collection_id: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Convenience layer over the storage contract for the one relationship the
/// backends do not maintain themselves: the owner's denormalized
/// collection-id list. Each flow issues two independent writes with no
/// cross-operation transaction, so a failure after the first write is
/// reported explicitly instead of being swallowed.
pub struct Catalog {
    store: Arc<dyn StorageBackend>,
}

impl Catalog {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Catalog { store }
    }

    /// Create a collection owned by the account and append its id to the
    /// account's collection list.
    pub async fn create_collection_for(
        &self,
        account_id: &str,
        name: &str,
        items: Vec<MediaItem>,
    ) -> Result<Collection, CatalogError> {
        let account = self
            .store
            .find_account_by_id(account_id)
            .await?
            .ok_or_else(|| CatalogError::AccountNotFound(account_id.to_string()))?;

        let data = NewCollection {
            name: name.to_string(),
            owner_email: account.email.clone(),
            items,
        };
        let collection = self.store.create_collection(&data).await?;

        let mut ids = account.collection_ids;
        ids.push(collection.id.clone());
        match self.store.update_account_collections(account_id, &ids).await {
            Ok(Some(_)) => Ok(collection),
            // An absent owner means the id list was never rewritten.
            Ok(None) => Err(CatalogError::DanglingCreate {
                collection_id: collection.id.clone(),
                source: StorageError::UnknownOwner(account.email),
            }),
            Err(source) => Err(CatalogError::DanglingCreate {
                collection_id: collection.id.clone(),
                source,
            }),
        }
    }

    /// Delete a collection owned by the account and drop its id from the
    /// account's collection list.
    pub async fn remove_collection_for(
        &self,
        account_id: &str,
        collection_id: &str,
    ) -> Result<(), CatalogError> {
        let account = self
            .store
            .find_account_by_id(account_id)
            .await?
            .ok_or_else(|| CatalogError::AccountNotFound(account_id.to_string()))?;

        let collection = self
            .store
            .find_collection_by_id(collection_id)
            .await?
            .ok_or_else(|| CatalogError::CollectionNotFound(collection_id.to_string()))?;
        if collection.owner_email != account.email {
            return Err(CatalogError::NotOwner {
                account_id: account_id.to_string(),
                collection_id: collection_id.to_string(),
            });
        }

        let removed = self.store.delete_collection(collection_id).await?;
        if !removed {
            return Err(CatalogError::CollectionNotFound(collection_id.to_string()));
        }

        let ids: Vec<String> = account
            .collection_ids
            .into_iter()
            .filter(|id| id != collection_id)
            .collect();
        match self.store.update_account_collections(account_id, &ids).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(CatalogError::DanglingDelete {
                collection_id: collection_id.to_string(),
                source: StorageError::UnknownOwner(account.email),
            }),
            Err(source) => Err(CatalogError::DanglingDelete {
                collection_id: collection_id.to_string(),
                source,
            }),
        }
    }
}
