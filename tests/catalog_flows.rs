use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mixtape::models::{
    Account, Collection, CollectionUpdate, MediaItem, NewAccount, NewCollection,
};
use mixtape::{Catalog, CatalogError, StorageBackend, StorageError};
use mixtape_sled::SledStore;

async fn open_catalog() -> (tempfile::TempDir, Arc<SledStore>, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::new(dir.path().join("db")));
    store.connect().await.unwrap();
    let catalog = Catalog::new(store.clone());
    (dir, store, catalog)
}

fn new_account(email: &str) -> NewAccount {
    NewAccount {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: email.to_string(),
        credential_hash: "hash".to_string(),
    }
}

fn road_mix_items() -> Vec<MediaItem> {
    vec![MediaItem {
        artist: "Kraftwerk".to_string(),
        title: "Autobahn".to_string(),
        year: 1974,
        external_media_id: "KW-1974-01".to_string(),
    }]
}

#[tokio::test]
async fn test_create_collection_lands_on_owner() {
    let (_dir, store, catalog) = open_catalog().await;
    let account = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();

    let collection = catalog
        .create_collection_for(&account.id, "Road Mix", road_mix_items())
        .await
        .unwrap();
    assert_eq!(collection.owner_email, "ada@example.com");
    assert_eq!(collection.items, road_mix_items());

    let reloaded = store.find_account_by_id(&account.id).await.unwrap().unwrap();
    assert_eq!(reloaded.collection_ids, vec![collection.id]);
}

#[tokio::test]
async fn test_create_for_unknown_account() {
    let (_dir, _store, catalog) = open_catalog().await;
    match catalog
        .create_collection_for("not-a-real-id", "Mix", Vec::new())
        .await
    {
        Err(CatalogError::AccountNotFound(id)) => assert_eq!(id, "not-a-real-id"),
        other => panic!("expected AccountNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_deletes_and_unlists() {
    let (_dir, store, catalog) = open_catalog().await;
    let account = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();
    let keep = catalog
        .create_collection_for(&account.id, "Keep", Vec::new())
        .await
        .unwrap();
    let extra = catalog
        .create_collection_for(&account.id, "Extra", Vec::new())
        .await
        .unwrap();

    catalog
        .remove_collection_for(&account.id, &extra.id)
        .await
        .unwrap();

    let reloaded = store.find_account_by_id(&account.id).await.unwrap().unwrap();
    assert_eq!(reloaded.collection_ids, vec![keep.id.clone()]);
    assert_eq!(store.find_collection_by_id(&extra.id).await.unwrap(), None);
    assert!(store.find_collection_by_id(&keep.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_remove_rejects_foreign_collection() {
    let (_dir, store, catalog) = open_catalog().await;
    let ada = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();
    let grace = store
        .create_account(&new_account("grace@example.com"))
        .await
        .unwrap();
    let collection = catalog
        .create_collection_for(&ada.id, "Private", Vec::new())
        .await
        .unwrap();

    match catalog.remove_collection_for(&grace.id, &collection.id).await {
        Err(CatalogError::NotOwner {
            account_id,
            collection_id,
        }) => {
            assert_eq!(account_id, grace.id);
            assert_eq!(collection_id, collection.id);
        }
        other => panic!("expected NotOwner, got {:?}", other),
    }
    // Nothing was deleted.
    assert!(store
        .find_collection_by_id(&collection.id)
        .await
        .unwrap()
        .is_some());
    let reloaded = store.find_account_by_id(&ada.id).await.unwrap().unwrap();
    assert_eq!(reloaded.collection_ids, vec![collection.id]);
}

#[tokio::test]
async fn test_remove_unknown_collection() {
    let (_dir, store, catalog) = open_catalog().await;
    let account = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();

    match catalog.remove_collection_for(&account.id, "undefined").await {
        Err(CatalogError::CollectionNotFound(id)) => assert_eq!(id, "undefined"),
        other => panic!("expected CollectionNotFound, got {:?}", other),
    }
}

// --- Partial writes ---

#[derive(Clone, Copy)]
enum ListUpdates {
    Work,
    Fail,
    Vanish,
}

// Sled-backed double whose owner-list rewrites can be made to fail or to
// claim the account vanished.
struct UnreliableStore {
    inner: SledStore,
    list_updates: Mutex<ListUpdates>,
}

impl UnreliableStore {
    fn new(path: std::path::PathBuf) -> Self {
        UnreliableStore {
            inner: SledStore::new(path),
            list_updates: Mutex::new(ListUpdates::Work),
        }
    }

    fn set_list_updates(&self, mode: ListUpdates) {
        *self.list_updates.lock().unwrap() = mode;
    }
}

#[async_trait]
impl StorageBackend for UnreliableStore {
    async fn connect(&self) -> Result<(), StorageError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        self.inner.disconnect().await
    }

    async fn create_account(&self, data: &NewAccount) -> Result<Account, StorageError> {
        self.inner.create_account(data).await
    }

    async fn find_account_by_id(&self, id: &str) -> Result<Option<Account>, StorageError> {
        self.inner.find_account_by_id(id).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        self.inner.find_account_by_email(email).await
    }

    async fn update_account_collections(
        &self,
        account_id: &str,
        collection_ids: &[String],
    ) -> Result<Option<Account>, StorageError> {
        let mode = *self.list_updates.lock().unwrap();
        match mode {
            ListUpdates::Work => {
                self.inner
                    .update_account_collections(account_id, collection_ids)
                    .await
            }
            ListUpdates::Fail => Err(StorageError::Backend("list rewrite refused".to_string())),
            ListUpdates::Vanish => Ok(None),
        }
    }

    async fn create_collection(&self, data: &NewCollection) -> Result<Collection, StorageError> {
        self.inner.create_collection(data).await
    }

    async fn find_collection_by_id(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        self.inner.find_collection_by_id(id).await
    }

    async fn find_collections_by_owner_email(
        &self,
        email: &str,
    ) -> Result<Vec<Collection>, StorageError> {
        self.inner.find_collections_by_owner_email(email).await
    }

    async fn update_collection(
        &self,
        id: &str,
        data: &CollectionUpdate,
    ) -> Result<Option<Collection>, StorageError> {
        self.inner.update_collection(id, data).await
    }

    async fn delete_collection(&self, id: &str) -> Result<bool, StorageError> {
        self.inner.delete_collection(id).await
    }
}

async fn open_unreliable() -> (tempfile::TempDir, Arc<UnreliableStore>, Catalog) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(UnreliableStore::new(dir.path().join("db")));
    store.connect().await.unwrap();
    let catalog = Catalog::new(store.clone());
    (dir, store, catalog)
}

#[tokio::test]
async fn test_failed_list_rewrite_reports_orphaned_collection() {
    let (_dir, store, catalog) = open_unreliable().await;
    let account = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();

    store.set_list_updates(ListUpdates::Fail);
    let err = match catalog
        .create_collection_for(&account.id, "Orphan", Vec::new())
        .await
    {
        Err(err) => err,
        Ok(_) => panic!("expected DanglingCreate"),
    };
    let orphan_id = match err {
        CatalogError::DanglingCreate { collection_id, .. } => collection_id,
        other => panic!("expected DanglingCreate, got {:?}", other),
    };

    // The collection exists but the owner's list was never rewritten.
    assert!(store.find_collection_by_id(&orphan_id).await.unwrap().is_some());
    let reloaded = store.find_account_by_id(&account.id).await.unwrap().unwrap();
    assert!(reloaded.collection_ids.is_empty());
}

#[tokio::test]
async fn test_failed_list_rewrite_reports_unlisted_deletion() {
    let (_dir, store, catalog) = open_unreliable().await;
    let account = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();
    let collection = catalog
        .create_collection_for(&account.id, "Doomed", Vec::new())
        .await
        .unwrap();

    store.set_list_updates(ListUpdates::Fail);
    match catalog.remove_collection_for(&account.id, &collection.id).await {
        Err(CatalogError::DanglingDelete { collection_id, .. }) => {
            assert_eq!(collection_id, collection.id)
        }
        other => panic!("expected DanglingDelete, got {:?}", other),
    }

    // Deleted from the store, still listed on the account.
    assert_eq!(store.find_collection_by_id(&collection.id).await.unwrap(), None);
    let reloaded = store.find_account_by_id(&account.id).await.unwrap().unwrap();
    assert_eq!(reloaded.collection_ids, vec![collection.id]);
}

#[tokio::test]
async fn test_vanished_owner_reported_as_dangling() {
    let (_dir, store, catalog) = open_unreliable().await;
    let account = store
        .create_account(&new_account("ada@example.com"))
        .await
        .unwrap();

    // An owner that disappears between the read and the rewrite must not
    // read as success.
    store.set_list_updates(ListUpdates::Vanish);
    match catalog
        .create_collection_for(&account.id, "Unrecorded", Vec::new())
        .await
    {
        Err(CatalogError::DanglingCreate { .. }) => {}
        other => panic!("expected DanglingCreate, got {:?}", other),
    }

    store.set_list_updates(ListUpdates::Work);
    let collection = catalog
        .create_collection_for(&account.id, "Listed", Vec::new())
        .await
        .unwrap();

    store.set_list_updates(ListUpdates::Vanish);
    match catalog.remove_collection_for(&account.id, &collection.id).await {
        Err(CatalogError::DanglingDelete { collection_id, .. }) => {
            assert_eq!(collection_id, collection.id)
        }
        other => panic!("expected DanglingDelete, got {:?}", other),
    }
}
