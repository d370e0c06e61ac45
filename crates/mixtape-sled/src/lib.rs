use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use sled::Transactional;

use mixtape_core::models::{
    Account, Collection, CollectionUpdate, MediaItem, NewAccount, NewCollection,
};
use mixtape_core::storage::{StorageBackend, StorageError};

const ACCOUNTS_TREE: &str = "accounts";
const ACCOUNT_EMAILS_TREE: &str = "account_emails";
const COLLECTIONS_TREE: &str = "collections";

/// Document backend on an embedded sled database.
///
/// Both entities are stored as independent JSON documents keyed by a native
/// u64 id from sled's generator; the account document embeds its owned
/// collection ids as a plain string array with no referential enforcement.
/// Email uniqueness is the adapter's job here: a dedicated email-to-id tree
/// acts as the unique index, written together with the account document in
/// one multi-tree transaction.
pub struct SledStore {
    path: PathBuf,
    trees: RwLock<Option<Trees>>,
}

#[derive(Clone)]
struct Trees {
    db: sled::Db,
    accounts: sled::Tree,
    account_emails: sled::Tree,
    collections: sled::Tree,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountDoc {
    first_name: String,
    last_name: String,
    email: String,
    credential_hash: String,
    collection_ids: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionDoc {
    name: String,
    owner_email: String,
    items: Vec<MediaItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn encode_id(native: u64) -> String {
    format!("{native:016x}")
}

/// Canonical ids here are 16 lowercase hex chars. Anything else, including
/// the literal "undefined" or "null" a confused caller may pass for a
/// missing id, refers to no record and must not reach the store.
fn decode_id(id: &str) -> Option<u64> {
    if id.len() != 16 || !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u64::from_str_radix(id, 16).ok()
}

fn native_from_bytes(raw: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StorageError::Backend("corrupt native id in store".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn account_from_doc(native: u64, doc: AccountDoc) -> Account {
    Account {
        id: encode_id(native),
        first_name: doc.first_name,
        last_name: doc.last_name,
        email: doc.email,
        credential_hash: doc.credential_hash,
        collection_ids: doc.collection_ids,
        created_at: doc.created_at,
        updated_at: doc.updated_at,
    }
}

fn collection_from_doc(native: u64, doc: CollectionDoc) -> Collection {
    Collection {
        id: encode_id(native),
        name: doc.name,
        owner_email: doc.owner_email,
        items: doc.items,
        created_at: doc.created_at,
        updated_at: doc.updated_at,
    }
}

fn read_account_doc(raw: &[u8]) -> Result<AccountDoc, StorageError> {
    serde_json::from_slice(raw).map_err(StorageError::backend)
}

fn read_collection_doc(raw: &[u8]) -> Result<CollectionDoc, StorageError> {
    serde_json::from_slice(raw).map_err(StorageError::backend)
}

impl SledStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SledStore {
            path: path.into(),
            trees: RwLock::new(None),
        }
    }

    fn trees(&self) -> Result<Trees, StorageError> {
        self.trees
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| StorageError::Connection("sled store is not connected".to_string()))
    }

    /// Remove every record. Test support, not part of the storage contract.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let trees = self.trees()?;
        trees.accounts.clear().map_err(StorageError::backend)?;
        trees.account_emails.clear().map_err(StorageError::backend)?;
        trees.collections.clear().map_err(StorageError::backend)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SledStore {
    async fn connect(&self) -> Result<(), StorageError> {
        let mut state = self.trees.write().unwrap();
        if state.is_some() {
            return Ok(());
        }
        let db = sled::open(&self.path).map_err(StorageError::connection)?;
        let accounts = db.open_tree(ACCOUNTS_TREE).map_err(StorageError::connection)?;
        let account_emails = db
            .open_tree(ACCOUNT_EMAILS_TREE)
            .map_err(StorageError::connection)?;
        let collections = db
            .open_tree(COLLECTIONS_TREE)
            .map_err(StorageError::connection)?;
        *state = Some(Trees {
            db,
            accounts,
            account_emails,
            collections,
        });
        tracing::debug!(path = %self.path.display(), "sled store opened");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        let state = self.trees.write().unwrap().take();
        if let Some(trees) = state {
            trees.db.flush_async().await.map_err(StorageError::backend)?;
            tracing::debug!("sled store closed");
        }
        Ok(())
    }

    async fn create_account(&self, data: &NewAccount) -> Result<Account, StorageError> {
        data.validate()?;
        let trees = self.trees()?;
        let native = trees.db.generate_id().map_err(StorageError::backend)?;

        let now = Utc::now();
        let doc = AccountDoc {
            first_name: data.first_name.clone(),
            last_name: data.last_name.clone(),
            email: data.email.clone(),
            credential_hash: data.credential_hash.clone(),
            collection_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let bytes = serde_json::to_vec(&doc).map_err(StorageError::backend)?;

        // Index entry and document are written in one transaction; the email
        // can never be left claimed without an account behind it.
        let result = (&trees.account_emails, &trees.accounts).transaction(|(emails, accounts)| {
            if let Some(holder) = emails.get(data.email.as_bytes())? {
                // Only an entry backed by a live document makes the email
                // taken; an orphaned entry is overwritten.
                if accounts.get(&holder)?.is_some() {
                    return sled::transaction::abort(StorageError::DuplicateEmail(
                        data.email.clone(),
                    ));
                }
            }
            emails.insert(data.email.as_bytes(), &native.to_be_bytes()[..])?;
            accounts.insert(&native.to_be_bytes()[..], bytes.clone())?;
            Ok(())
        });
        match result {
            Ok(()) => Ok(account_from_doc(native, doc)),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(StorageError::backend(err)),
        }
    }

    async fn find_account_by_id(&self, id: &str) -> Result<Option<Account>, StorageError> {
        let native = match decode_id(id) {
            Some(native) => native,
            None => {
                tracing::warn!(id, "rejecting malformed account id");
                return Ok(None);
            }
        };
        let trees = self.trees()?;
        match trees
            .accounts
            .get(native.to_be_bytes())
            .map_err(StorageError::backend)?
        {
            Some(raw) => Ok(Some(account_from_doc(native, read_account_doc(&raw)?))),
            None => Ok(None),
        }
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let trees = self.trees()?;
        let raw_id = match trees
            .account_emails
            .get(email.as_bytes())
            .map_err(StorageError::backend)?
        {
            Some(raw_id) => raw_id,
            None => return Ok(None),
        };
        let native = native_from_bytes(&raw_id)?;
        match trees.accounts.get(&raw_id).map_err(StorageError::backend)? {
            Some(raw) => Ok(Some(account_from_doc(native, read_account_doc(&raw)?))),
            None => Ok(None),
        }
    }

    async fn update_account_collections(
        &self,
        account_id: &str,
        collection_ids: &[String],
    ) -> Result<Option<Account>, StorageError> {
        let native = match decode_id(account_id) {
            Some(native) => native,
            None => {
                tracing::warn!(id = account_id, "rejecting malformed account id");
                return Ok(None);
            }
        };
        let trees = self.trees()?;
        let mut doc = match trees
            .accounts
            .get(native.to_be_bytes())
            .map_err(StorageError::backend)?
        {
            Some(raw) => read_account_doc(&raw)?,
            None => return Ok(None),
        };
        doc.collection_ids = collection_ids.to_vec();
        doc.updated_at = Utc::now();
        let bytes = serde_json::to_vec(&doc).map_err(StorageError::backend)?;
        trees
            .accounts
            .insert(native.to_be_bytes(), bytes)
            .map_err(StorageError::backend)?;
        Ok(Some(account_from_doc(native, doc)))
    }

    async fn create_collection(&self, data: &NewCollection) -> Result<Collection, StorageError> {
        data.validate()?;
        let trees = self.trees()?;
        let native = trees.db.generate_id().map_err(StorageError::backend)?;
        let now = Utc::now();
        let doc = CollectionDoc {
            name: data.name.clone(),
            owner_email: data.owner_email.clone(),
            items: data.items.clone(),
            created_at: now,
            updated_at: now,
        };
        let bytes = serde_json::to_vec(&doc).map_err(StorageError::backend)?;
        trees
            .collections
            .insert(native.to_be_bytes(), bytes)
            .map_err(StorageError::backend)?;
        Ok(collection_from_doc(native, doc))
    }

    async fn find_collection_by_id(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        let native = match decode_id(id) {
            Some(native) => native,
            None => {
                tracing::warn!(id, "rejecting malformed collection id");
                return Ok(None);
            }
        };
        let trees = self.trees()?;
        match trees
            .collections
            .get(native.to_be_bytes())
            .map_err(StorageError::backend)?
        {
            Some(raw) => Ok(Some(collection_from_doc(native, read_collection_doc(&raw)?))),
            None => Ok(None),
        }
    }

    async fn find_collections_by_owner_email(
        &self,
        email: &str,
    ) -> Result<Vec<Collection>, StorageError> {
        let trees = self.trees()?;
        // No native join or secondary index here: equality scan over the
        // collection documents, in key order (= creation order).
        let mut result = Vec::new();
        for entry in trees.collections.iter() {
            let (key, raw) = entry.map_err(StorageError::backend)?;
            let doc = read_collection_doc(&raw)?;
            if doc.owner_email == email {
                let native = native_from_bytes(&key)?;
                result.push(collection_from_doc(native, doc));
            }
        }
        Ok(result)
    }

    async fn update_collection(
        &self,
        id: &str,
        data: &CollectionUpdate,
    ) -> Result<Option<Collection>, StorageError> {
        data.validate()?;
        let native = match decode_id(id) {
            Some(native) => native,
            None => {
                tracing::warn!(id, "rejecting malformed collection id");
                return Ok(None);
            }
        };
        let trees = self.trees()?;
        let mut doc = match trees
            .collections
            .get(native.to_be_bytes())
            .map_err(StorageError::backend)?
        {
            Some(raw) => read_collection_doc(&raw)?,
            None => return Ok(None),
        };
        doc.name = data.name.clone();
        doc.items = data.items.clone();
        doc.updated_at = Utc::now();
        let bytes = serde_json::to_vec(&doc).map_err(StorageError::backend)?;
        trees
            .collections
            .insert(native.to_be_bytes(), bytes)
            .map_err(StorageError::backend)?;
        Ok(Some(collection_from_doc(native, doc)))
    }

    async fn delete_collection(&self, id: &str) -> Result<bool, StorageError> {
        let native = match decode_id(id) {
            Some(native) => native,
            None => {
                tracing::warn!(id, "rejecting malformed collection id");
                return Ok(false);
            }
        };
        let trees = self.trees()?;
        let removed = trees
            .collections
            .remove(native.to_be_bytes())
            .map_err(StorageError::backend)?;
        if removed.is_some() {
            tracing::debug!(id, "collection deleted");
        }
        Ok(removed.is_some())
    }
}
