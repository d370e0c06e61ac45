use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// A registered account. `id` is the canonical string form of whatever key
/// the backend generated; `collection_ids` is the denormalized list of owned
/// collections, rewritten wholesale by `update_account_collections`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub credential_hash: String,
    pub collection_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named collection of media items owned by the account whose `email`
/// equals `owner_email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub owner_email: String,
    pub items: Vec<MediaItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub artist: String,
    pub title: String,
    pub year: i32,
    pub external_media_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub credential_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCollection {
    pub name: String,
    pub owner_email: String,
    /// New collections may start empty.
    pub items: Vec<MediaItem>,
}

/// Wholesale replacement for a collection's mutable fields. The owner is
/// immutable after creation and is not part of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionUpdate {
    pub name: String,
    pub items: Vec<MediaItem>,
}

fn require(field: &'static str, value: &str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        return Err(StorageError::MissingField(field));
    }
    Ok(())
}

impl NewAccount {
    pub fn validate(&self) -> Result<(), StorageError> {
        require("email", &self.email)?;
        require("first_name", &self.first_name)?;
        require("last_name", &self.last_name)?;
        require("credential_hash", &self.credential_hash)?;
        Ok(())
    }
}

impl NewCollection {
    pub fn validate(&self) -> Result<(), StorageError> {
        require("name", &self.name)?;
        require("owner_email", &self.owner_email)?;
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

impl CollectionUpdate {
    pub fn validate(&self) -> Result<(), StorageError> {
        require("name", &self.name)?;
        for item in &self.items {
            item.validate()?;
        }
        Ok(())
    }
}

impl MediaItem {
    pub fn validate(&self) -> Result<(), StorageError> {
        require("artist", &self.artist)?;
        require("title", &self.title)?;
        require("external_media_id", &self.external_media_id)?;
        Ok(())
    }
}
