use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres};
use tokio::sync::Mutex;
use uuid::Uuid;

use mixtape_core::models::{Account, Collection, CollectionUpdate, NewAccount, NewCollection};
use mixtape_core::storage::{StorageBackend, StorageError};

/// Relational backend on PostgreSQL via sqlx.
///
/// Accounts and collections live in separate tables with generated UUID
/// surrogate keys; the canonical id is the hyphenated string form of that
/// key. Collections declare a weak foreign key on `owner_email` referencing
/// `accounts(email)`, keyed on the email rather than the account key so
/// ownership survives key regeneration. Owned collection ids are a `TEXT[]`
/// column and items a `JSONB` column, both structurally typed.
///
/// An optional ambient transaction can be opened with
/// [`PostgresStore::begin_transaction`]; while it is held, every contract
/// operation runs on that single connection. Contract calls never open a
/// transaction spanning more than one operation on their own.
pub struct PostgresStore {
    url: String,
    pool: RwLock<Option<PgPool>>,
    session: Mutex<Option<PoolConnection<Postgres>>>,
}

/// Anything that does not parse as a UUID, including the literal "undefined"
/// or "null" a confused caller may pass for a missing id, refers to no row
/// and must not reach the driver.
fn decode_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

fn pg_error_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.to_string()),
        _ => None,
    }
}

// PostgreSQL condition codes surfaced as constraint violations.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

mod queries {
    use chrono::Utc;
    use sqlx::postgres::{PgExecutor, PgRow};
    use sqlx::types::Json;
    use sqlx::Row;
    use uuid::Uuid;

    use mixtape_core::models::{
        Account, Collection, CollectionUpdate, MediaItem, NewAccount, NewCollection,
    };
    use mixtape_core::storage::StorageError;

    use super::{pg_error_code, FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION};

    fn account_from_row(row: &PgRow) -> Result<Account, StorageError> {
        let native: Uuid = row.try_get("id").map_err(StorageError::backend)?;
        Ok(Account {
            id: native.to_string(),
            first_name: row.try_get("first_name").map_err(StorageError::backend)?,
            last_name: row.try_get("last_name").map_err(StorageError::backend)?,
            email: row.try_get("email").map_err(StorageError::backend)?,
            credential_hash: row
                .try_get("credential_hash")
                .map_err(StorageError::backend)?,
            collection_ids: row
                .try_get("collection_ids")
                .map_err(StorageError::backend)?,
            created_at: row.try_get("created_at").map_err(StorageError::backend)?,
            updated_at: row.try_get("updated_at").map_err(StorageError::backend)?,
        })
    }

    fn collection_from_row(row: &PgRow) -> Result<Collection, StorageError> {
        let native: Uuid = row.try_get("id").map_err(StorageError::backend)?;
        let items: Json<Vec<MediaItem>> = row.try_get("items").map_err(StorageError::backend)?;
        Ok(Collection {
            id: native.to_string(),
            name: row.try_get("name").map_err(StorageError::backend)?,
            owner_email: row.try_get("owner_email").map_err(StorageError::backend)?,
            items: items.0,
            created_at: row.try_get("created_at").map_err(StorageError::backend)?,
            updated_at: row.try_get("updated_at").map_err(StorageError::backend)?,
        })
    }

    pub(super) async fn create_account<'e, E>(
        ex: E,
        data: &NewAccount,
    ) -> Result<Account, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO accounts
                 (first_name, last_name, email, credential_hash, collection_ids,
                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, '{}', $5, $6)
             RETURNING *",
        )
        .bind(&data.first_name)
        .bind(&data.last_name)
        .bind(&data.email)
        .bind(&data.credential_hash)
        .bind(now)
        .bind(now)
        .fetch_one(ex)
        .await
        .map_err(|e| {
            if pg_error_code(&e).as_deref() == Some(UNIQUE_VIOLATION) {
                StorageError::DuplicateEmail(data.email.clone())
            } else {
                StorageError::backend(e)
            }
        })?;
        account_from_row(&row)
    }

    pub(super) async fn account_by_id<'e, E>(
        ex: E,
        native: Uuid,
    ) -> Result<Option<Account>, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
            .bind(native)
            .fetch_optional(ex)
            .await
            .map_err(StorageError::backend)?;
        row.as_ref().map(account_from_row).transpose()
    }

    pub(super) async fn account_by_email<'e, E>(
        ex: E,
        email: &str,
    ) -> Result<Option<Account>, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query("SELECT * FROM accounts WHERE email = $1")
            .bind(email)
            .fetch_optional(ex)
            .await
            .map_err(StorageError::backend)?;
        row.as_ref().map(account_from_row).transpose()
    }

    pub(super) async fn update_account_collections<'e, E>(
        ex: E,
        native: Uuid,
        collection_ids: &[String],
    ) -> Result<Option<Account>, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query(
            "UPDATE accounts
             SET collection_ids = $2, updated_at = $3
             WHERE id = $1
             RETURNING *",
        )
        .bind(native)
        .bind(collection_ids)
        .bind(Utc::now())
        .fetch_optional(ex)
        .await
        .map_err(StorageError::backend)?;
        row.as_ref().map(account_from_row).transpose()
    }

    pub(super) async fn create_collection<'e, E>(
        ex: E,
        data: &NewCollection,
    ) -> Result<Collection, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO collections (name, owner_email, items, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(&data.name)
        .bind(&data.owner_email)
        .bind(Json(&data.items))
        .bind(now)
        .bind(now)
        .fetch_one(ex)
        .await
        .map_err(|e| {
            if pg_error_code(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) {
                StorageError::UnknownOwner(data.owner_email.clone())
            } else {
                StorageError::backend(e)
            }
        })?;
        collection_from_row(&row)
    }

    pub(super) async fn collection_by_id<'e, E>(
        ex: E,
        native: Uuid,
    ) -> Result<Option<Collection>, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query("SELECT * FROM collections WHERE id = $1")
            .bind(native)
            .fetch_optional(ex)
            .await
            .map_err(StorageError::backend)?;
        row.as_ref().map(collection_from_row).transpose()
    }

    pub(super) async fn collections_by_owner_email<'e, E>(
        ex: E,
        email: &str,
    ) -> Result<Vec<Collection>, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let rows = sqlx::query(
            "SELECT * FROM collections WHERE owner_email = $1 ORDER BY created_at, id",
        )
        .bind(email)
        .fetch_all(ex)
        .await
        .map_err(StorageError::backend)?;
        rows.iter().map(collection_from_row).collect()
    }

    pub(super) async fn update_collection<'e, E>(
        ex: E,
        native: Uuid,
        data: &CollectionUpdate,
    ) -> Result<Option<Collection>, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query(
            "UPDATE collections
             SET name = $2, items = $3, updated_at = $4
             WHERE id = $1
             RETURNING *",
        )
        .bind(native)
        .bind(&data.name)
        .bind(Json(&data.items))
        .bind(Utc::now())
        .fetch_optional(ex)
        .await
        .map_err(StorageError::backend)?;
        row.as_ref().map(collection_from_row).transpose()
    }

    pub(super) async fn delete_collection<'e, E>(
        ex: E,
        native: Uuid,
    ) -> Result<bool, StorageError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM collections WHERE id = $1")
            .bind(native)
            .execute(ex)
            .await
            .map_err(StorageError::backend)?;
        Ok(result.rows_affected() > 0)
    }
}

impl PostgresStore {
    pub fn new(url: &str) -> Self {
        PostgresStore {
            url: url.to_string(),
            pool: RwLock::new(None),
            session: Mutex::new(None),
        }
    }

    fn pool(&self) -> Result<PgPool, StorageError> {
        self.pool
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| StorageError::Connection("postgres store is not connected".to_string()))
    }

    /// Schema reconciliation is additive only: existing tables are left in
    /// place, never dropped or rewritten.
    async fn init_schema(pool: &PgPool) -> Result<(), StorageError> {
        pool.execute(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                credential_hash TEXT NOT NULL,
                collection_ids TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS collections (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL,
                owner_email TEXT NOT NULL REFERENCES accounts(email),
                items JSONB NOT NULL DEFAULT '[]',
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_collections_owner_email
                ON collections(owner_email);
            ",
        )
        .await
        .map_err(StorageError::connection)?;
        Ok(())
    }

    /// Open the ambient transaction. Until committed or rolled back, every
    /// contract operation on this store runs inside it, serialized on one
    /// connection.
    pub async fn begin_transaction(&self) -> Result<(), StorageError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(StorageError::Backend(
                "a transaction is already open".to_string(),
            ));
        }
        let mut conn = self
            .pool()?
            .acquire()
            .await
            .map_err(StorageError::connection)?;
        conn.execute("BEGIN").await.map_err(StorageError::backend)?;
        *session = Some(conn);
        tracing::debug!("postgres transaction started");
        Ok(())
    }

    pub async fn commit_transaction(&self) -> Result<(), StorageError> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(mut conn) => {
                conn.execute("COMMIT").await.map_err(StorageError::backend)?;
                tracing::debug!("postgres transaction committed");
                Ok(())
            }
            None => Err(StorageError::NoActiveTransaction),
        }
    }

    pub async fn rollback_transaction(&self) -> Result<(), StorageError> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(mut conn) => {
                conn.execute("ROLLBACK")
                    .await
                    .map_err(StorageError::backend)?;
                tracing::debug!("postgres transaction rolled back");
                Ok(())
            }
            None => Err(StorageError::NoActiveTransaction),
        }
    }

    /// Remove every row. Test support, not part of the storage contract.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let pool = self.pool()?;
        sqlx::query("DELETE FROM collections")
            .execute(&pool)
            .await
            .map_err(StorageError::backend)?;
        sqlx::query("DELETE FROM accounts")
            .execute(&pool)
            .await
            .map_err(StorageError::backend)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for PostgresStore {
    async fn connect(&self) -> Result<(), StorageError> {
        if self.pool.read().unwrap().is_some() {
            return Ok(());
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&self.url)
            .await
            .map_err(StorageError::connection)?;
        Self::init_schema(&pool).await?;

        let mut slot = self.pool.write().unwrap();
        if slot.is_none() {
            *slot = Some(pool);
            tracing::debug!("postgres store connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        {
            let mut session = self.session.lock().await;
            if session.take().is_some() {
                tracing::warn!("disconnecting with an open transaction; dropping it");
            }
        }
        let pool = self.pool.write().unwrap().take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::debug!("postgres store disconnected");
        }
        Ok(())
    }

    async fn create_account(&self, data: &NewAccount) -> Result<Account, StorageError> {
        data.validate()?;
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::create_account(&mut **conn, data).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::create_account(&pool, data).await
            }
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
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::account_by_id(&mut **conn, native).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::account_by_id(&pool, native).await
            }
        }
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::account_by_email(&mut **conn, email).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::account_by_email(&pool, email).await
            }
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
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => {
                queries::update_account_collections(&mut **conn, native, collection_ids).await
            }
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::update_account_collections(&pool, native, collection_ids).await
            }
        }
    }

    async fn create_collection(&self, data: &NewCollection) -> Result<Collection, StorageError> {
        data.validate()?;
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::create_collection(&mut **conn, data).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::create_collection(&pool, data).await
            }
        }
    }

    async fn find_collection_by_id(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        let native = match decode_id(id) {
            Some(native) => native,
            None => {
                tracing::warn!(id, "rejecting malformed collection id");
                return Ok(None);
            }
        };
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::collection_by_id(&mut **conn, native).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::collection_by_id(&pool, native).await
            }
        }
    }

    async fn find_collections_by_owner_email(
        &self,
        email: &str,
    ) -> Result<Vec<Collection>, StorageError> {
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::collections_by_owner_email(&mut **conn, email).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::collections_by_owner_email(&pool, email).await
            }
        }
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
        let mut session = self.session.lock().await;
        match session.as_mut() {
            Some(conn) => queries::update_collection(&mut **conn, native, data).await,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::update_collection(&pool, native, data).await
            }
        }
    }

    async fn delete_collection(&self, id: &str) -> Result<bool, StorageError> {
        let native = match decode_id(id) {
            Some(native) => native,
            None => {
                tracing::warn!(id, "rejecting malformed collection id");
                return Ok(false);
            }
        };
        let mut session = self.session.lock().await;
        let deleted = match session.as_mut() {
            Some(conn) => queries::delete_collection(&mut **conn, native).await?,
            None => {
                drop(session);
                let pool = self.pool()?;
                queries::delete_collection(&pool, native).await?
            }
        };
        if deleted {
            tracing::debug!(id, "collection deleted");
        }
        Ok(deleted)
    }
}
