use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use super::{CredentialStore, PublishedLedger};
use crate::errors::PersistenceError;
use crate::models::{Credential, PublishedRecord};

/// Row name of the single publishing credential.
const CREDENTIAL_NAME: &str = "instagram";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, migrated and ready. One connection that is
    /// never recycled, since every new connection would see an empty database.
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Ledger Operations --

    pub async fn list_published(&self) -> Result<Vec<PublishedRecord>, PersistenceError> {
        let rows = sqlx::query_as::<_, PublishedRecord>(
            "SELECT id, listing_id FROM posted_media ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl PublishedLedger for SqliteStore {
    async fn is_published(&self, listing_id: &str) -> Result<bool, PersistenceError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM posted_media WHERE listing_id = ?1)",
        )
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_published(&self, listing_id: &str) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"INSERT INTO posted_media (listing_id)
               SELECT ?1
               WHERE NOT EXISTS (SELECT 1 FROM posted_media WHERE listing_id = ?1)"#,
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(listing_id, "listing already in ledger");
        }
        Ok(())
    }

    async fn all_published_ids(&self) -> Result<HashSet<String>, PersistenceError> {
        let ids = sqlx::query_scalar::<_, String>("SELECT DISTINCT listing_id FROM posted_media")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn published_count(&self) -> Result<u64, PersistenceError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT listing_id) FROM posted_media")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn load(&self) -> Result<Option<Credential>, PersistenceError> {
        let row = sqlx::query_as::<_, Credential>(
            "SELECT access_token, expires_at FROM credentials WHERE name = ?1",
        )
        .bind(CREDENTIAL_NAME)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save(&self, credential: &Credential) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"INSERT INTO credentials (name, access_token, expires_at, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (name) DO UPDATE
                   SET access_token = excluded.access_token,
                       expires_at   = excluded.expires_at,
                       updated_at   = excluded.updated_at"#,
        )
        .bind(CREDENTIAL_NAME)
        .bind(&credential.access_token)
        .bind(credential.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn seed(&self, credential: &Credential) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"INSERT INTO credentials (name, access_token, expires_at, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (name) DO NOTHING"#,
        )
        .bind(CREDENTIAL_NAME)
        .bind(&credential.access_token)
        .bind(credential.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
