//! Durable state owned by the pipeline: the published ledger and the
//! publishing credential.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::PersistenceError;
use crate::models::Credential;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Append-only record of listing ids already announced.
#[async_trait]
pub trait PublishedLedger: Send + Sync {
    async fn is_published(&self, listing_id: &str) -> Result<bool, PersistenceError>;

    /// Records `listing_id`. Recording an id that is already present is a no-op.
    async fn record_published(&self, listing_id: &str) -> Result<(), PersistenceError>;

    /// Every recorded id, fetched in a single round-trip.
    async fn all_published_ids(&self) -> Result<HashSet<String>, PersistenceError>;

    async fn published_count(&self) -> Result<u64, PersistenceError>;
}

/// Durable storage for the current access token and its expiry.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credential>, PersistenceError>;

    /// Replaces token and expiry together in one atomic write.
    async fn save(&self, credential: &Credential) -> Result<(), PersistenceError>;

    /// Writes `credential` only if nothing is stored yet. Returns whether it was written.
    async fn seed(&self, credential: &Credential) -> Result<bool, PersistenceError>;
}
