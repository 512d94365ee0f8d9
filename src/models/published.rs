use serde::Serialize;

/// Proof that a listing has been announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PublishedRecord {
    pub id: i64,
    pub listing_id: String,
}
