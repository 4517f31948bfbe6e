//! Catalog abstraction over the metadata store
//!
//! The metadata store is the authoritative owner of source/item identity and
//! status. All access goes through the [`Catalog`] trait so the SQL-backed
//! repository and the in-memory implementation (tests, small local runs) are
//! interchangeable.

pub mod memory;

use crate::db::models::{ContentItem, IngestionJob, ItemStatus, JobState, Source, SourceKind};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryCatalog;

/// Deterministic content-item id: uuid v5 of (source_id, identity_key).
///
/// A re-discovered item always resolves to the same row, which is what lets
/// the unique constraint double as the deduplication ledger.
pub fn content_item_id(source_id: Uuid, identity_key: &str) -> Uuid {
    Uuid::new_v5(&source_id, identity_key.as_bytes())
}

/// A content item about to enter the catalog
#[derive(Debug, Clone)]
pub struct NewContentItem {
    pub source_id: Uuid,
    pub identity_key: String,
    pub content_kind: String,
    pub title: Option<String>,
    pub media_url: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Data access contract for sources, content items, and ingestion jobs
#[async_trait]
pub trait Catalog: Send + Sync {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Insert a source, or refresh title/description if the identity key is
    /// already registered. Never creates a duplicate source row.
    async fn upsert_source(
        &self,
        kind: SourceKind,
        identity_key: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Source>;

    async fn find_source(&self, id: Uuid) -> Result<Option<Source>>;

    async fn find_source_by_key(&self, identity_key: &str) -> Result<Option<Source>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Advance the source's discovery cursor. `newest_entry` only moves
    /// forward; a poll that found nothing newer leaves it untouched.
    async fn touch_source_cursor(
        &self,
        id: Uuid,
        polled_at: DateTime<Utc>,
        newest_entry: Option<DateTime<Utc>>,
    ) -> Result<()>;

    // ========================================================================
    // Content Item Operations (deduplication gate)
    // ========================================================================

    /// Insert a new content item. Fails with [`AppError::DuplicateItem`] when
    /// the (source_id, identity_key) pair was seen before; callers treat that
    /// as "already known", not as an error.
    ///
    /// [`AppError::DuplicateItem`]: crate::errors::AppError::DuplicateItem
    async fn insert_item(&self, item: NewContentItem) -> Result<ContentItem>;

    async fn find_item(&self, id: Uuid) -> Result<Option<ContentItem>>;

    async fn list_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>>;

    async fn count_items(&self, source_id: Uuid) -> Result<u64>;

    async fn update_item_status(
        &self,
        id: Uuid,
        status: ItemStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Record the final chunk-id list and flip the item to `completed`.
    /// Called only after the vector upsert is confirmed, so a crash before
    /// this point leaves the item `processing` and safely retryable.
    async fn commit_item_chunks(&self, id: Uuid, chunk_ids: &[Uuid]) -> Result<()>;

    // ========================================================================
    // Job Operations
    // ========================================================================

    async fn create_job(&self, item_id: Uuid) -> Result<IngestionJob>;

    async fn find_job(&self, id: Uuid) -> Result<Option<IngestionJob>>;

    async fn find_job_for_item(&self, item_id: Uuid) -> Result<Option<IngestionJob>>;

    async fn update_job(
        &self,
        id: Uuid,
        state: JobState,
        attempt_count: i32,
        last_error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<IngestionJob>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_determinism() {
        let source = Uuid::new_v4();
        let a = content_item_id(source, "guid-123");
        let b = content_item_id(source, "guid-123");
        assert_eq!(a, b);

        let c = content_item_id(source, "guid-124");
        assert_ne!(a, c);

        let other_source = Uuid::new_v4();
        assert_ne!(a, content_item_id(other_source, "guid-123"));
    }
}
