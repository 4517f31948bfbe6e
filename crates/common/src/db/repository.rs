//! SQL-backed catalog over the metadata store
//!
//! Implements [`Catalog`] with SeaORM. The deduplication gate is a plain
//! insert against the unique (source_id, identity_key) index: a unique-
//! constraint violation is mapped to `DuplicateItem`, which callers treat as
//! "already known" rather than a failure.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::store::{content_item_id, Catalog, NewContentItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use uuid::Uuid;

/// Catalog backed by Postgres
#[derive(Clone)]
pub struct SqlCatalog {
    pool: DbPool,
}

impl SqlCatalog {
    /// Create a new catalog with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

#[async_trait]
impl Catalog for SqlCatalog {
    // ========================================================================
    // Source Operations
    // ========================================================================

    async fn upsert_source(
        &self,
        kind: SourceKind,
        identity_key: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Source> {
        if let Some(existing) = self.find_source_by_key(identity_key).await? {
            let mut active: SourceActiveModel = existing.into();
            if let Some(title) = title {
                active.title = Set(Some(title));
            }
            if let Some(description) = description {
                active.description = Set(Some(description));
            }
            active.updated_at = Set(Utc::now().into());
            return active.update(self.write_conn()).await.map_err(Into::into);
        }

        let now = Utc::now();
        let source = SourceActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(String::from(kind)),
            identity_key: Set(identity_key.to_string()),
            title: Set(title),
            description: Set(description),
            last_polled_at: Set(None),
            last_entry_published_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match source.insert(self.write_conn()).await {
            Ok(source) => Ok(source),
            // Two registrations racing on the same key: the loser re-reads
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => self
                .find_source_by_key(identity_key)
                .await?
                .ok_or_else(|| AppError::SourceNotFound {
                    id: identity_key.to_string(),
                }),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_source(&self, id: Uuid) -> Result<Option<Source>> {
        SourceEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_source_by_key(&self, identity_key: &str) -> Result<Option<Source>> {
        SourceEntity::find()
            .filter(SourceColumn::IdentityKey.eq(identity_key))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        SourceEntity::find()
            .order_by_asc(SourceColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn touch_source_cursor(
        &self,
        id: Uuid,
        polled_at: DateTime<Utc>,
        newest_entry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let source = self
            .find_source(id)
            .await?
            .ok_or_else(|| AppError::SourceNotFound { id: id.to_string() })?;

        let previous = source.last_entry_published_at;
        let mut active: SourceActiveModel = source.into();
        active.last_polled_at = Set(Some(polled_at.into()));
        if let Some(newest) = newest_entry {
            let newest = newest.into();
            if previous.map_or(true, |prev| newest > prev) {
                active.last_entry_published_at = Set(Some(newest));
            }
        }
        active.updated_at = Set(Utc::now().into());
        active.update(self.write_conn()).await?;
        Ok(())
    }

    // ========================================================================
    // Content Item Operations (deduplication gate)
    // ========================================================================

    async fn insert_item(&self, item: NewContentItem) -> Result<ContentItem> {
        let id = content_item_id(item.source_id, &item.identity_key);
        let now = Utc::now();

        let record = ContentItemActiveModel {
            id: Set(id),
            source_id: Set(item.source_id),
            identity_key: Set(item.identity_key.clone()),
            content_kind: Set(item.content_kind),
            title: Set(item.title),
            media_url: Set(item.media_url),
            payload: Set(item.payload),
            status: Set(String::from(ItemStatus::Pending)),
            error_message: Set(None),
            chunk_ids: Set(None),
            published_at: Set(item.published_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match record.insert(self.write_conn()).await {
            Ok(model) => Ok(model),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(AppError::DuplicateItem {
                    source_id: item.source_id,
                    identity_key: item.identity_key,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_item(&self, id: Uuid) -> Result<Option<ContentItem>> {
        ContentItemEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>> {
        ContentItemEntity::find()
            .filter(ContentItemColumn::SourceId.eq(source_id))
            .order_by_asc(ContentItemColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn count_items(&self, source_id: Uuid) -> Result<u64> {
        ContentItemEntity::find()
            .filter(ContentItemColumn::SourceId.eq(source_id))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_item_status(
        &self,
        id: Uuid,
        status: ItemStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let item = self
            .find_item(id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound { id: id.to_string() })?;

        let mut active: ContentItemActiveModel = item.into();
        active.status = Set(String::from(status));
        active.error_message = Set(error_message);
        active.updated_at = Set(Utc::now().into());
        active.update(self.write_conn()).await?;
        Ok(())
    }

    async fn commit_item_chunks(&self, id: Uuid, chunk_ids: &[Uuid]) -> Result<()> {
        let item = self
            .find_item(id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound { id: id.to_string() })?;

        let mut active: ContentItemActiveModel = item.into();
        active.chunk_ids = Set(Some(serde_json::to_value(chunk_ids)?));
        active.status = Set(String::from(ItemStatus::Completed));
        active.error_message = Set(None);
        active.updated_at = Set(Utc::now().into());
        active.update(self.write_conn()).await?;
        Ok(())
    }

    // ========================================================================
    // Job Operations
    // ========================================================================

    async fn create_job(&self, item_id: Uuid) -> Result<IngestionJob> {
        let now = Utc::now();
        let job = IngestionJobActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(item_id),
            state: Set(String::from(JobState::Queued)),
            attempt_count: Set(0),
            last_error: Set(None),
            next_retry_at: Set(None),
            created_at: Set(now.into()),
            started_at: Set(None),
            completed_at: Set(None),
        };

        job.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        IngestionJobEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_job_for_item(&self, item_id: Uuid) -> Result<Option<IngestionJob>> {
        IngestionJobEntity::find()
            .filter(IngestionJobColumn::ItemId.eq(item_id))
            .order_by_desc(IngestionJobColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_job(
        &self,
        id: Uuid,
        state: JobState,
        attempt_count: i32,
        last_error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<IngestionJob> {
        let job = self
            .find_job(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

        let now = Utc::now();
        let started_at = job.started_at;
        let mut active: IngestionJobActiveModel = job.into();

        if state == JobState::Running && started_at.is_none() {
            active.started_at = Set(Some(now.into()));
        }
        if matches!(state, JobState::Succeeded | JobState::FailedTerminal) {
            active.completed_at = Set(Some(now.into()));
        }
        active.state = Set(String::from(state));
        active.attempt_count = Set(attempt_count);
        active.last_error = Set(last_error);
        active.next_retry_at = Set(next_retry_at.map(Into::into));

        active.update(self.write_conn()).await.map_err(Into::into)
    }
}
