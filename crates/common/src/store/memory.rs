//! In-memory [`Catalog`] implementation for tests and database-less runs
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. The unique
//! (source_id, identity_key) constraint is enforced through the deterministic
//! item id, exactly like the SQL schema's unique index.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{ContentItem, IngestionJob, ItemStatus, JobState, Source, SourceKind};
use crate::errors::{AppError, Result};

use super::{content_item_id, Catalog, NewContentItem};

/// In-memory catalog for tests and local environments
#[derive(Default)]
pub struct MemoryCatalog {
    sources: RwLock<HashMap<Uuid, Source>>,
    items: RwLock<HashMap<Uuid, ContentItem>>,
    jobs: RwLock<HashMap<Uuid, IngestionJob>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_fixed() -> chrono::DateTime<chrono::FixedOffset> {
    Utc::now().into()
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn upsert_source(
        &self,
        kind: SourceKind,
        identity_key: &str,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Source> {
        let mut sources = self.sources.write().unwrap();

        if let Some(existing) = sources
            .values_mut()
            .find(|s| s.identity_key == identity_key)
        {
            if title.is_some() {
                existing.title = title;
            }
            if description.is_some() {
                existing.description = description;
            }
            existing.updated_at = now_fixed();
            return Ok(existing.clone());
        }

        let now = now_fixed();
        let source = Source {
            id: Uuid::new_v4(),
            kind: String::from(kind),
            identity_key: identity_key.to_string(),
            title,
            description,
            last_polled_at: None,
            last_entry_published_at: None,
            created_at: now,
            updated_at: now,
        };
        sources.insert(source.id, source.clone());
        Ok(source)
    }

    async fn find_source(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.sources.read().unwrap().get(&id).cloned())
    }

    async fn find_source_by_key(&self, identity_key: &str) -> Result<Option<Source>> {
        Ok(self
            .sources
            .read()
            .unwrap()
            .values()
            .find(|s| s.identity_key == identity_key)
            .cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.sources.read().unwrap().values().cloned().collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn touch_source_cursor(
        &self,
        id: Uuid,
        polled_at: DateTime<Utc>,
        newest_entry: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut sources = self.sources.write().unwrap();
        let source = sources.get_mut(&id).ok_or_else(|| AppError::SourceNotFound {
            id: id.to_string(),
        })?;
        source.last_polled_at = Some(polled_at.into());
        if let Some(newest) = newest_entry {
            let newest = newest.into();
            if source.last_entry_published_at.map_or(true, |prev| newest > prev) {
                source.last_entry_published_at = Some(newest);
            }
        }
        source.updated_at = now_fixed();
        Ok(())
    }

    async fn insert_item(&self, item: NewContentItem) -> Result<ContentItem> {
        let id = content_item_id(item.source_id, &item.identity_key);
        let mut items = self.items.write().unwrap();

        if items.contains_key(&id) {
            return Err(AppError::DuplicateItem {
                source_id: item.source_id,
                identity_key: item.identity_key,
            });
        }

        let now = now_fixed();
        let record = ContentItem {
            id,
            source_id: item.source_id,
            identity_key: item.identity_key,
            content_kind: item.content_kind,
            title: item.title,
            media_url: item.media_url,
            payload: item.payload,
            status: String::from(ItemStatus::Pending),
            error_message: None,
            chunk_ids: None,
            published_at: item.published_at.map(Into::into),
            created_at: now,
            updated_at: now,
        };
        items.insert(id, record.clone());
        Ok(record)
    }

    async fn find_item(&self, id: Uuid) -> Result<Option<ContentItem>> {
        Ok(self.items.read().unwrap().get(&id).cloned())
    }

    async fn list_items(&self, source_id: Uuid) -> Result<Vec<ContentItem>> {
        let mut items: Vec<ContentItem> = self
            .items
            .read()
            .unwrap()
            .values()
            .filter(|i| i.source_id == source_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.created_at);
        Ok(items)
    }

    async fn count_items(&self, source_id: Uuid) -> Result<u64> {
        Ok(self
            .items
            .read()
            .unwrap()
            .values()
            .filter(|i| i.source_id == source_id)
            .count() as u64)
    }

    async fn update_item_status(
        &self,
        id: Uuid,
        status: ItemStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut items = self.items.write().unwrap();
        let item = items.get_mut(&id).ok_or_else(|| AppError::ItemNotFound {
            id: id.to_string(),
        })?;
        item.status = String::from(status);
        item.error_message = error_message;
        item.updated_at = now_fixed();
        Ok(())
    }

    async fn commit_item_chunks(&self, id: Uuid, chunk_ids: &[Uuid]) -> Result<()> {
        let mut items = self.items.write().unwrap();
        let item = items.get_mut(&id).ok_or_else(|| AppError::ItemNotFound {
            id: id.to_string(),
        })?;
        item.chunk_ids = Some(serde_json::to_value(chunk_ids)?);
        item.status = String::from(ItemStatus::Completed);
        item.error_message = None;
        item.updated_at = now_fixed();
        Ok(())
    }

    async fn create_job(&self, item_id: Uuid) -> Result<IngestionJob> {
        let now = now_fixed();
        let job = IngestionJob {
            id: Uuid::new_v4(),
            item_id,
            state: String::from(JobState::Queued),
            attempt_count: 0,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn find_job_for_item(&self, item_id: Uuid) -> Result<Option<IngestionJob>> {
        let jobs = self.jobs.read().unwrap();
        let mut found: Vec<&IngestionJob> =
            jobs.values().filter(|j| j.item_id == item_id).collect();
        found.sort_by_key(|j| j.created_at);
        Ok(found.last().map(|j| (*j).clone()))
    }

    async fn update_job(
        &self,
        id: Uuid,
        state: JobState,
        attempt_count: i32,
        last_error: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<IngestionJob> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| AppError::JobNotFound {
            id: id.to_string(),
        })?;

        let now = now_fixed();
        if state == JobState::Running && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if matches!(state, JobState::Succeeded | JobState::FailedTerminal) {
            job.completed_at = Some(now);
        }
        job.state = String::from(state);
        job.attempt_count = attempt_count;
        job.last_error = last_error;
        job.next_retry_at = next_retry_at.map(Into::into);
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_item(source_id: Uuid, key: &str) -> NewContentItem {
        NewContentItem {
            source_id,
            identity_key: key.to_string(),
            content_kind: "text".to_string(),
            title: Some("entry".to_string()),
            media_url: None,
            payload: None,
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_identity_key_rejected() {
        let catalog = MemoryCatalog::new();
        let source = catalog
            .upsert_source(SourceKind::Feed, "https://example.com/feed.xml", None, None)
            .await
            .unwrap();

        catalog.insert_item(new_item(source.id, "guid-1")).await.unwrap();
        let err = catalog
            .insert_item(new_item(source.id, "guid-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateItem { .. }));

        // Same key under a different source is a different item
        let other = catalog
            .upsert_source(SourceKind::Feed, "https://example.com/other.xml", None, None)
            .await
            .unwrap();
        assert!(catalog.insert_item(new_item(other.id, "guid-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_upsert_source_refreshes_metadata() {
        let catalog = MemoryCatalog::new();
        let first = catalog
            .upsert_source(
                SourceKind::Feed,
                "https://example.com/feed.xml",
                Some("Old Title".to_string()),
                None,
            )
            .await
            .unwrap();

        let second = catalog
            .upsert_source(
                SourceKind::Feed,
                "https://example.com/feed.xml",
                Some("New Title".to_string()),
                Some("desc".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.title.as_deref(), Some("New Title"));
        assert_eq!(catalog.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let catalog = MemoryCatalog::new();
        let source = catalog
            .upsert_source(SourceKind::Feed, "https://example.com/feed.xml", None, None)
            .await
            .unwrap();

        let newer = Utc::now();
        let older = newer - chrono::Duration::days(7);

        catalog
            .touch_source_cursor(source.id, newer, Some(newer))
            .await
            .unwrap();
        catalog
            .touch_source_cursor(source.id, newer, Some(older))
            .await
            .unwrap();

        let source = catalog.find_source(source.id).await.unwrap().unwrap();
        assert_eq!(
            source.last_entry_published_at.unwrap().timestamp(),
            newer.timestamp()
        );
    }

    #[tokio::test]
    async fn test_commit_item_chunks_flips_status() {
        let catalog = MemoryCatalog::new();
        let source = catalog
            .upsert_source(SourceKind::Document, "hash-1", None, None)
            .await
            .unwrap();
        let item = catalog.insert_item(new_item(source.id, "hash-1")).await.unwrap();

        let chunk_ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        catalog.commit_item_chunks(item.id, &chunk_ids).await.unwrap();

        let item = catalog.find_item(item.id).await.unwrap().unwrap();
        assert_eq!(item.item_status(), ItemStatus::Completed);
        assert_eq!(item.owned_chunk_ids(), chunk_ids);
    }
}
