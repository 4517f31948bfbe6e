//! ContentItem entity: one feed entry or one uploaded document
//!
//! Uniqueness on (source_id, identity_key) is the deduplication mechanism:
//! an insert that violates it means the item was already processed.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Processing status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<String> for ItemStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => ItemStatus::Processing,
            "completed" => ItemStatus::Completed,
            "failed" => ItemStatus::Failed,
            _ => ItemStatus::Pending,
        }
    }
}

impl From<ItemStatus> for String {
    fn from(status: ItemStatus) -> Self {
        match status {
            ItemStatus::Pending => "pending".to_string(),
            ItemStatus::Processing => "processing".to_string(),
            ItemStatus::Completed => "completed".to_string(),
            ItemStatus::Failed => "failed".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content_items")]
pub struct Model {
    /// Deterministic: uuid v5 of (source_id, identity_key), so a re-discovered
    /// item always resolves to the same row.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub source_id: Uuid,

    /// Feed-entry GUID or upload content hash; unique within the source
    #[sea_orm(column_type = "Text")]
    pub identity_key: String,

    /// audio | pdf | text
    #[sea_orm(column_type = "Text")]
    pub content_kind: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    /// Remote media to fetch at processing time (feed entries)
    #[sea_orm(column_type = "Text", nullable)]
    pub media_url: Option<String>,

    /// Inline payload captured at registration time (uploads)
    #[sea_orm(nullable)]
    pub payload: Option<Vec<u8>>,

    /// pending | processing | completed | failed
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Chunk ids owned by this item, written only after the vector upsert
    /// is confirmed
    #[sea_orm(nullable)]
    pub chunk_ids: Option<Json>,

    pub published_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the item status as an enum
    pub fn item_status(&self) -> ItemStatus {
        ItemStatus::from(self.status.clone())
    }

    /// Decode the owned chunk-id list
    pub fn owned_chunk_ids(&self) -> Vec<Uuid> {
        self.chunk_ids
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn content_kind(&self) -> crate::extract::ContentKind {
        crate::extract::ContentKind::from(self.content_kind.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::source::Entity",
        from = "Column::SourceId",
        to = "super::source::Column::Id"
    )]
    Source,

    #[sea_orm(has_many = "super::chunk::Entity")]
    Chunks,

    #[sea_orm(has_many = "super::ingestion_job::Entity")]
    Jobs,
}

impl Related<super::source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Source.def()
    }
}

impl Related<super::chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
