//! Source entity: a registered feed or uploaded document collection

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Source kind enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Feed,
    Document,
}

impl From<String> for SourceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "feed" => SourceKind::Feed,
            _ => SourceKind::Document,
        }
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Feed => "feed".to_string(),
            SourceKind::Document => "document".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// feed | document
    #[sea_orm(column_type = "Text")]
    pub kind: String,

    /// Stable identity: feed URL for feeds, content hash for uploads.
    /// Unique across all sources.
    #[sea_orm(column_type = "Text", unique)]
    pub identity_key: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// Incremental-update cursor: when discovery last ran for this source.
    /// Lives on the row so multiple orchestrator instances share it.
    pub last_polled_at: Option<DateTimeWithTimeZone>,

    /// Publish timestamp of the newest entry seen so far
    pub last_entry_published_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn source_kind(&self) -> SourceKind {
        SourceKind::from(self.kind.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::content_item::Entity")]
    ContentItems,
}

impl Related<super::content_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContentItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
