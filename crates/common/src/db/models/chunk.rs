//! Chunk entity: the indexed projection of one embedded text span

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    /// Deterministic: uuid v5 of (item_id, ordinal). Re-ingesting an item
    /// overwrites the same rows instead of creating duplicates.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub item_id: Uuid,

    pub source_id: Uuid,

    /// Zero-based position within the owning item; stable across re-runs
    pub ordinal: i32,

    #[sea_orm(column_type = "Text")]
    pub text: String,

    /// Token estimate for context budgeting
    pub token_count: i32,

    /// Union of the time ranges of the underlying audio segments
    pub start_secs: Option<f64>,

    pub end_secs: Option<f64>,

    /// Nearest enclosing structural label for document chunks
    #[sea_orm(column_type = "Text", nullable)]
    pub section: Option<String>,

    /// Open metadata map used for filtered search (source kind, titles,
    /// per-kind fields)
    pub metadata: Json,

    /// pgvector embedding stored as text for SeaORM compatibility;
    /// vector operations go through raw SQL
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    /// Embedding model identifier for versioning
    #[sea_orm(column_type = "Text")]
    pub embedding_model: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::content_item::Entity",
        from = "Column::ItemId",
        to = "super::content_item::Column::Id",
        on_delete = "Cascade"
    )]
    ContentItem,
}

impl Related<super::content_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContentItem.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse embedding from stored text format to Vec<f32>
    pub fn parse_embedding(&self) -> Option<Vec<f32>> {
        self.embedding.as_ref().and_then(|s| {
            // Format: "[1.0,2.0,3.0,...]"
            let inner = s.trim_start_matches('[').trim_end_matches(']');
            inner
                .split(',')
                .map(|v| v.trim().parse::<f32>().ok())
                .collect()
        })
    }
}
