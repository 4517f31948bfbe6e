//! Vector index abstraction
//!
//! The index is a derived, rebuildable projection of the catalog keyed by
//! chunk id. Upserts are idempotent and last-write-wins on identical ids,
//! which makes partial-order delivery from concurrent workers safe.

pub mod memory;
pub mod pgvector;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryIndex;
pub use pgvector::PgVectorIndex;

/// One embedded chunk headed for the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub item_id: Uuid,
    pub source_id: Uuid,
    pub ordinal: i32,
    pub text: String,
    pub token_count: i32,
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
    pub section: Option<String>,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// A ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub item_id: Uuid,
    pub source_id: Uuid,
    pub ordinal: i32,
    pub text: String,
    pub token_count: i32,
    pub section: Option<String>,
    pub metadata: serde_json::Value,
    pub score: f32,
}

/// Metadata constraints applied during search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub source_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
    /// Keys that must match exactly in the chunk metadata map
    /// (e.g. source_kind, content_kind, section)
    pub metadata: Vec<(String, serde_json::Value)>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.source_id.is_none() && self.item_id.is_none() && self.metadata.is_empty()
    }
}

/// Trait for vector storage and similarity search
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Upsert chunk points. Idempotent: re-upserting an id replaces the
    /// existing point.
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<()>;

    /// Top-k cosine similarity search, optionally constrained by metadata
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Remove every point owned by a content item
    async fn delete_by_item(&self, item_id: Uuid) -> Result<()>;

    /// Number of points currently indexed
    async fn count(&self) -> Result<u64>;
}

/// Format an embedding in pgvector's text representation: "[0.1,0.2,...]"
pub(crate) fn embedding_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_literal_format() {
        let embedding = vec![0.1, 0.2, 0.3];
        assert_eq!(embedding_literal(&embedding), "[0.1,0.2,0.3]");
    }
}
