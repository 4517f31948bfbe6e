//! In-memory [`VectorIndex`] for tests and database-less runs
//!
//! Brute-force cosine similarity over all stored vectors, behind a
//! `std::sync::RwLock`. Last-write-wins by chunk id, same as the SQL upsert.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;

use super::{ChunkPoint, SearchFilter, SearchHit, VectorIndex};

/// In-memory vector index
#[derive(Default)]
pub struct MemoryIndex {
    points: RwLock<HashMap<Uuid, ChunkPoint>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn matches_filter(point: &ChunkPoint, filter: &SearchFilter) -> bool {
    if let Some(source_id) = filter.source_id {
        if point.source_id != source_id {
            return false;
        }
    }
    if let Some(item_id) = filter.item_id {
        if point.item_id != item_id {
            return false;
        }
    }
    filter
        .metadata
        .iter()
        .all(|(key, value)| point.metadata.get(key) == Some(value))
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<()> {
        let mut stored = self.points.write().unwrap();
        for point in points {
            stored.insert(point.id, point);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let points = self.points.read().unwrap();
        let mut hits: Vec<SearchHit> = points
            .values()
            .filter(|p| matches_filter(p, filter))
            .map(|p| SearchHit {
                chunk_id: p.id,
                item_id: p.item_id,
                source_id: p.source_id,
                ordinal: p.ordinal,
                text: p.text.clone(),
                token_count: p.token_count,
                section: p.section.clone(),
                metadata: p.metadata.clone(),
                score: cosine_sim(query, &p.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_item(&self, item_id: Uuid) -> Result<()> {
        self.points
            .write()
            .unwrap()
            .retain(|_, p| p.item_id != item_id);
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.points.read().unwrap().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: Uuid, embedding: Vec<f32>, metadata: serde_json::Value) -> ChunkPoint {
        ChunkPoint {
            id,
            item_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            ordinal: 0,
            text: "chunk text".to_string(),
            token_count: 2,
            start_secs: None,
            end_secs: None,
            section: None,
            metadata,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = MemoryIndex::new();
        let id = Uuid::new_v4();

        index
            .upsert(vec![point(id, vec![1.0, 0.0], json!({}))])
            .await
            .unwrap();
        index
            .upsert(vec![point(id, vec![1.0, 0.0], json!({}))])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine() {
        let index = MemoryIndex::new();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();

        index
            .upsert(vec![
                point(close, vec![1.0, 0.0], json!({})),
                point(far, vec![0.0, 1.0], json!({})),
            ])
            .await
            .unwrap();

        let hits = index
            .search(&[1.0, 0.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, close);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_metadata_filter() {
        let index = MemoryIndex::new();
        let audio = Uuid::new_v4();
        let doc = Uuid::new_v4();

        index
            .upsert(vec![
                point(audio, vec![1.0, 0.0], json!({"source_kind": "feed"})),
                point(doc, vec![1.0, 0.0], json!({"source_kind": "document"})),
            ])
            .await
            .unwrap();

        let filter = SearchFilter {
            metadata: vec![("source_kind".to_string(), json!("feed"))],
            ..Default::default()
        };
        let hits = index.search(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, audio);
    }
}
