//! Disambiguation: detecting when hits span multiple distinct entities
//!
//! Hits are grouped by their distinguishing entity attribute (the `entity`
//! metadata key written at ingestion time, falling back to the owning
//! source). More than one surviving group means the caller has to ask the
//! user which entity they meant; the pipeline never silently picks one.

use recall_common::index::SearchHit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A group of hits belonging to one entity
#[derive(Debug, Clone)]
pub struct EntityGroup {
    pub entity_key: String,
    pub title: String,
    pub hits: Vec<SearchHit>,
    pub combined_score: f32,
}

/// Candidate presented to the user for disambiguation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub entity_key: String,
    pub title: String,
    pub result_count: usize,
    pub combined_score: f32,
    pub sample_text: String,
}

fn entity_key(hit: &SearchHit) -> String {
    hit.metadata
        .get("entity")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| hit.source_id.to_string())
}

fn entity_title(hit: &SearchHit) -> String {
    hit.metadata
        .get("entity")
        .or_else(|| hit.metadata.get("source_title"))
        .or_else(|| hit.metadata.get("item_title"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Source {}", hit.source_id))
}

/// Position-weighted combined score: earlier, higher-scoring hits dominate
fn combined_score(hits: &[SearchHit]) -> f32 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for (i, hit) in hits.iter().enumerate() {
        let position_weight = 1.0 / (i as f32 + 1.0);
        weighted_sum += position_weight * hit.score;
        total_weight += position_weight;
    }

    if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    }
}

/// Group hits by entity, preserving the incoming rank order within groups
pub fn group_by_entity(hits: &[SearchHit]) -> Vec<EntityGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<SearchHit>> = HashMap::new();

    for hit in hits {
        let key = entity_key(hit);
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(hit.clone());
    }

    let mut groups: Vec<EntityGroup> = order
        .into_iter()
        .map(|key| {
            let hits = grouped.remove(&key).unwrap_or_default();
            let title = hits.first().map(entity_title).unwrap_or_else(|| key.clone());
            let combined_score = combined_score(&hits);
            EntityGroup {
                entity_key: key,
                title,
                hits,
                combined_score,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    groups
}

/// Decide whether disambiguation is needed.
///
/// Returns `None` when zero or one entity survives (a clear winner needs no
/// clarification). With multiple entities, returns the candidate list capped
/// at `max_groups`; entities tied with the last kept group are all included.
pub fn disambiguate(hits: &[SearchHit], max_groups: usize) -> Option<Vec<EntityCandidate>> {
    let groups = group_by_entity(hits);

    if groups.len() <= 1 {
        return None;
    }

    let cutoff = groups
        .get(max_groups.saturating_sub(1))
        .map(|g| g.combined_score);

    let candidates: Vec<EntityCandidate> = groups
        .into_iter()
        .enumerate()
        .take_while(|(i, group)| {
            *i < max_groups || cutoff.map_or(false, |c| group.combined_score >= c)
        })
        .map(|(_, group)| {
            let sample_text = group
                .hits
                .first()
                .map(|h| {
                    let mut sample: String = h.text.chars().take(200).collect();
                    if h.text.chars().count() > 200 {
                        sample.push_str("...");
                    }
                    sample
                })
                .unwrap_or_default();

            EntityCandidate {
                entity_key: group.entity_key,
                title: group.title,
                result_count: group.hits.len(),
                combined_score: group.combined_score,
                sample_text,
            }
        })
        .collect();

    Some(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn hit(entity: &str, score: f32) -> SearchHit {
        SearchHit {
            chunk_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            ordinal: 0,
            text: format!("A passage about {}. It goes on for a while.", entity),
            token_count: 12,
            section: None,
            metadata: json!({"entity": entity}),
            score,
        }
    }

    #[test]
    fn test_single_entity_needs_no_disambiguation() {
        let hits = vec![hit("John Smith", 0.9), hit("John Smith", 0.8)];
        assert!(disambiguate(&hits, 5).is_none());
    }

    #[test]
    fn test_two_entities_trigger_disambiguation() {
        let hits = vec![
            hit("John Smith (author)", 0.9),
            hit("John Smith (economist)", 0.85),
        ];

        let candidates = disambiguate(&hits, 5).expect("expected candidates");
        assert_eq!(candidates.len(), 2);

        let titles: Vec<&str> = candidates.iter().map(|c| c.title.as_str()).collect();
        assert!(titles.contains(&"John Smith (author)"));
        assert!(titles.contains(&"John Smith (economist)"));
        assert!(!candidates[0].sample_text.is_empty());
    }

    #[test]
    fn test_groups_ranked_by_combined_score() {
        let hits = vec![
            hit("Weak Entity", 0.4),
            hit("Strong Entity", 0.95),
            hit("Strong Entity", 0.9),
        ];

        let groups = group_by_entity(&hits);
        assert_eq!(groups[0].entity_key, "Strong Entity");
        assert!(groups[0].combined_score > groups[1].combined_score);
    }

    #[test]
    fn test_group_cap_keeps_ties() {
        let hits = vec![
            hit("A", 0.9),
            hit("B", 0.8),
            hit("C", 0.7),
            // D ties with C exactly; the cap must not drop it arbitrarily
            hit("D", 0.7),
        ];

        let candidates = disambiguate(&hits, 3).expect("expected candidates");
        assert_eq!(candidates.len(), 4);
    }

    #[test]
    fn test_missing_entity_falls_back_to_source() {
        let mut a = hit("x", 0.9);
        a.metadata = json!({});
        let mut b = hit("y", 0.8);
        b.metadata = json!({});

        // Different sources, no entity metadata: still two distinct entities
        let candidates = disambiguate(&[a, b], 5).expect("expected candidates");
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_no_hits_no_disambiguation() {
        assert!(disambiguate(&[], 5).is_none());
    }
}
