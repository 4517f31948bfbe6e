//! Context assembly
//!
//! Concatenates surviving chunks in descending relevance order under a token
//! budget. Truncation is whole-chunk only: a chunk that does not fit is
//! dropped, never cut mid-chunk. Every included passage carries its source
//! attribution.

use recall_common::index::SearchHit;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a passage came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionOrigin {
    KnowledgeBase,
    Web,
}

/// Source attribution attached to each passage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub origin: AttributionOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One passage of assembled context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPassage {
    pub text: String,
    pub score: f32,
    pub token_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub attribution: Attribution,
}

fn hit_attribution(hit: &SearchHit) -> Attribution {
    let title = hit
        .metadata
        .get("item_title")
        .or_else(|| hit.metadata.get("source_title"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Attribution {
        origin: AttributionOrigin::KnowledgeBase,
        source_id: Some(hit.source_id),
        item_id: Some(hit.item_id),
        title,
        url: None,
    }
}

/// Assemble passages from ranked hits under a token budget.
///
/// Hits are taken in descending relevance order; assembly stops at the first
/// chunk that would exceed the budget.
pub fn assemble_context(hits: &[SearchHit], token_budget: usize) -> Vec<ContextPassage> {
    let mut ranked: Vec<&SearchHit> = hits.iter().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut passages = Vec::new();
    let mut spent = 0usize;

    for hit in ranked {
        let cost = hit.token_count.max(0) as usize;
        if spent + cost > token_budget {
            break;
        }
        spent += cost;
        passages.push(ContextPassage {
            text: hit.text.clone(),
            score: hit.score,
            token_count: hit.token_count,
            section: hit.section.clone(),
            attribution: hit_attribution(hit),
        });
    }

    passages
}

/// Render passages into one prompt-ready context block
pub fn render_context(passages: &[ContextPassage]) -> String {
    passages
        .iter()
        .map(|p| {
            let mut label = String::new();
            if let Some(title) = &p.attribution.title {
                label.push_str(&format!("[{}]", title));
            }
            if let Some(section) = &p.section {
                label.push_str(&format!(" [{}]", section));
            }
            if label.is_empty() {
                p.text.clone()
            } else {
                format!("{} {}", label.trim(), p.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(score: f32, tokens: i32, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            ordinal: 0,
            text: text.to_string(),
            token_count: tokens,
            section: None,
            metadata: json!({"item_title": "Episode 1"}),
            score,
        }
    }

    #[test]
    fn test_assembly_orders_by_relevance() {
        let hits = vec![hit(0.5, 10, "low"), hit(0.9, 10, "high"), hit(0.7, 10, "mid")];
        let passages = assemble_context(&hits, 1000);
        let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_budget_truncates_whole_chunks_only() {
        let hits = vec![
            hit(0.9, 40, "first"),
            hit(0.8, 40, "second"),
            hit(0.7, 40, "third"),
        ];

        // Budget fits exactly two chunks; the third is dropped whole
        let passages = assemble_context(&hits, 80);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].text, "first");
        assert_eq!(passages[1].text, "second");
    }

    #[test]
    fn test_every_passage_is_attributed() {
        let hits = vec![hit(0.9, 10, "a"), hit(0.8, 10, "b")];
        let passages = assemble_context(&hits, 1000);
        for passage in &passages {
            assert_eq!(passage.attribution.origin, AttributionOrigin::KnowledgeBase);
            assert!(passage.attribution.item_id.is_some());
            assert_eq!(passage.attribution.title.as_deref(), Some("Episode 1"));
        }
    }

    #[test]
    fn test_render_context_labels_sources() {
        let hits = vec![hit(0.9, 10, "Some spoken words.")];
        let rendered = render_context(&assemble_context(&hits, 1000));
        assert_eq!(rendered, "[Episode 1] Some spoken words.");
    }
}
