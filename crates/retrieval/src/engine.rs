//! Query-time retrieval pipeline
//!
//! Sequential per query, no shared mutable state across queries:
//! embed → search → relevance threshold → disambiguation → context assembly.
//! Every awaited step runs under the query deadline; exceeding it returns the
//! partial context flagged `truncated`, never a fatal error.

use recall_common::config::RetrievalConfig;
use recall_common::embeddings::Embedder;
use recall_common::errors::Result;
use recall_common::index::{SearchFilter, SearchHit, VectorIndex};
use recall_common::metrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::context::{assemble_context, ContextPassage};
use crate::disambiguation::{disambiguate, EntityCandidate};

/// Terminal outcome of the retrieval pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The knowledge base answered the query
    AnsweredFromKb,
    /// Hits span multiple entities; the caller must ask the user.
    /// This is a terminal outcome, not a failure.
    NeedsDisambiguation,
    /// Best hit fell below the relevance threshold (or no hits); the
    /// fallback coordinator takes over
    InsufficientKb,
}

impl QueryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOutcome::AnsweredFromKb => "answered_from_kb",
            QueryOutcome::NeedsDisambiguation => "needs_disambiguation",
            QueryOutcome::InsufficientKb => "insufficient_kb",
        }
    }
}

/// Transient per-request pipeline state
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    pub query: String,
    #[serde(skip)]
    pub query_embedding: Vec<f32>,
    pub hits: Vec<SearchHit>,
    pub outcome: QueryOutcome,
    /// Present only for `needs_disambiguation`
    pub candidates: Vec<EntityCandidate>,
    pub passages: Vec<ContextPassage>,
    /// Set when the query deadline cut the pipeline short
    pub truncated: bool,
}

impl QueryContext {
    fn started(query: &str) -> Self {
        Self {
            query: query.to_string(),
            query_embedding: Vec::new(),
            hits: Vec::new(),
            outcome: QueryOutcome::InsufficientKb,
            candidates: Vec::new(),
            passages: Vec::new(),
            truncated: false,
        }
    }

    /// Best similarity score among hits, if any
    pub fn best_score(&self) -> Option<f32> {
        self.hits
            .iter()
            .map(|h| h.score)
            .fold(None, |acc: Option<f32>, s| {
                Some(acc.map_or(s, |a| a.max(s)))
            })
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub top_k: usize,
    pub relevance_threshold: f32,
    pub max_entity_groups: usize,
    pub context_token_budget: usize,
    pub deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            relevance_threshold: 0.7,
            max_entity_groups: 5,
            context_token_budget: 4000,
            deadline: Duration::from_secs(8),
        }
    }
}

impl From<&RetrievalConfig> for EngineConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            relevance_threshold: config.relevance_threshold,
            max_entity_groups: config.max_entity_groups,
            context_token_budget: config.context_token_budget,
            deadline: Duration::from_millis(config.query_deadline_ms),
        }
    }
}

/// Whether the knowledge base counts as sufficient for this query.
/// The threshold boundary is inclusive.
pub fn kb_sufficient(best_score: Option<f32>, threshold: f32) -> bool {
    best_score.map_or(false, |score| score >= threshold)
}

/// Collapse whitespace and bound the query length before embedding
pub fn normalize_query(query: &str) -> String {
    let collapsed: String = query.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(1000).collect()
}

/// The retrieval engine
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: EngineConfig,
}

enum StepResult<T> {
    Done(T),
    Degraded(String),
    DeadlineHit,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: EngineConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Run one step under the remaining deadline budget.
    ///
    /// Transient provider failures degrade the query instead of failing it;
    /// everything else propagates.
    async fn step<T, F>(&self, deadline: Instant, fut: F) -> Result<StepResult<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(StepResult::DeadlineHit);
        }

        match tokio::time::timeout(remaining, fut).await {
            Ok(Ok(value)) => Ok(StepResult::Done(value)),
            Ok(Err(e)) if e.is_transient() => Ok(StepResult::Degraded(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(StepResult::DeadlineHit),
        }
    }

    /// Run the full query pipeline
    #[instrument(skip(self, filters), fields(query_len = query.len()))]
    pub async fn handle_query(&self, query: &str, filters: SearchFilter) -> Result<QueryContext> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut ctx = QueryContext::started(query);

        // Step 1: embed the query with the same client used at ingestion time
        let normalized = normalize_query(query);
        match self.step(deadline, self.embedder.embed(&normalized)).await? {
            StepResult::Done(embedding) => ctx.query_embedding = embedding,
            StepResult::Degraded(reason) => {
                warn!(reason = %reason, "Embedding degraded, declaring KB insufficient");
                return Ok(self.finish(ctx, started));
            }
            StepResult::DeadlineHit => {
                ctx.truncated = true;
                return Ok(self.finish(ctx, started));
            }
        }

        // Step 2: top-K similarity search with metadata filters
        let search = self
            .index
            .search(&ctx.query_embedding, self.config.top_k, &filters);
        match self.step(deadline, search).await? {
            StepResult::Done(hits) => ctx.hits = hits,
            StepResult::Degraded(reason) => {
                warn!(reason = %reason, "Index degraded, declaring KB insufficient");
                return Ok(self.finish(ctx, started));
            }
            StepResult::DeadlineHit => {
                ctx.truncated = true;
                return Ok(self.finish(ctx, started));
            }
        }

        // Step 3: relevance decision (inclusive boundary)
        if !kb_sufficient(ctx.best_score(), self.config.relevance_threshold) {
            // Below-threshold hits stay in the context so the fallback can
            // present them alongside web results
            ctx.passages = assemble_context(&ctx.hits, self.config.context_token_budget);
            ctx.outcome = QueryOutcome::InsufficientKb;
            return Ok(self.finish(ctx, started));
        }

        // Step 4: disambiguation over hits that survived the threshold
        let surviving: Vec<SearchHit> = ctx
            .hits
            .iter()
            .filter(|h| h.score >= self.config.relevance_threshold)
            .cloned()
            .collect();

        if let Some(candidates) = disambiguate(&surviving, self.config.max_entity_groups) {
            ctx.candidates = candidates;
            ctx.outcome = QueryOutcome::NeedsDisambiguation;
            return Ok(self.finish(ctx, started));
        }

        // Step 5: context assembly, whole chunks only
        ctx.passages = assemble_context(&surviving, self.config.context_token_budget);
        ctx.outcome = QueryOutcome::AnsweredFromKb;
        Ok(self.finish(ctx, started))
    }

    fn finish(&self, ctx: QueryContext, started: Instant) -> QueryContext {
        metrics::record_query(ctx.outcome.as_str(), started.elapsed().as_secs_f64());
        info!(
            outcome = ctx.outcome.as_str(),
            hits = ctx.hits.len(),
            passages = ctx.passages.len(),
            truncated = ctx.truncated,
            "Query pipeline finished"
        );
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_common::errors::AppError;
    use recall_common::index::{ChunkPoint, MemoryIndex};
    use serde_json::json;
    use uuid::Uuid;

    /// Embedder that maps known queries to fixed vectors
    struct StubEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }

        fn model_name(&self) -> &str {
            "stub"
        }

        fn dimension(&self) -> usize {
            self.vector.len()
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(Vec::new())
        }

        fn model_name(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::ProviderUnavailable {
                provider: "embedding".to_string(),
                message: "connection refused".to_string(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::ProviderUnavailable {
                provider: "embedding".to_string(),
                message: "connection refused".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "down"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn point(entity: &str, embedding: Vec<f32>, text: &str) -> ChunkPoint {
        ChunkPoint {
            id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            ordinal: 0,
            text: text.to_string(),
            token_count: 10,
            start_secs: None,
            end_secs: None,
            section: None,
            metadata: json!({"entity": entity, "item_title": text}),
            embedding,
        }
    }

    fn engine_with(
        embedder: Arc<dyn Embedder>,
        index: Arc<MemoryIndex>,
        threshold: f32,
    ) -> RetrievalEngine {
        RetrievalEngine::new(
            embedder,
            index,
            EngineConfig {
                relevance_threshold: threshold,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        assert!(kb_sufficient(Some(0.7), 0.7));
        assert!(!kb_sufficient(Some(0.699_999), 0.7));
        assert!(kb_sufficient(Some(0.700_001), 0.7));
        assert!(!kb_sufficient(None, 0.7));
    }

    #[test]
    fn test_normalize_query_collapses_whitespace() {
        assert_eq!(normalize_query("  what   about\nthis  "), "what about this");
    }

    #[tokio::test]
    async fn test_answered_from_kb_single_entity() {
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(vec![
                point("Deep Dives", vec![1.0, 0.0], "Episode about databases"),
                point("Deep Dives", vec![0.9, 0.1], "Episode about indexes"),
            ])
            .await
            .unwrap();

        let embedder = Arc::new(StubEmbedder {
            vector: vec![1.0, 0.0],
        });
        let engine = engine_with(embedder, index, 0.5);

        let ctx = engine
            .handle_query("tell me about databases", SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(ctx.outcome, QueryOutcome::AnsweredFromKb);
        assert!(!ctx.passages.is_empty());
        assert!(ctx.candidates.is_empty());
        assert!(!ctx.truncated);
    }

    #[tokio::test]
    async fn test_low_best_score_is_insufficient_kb() {
        let index = Arc::new(MemoryIndex::new());
        // Orthogonal to the query vector: score ~0
        index
            .upsert(vec![point("Show", vec![0.0, 1.0], "Unrelated episode")])
            .await
            .unwrap();

        let embedder = Arc::new(StubEmbedder {
            vector: vec![1.0, 0.0],
        });
        let engine = engine_with(embedder, index, 0.7);

        let ctx = engine
            .handle_query("anything", SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(ctx.outcome, QueryOutcome::InsufficientKb);
        // Below-threshold hits are kept for the fallback merge
        assert_eq!(ctx.hits.len(), 1);
        assert_eq!(ctx.passages.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_index_is_insufficient_kb() {
        let engine = engine_with(
            Arc::new(StubEmbedder {
                vector: vec![1.0, 0.0],
            }),
            Arc::new(MemoryIndex::new()),
            0.7,
        );

        let ctx = engine
            .handle_query("anything", SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(ctx.outcome, QueryOutcome::InsufficientKb);
        assert!(ctx.hits.is_empty());
    }

    #[tokio::test]
    async fn test_two_entities_above_threshold_need_disambiguation() {
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(vec![
                point("John Smith (author)", vec![1.0, 0.0], "The author's novel"),
                point(
                    "John Smith (economist)",
                    vec![0.95, 0.05],
                    "The economist's paper",
                ),
            ])
            .await
            .unwrap();

        let embedder = Arc::new(StubEmbedder {
            vector: vec![1.0, 0.0],
        });
        let engine = engine_with(embedder, index, 0.5);

        let ctx = engine
            .handle_query("who is john smith", SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(ctx.outcome, QueryOutcome::NeedsDisambiguation);
        assert_eq!(ctx.candidates.len(), 2);
        // Halted: no merged answer is assembled
        assert!(ctx.passages.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_returns_truncated_partial_context() {
        let engine = RetrievalEngine::new(
            Arc::new(SlowEmbedder),
            Arc::new(MemoryIndex::new()),
            EngineConfig {
                deadline: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let ctx = engine
            .handle_query("slow question", SearchFilter::default())
            .await
            .unwrap();

        assert!(ctx.truncated);
        assert_eq!(ctx.outcome, QueryOutcome::InsufficientKb);
    }

    #[tokio::test]
    async fn test_embedder_outage_degrades_not_fails() {
        let engine = engine_with(Arc::new(DownEmbedder), Arc::new(MemoryIndex::new()), 0.7);

        let ctx = engine
            .handle_query("anything", SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(ctx.outcome, QueryOutcome::InsufficientKb);
        assert!(ctx.hits.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_filter_restricts_hits() {
        let index = Arc::new(MemoryIndex::new());
        let mut feed_point = point("Show", vec![1.0, 0.0], "feed chunk");
        feed_point.metadata = json!({"entity": "Show", "source_kind": "feed"});
        let mut doc_point = point("Doc", vec![1.0, 0.0], "doc chunk");
        doc_point.metadata = json!({"entity": "Doc", "source_kind": "document"});
        index.upsert(vec![feed_point, doc_point]).await.unwrap();

        let embedder = Arc::new(StubEmbedder {
            vector: vec![1.0, 0.0],
        });
        let engine = engine_with(embedder, index, 0.5);

        let filter = SearchFilter {
            metadata: vec![("source_kind".to_string(), json!("feed"))],
            ..Default::default()
        };
        let ctx = engine.handle_query("anything", filter).await.unwrap();

        // Only the feed chunk matches, so one entity answers cleanly
        assert_eq!(ctx.outcome, QueryOutcome::AnsweredFromKb);
        assert_eq!(ctx.hits.len(), 1);
        assert_eq!(ctx.hits[0].text, "feed chunk");
    }
}
