//! Chat/search query handler
//!
//! Runs the retrieval pipeline and, when the knowledge base is insufficient,
//! merges in web fallback results. Every passage in the response carries an
//! explicit knowledge-base-vs-web attribution, and a fallback provider
//! outage degrades the response instead of failing it.

use axum::{extract::State, Json};
use recall_common::{
    errors::{AppError, Result},
    index::SearchFilter,
};
use recall_retrieval::{
    context::ContextPassage,
    disambiguation::EntityCandidate,
    engine::QueryOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    #[serde(default)]
    pub filters: QueryFilters,
}

/// Metadata filters accepted by search
#[derive(Debug, Default, Deserialize)]
pub struct QueryFilters {
    /// feed | document
    pub source_kind: Option<String>,
    pub source_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
    /// audio | pdf | text
    pub content_kind: Option<String>,
    pub section: Option<String>,
}

impl QueryFilters {
    fn to_search_filter(&self) -> SearchFilter {
        let mut metadata = Vec::new();
        if let Some(kind) = &self.source_kind {
            metadata.push(("source_kind".to_string(), json!(kind)));
        }
        if let Some(content_kind) = &self.content_kind {
            metadata.push(("content_kind".to_string(), json!(content_kind)));
        }
        if let Some(section) = &self.section {
            metadata.push(("section".to_string(), json!(section)));
        }

        SearchFilter {
            source_id: self.source_id,
            item_id: self.item_id,
            metadata,
        }
    }
}

/// Query response
#[derive(Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub outcome: QueryOutcome,
    /// Knowledge-base and web passages, each explicitly attributed
    pub passages: Vec<ContextPassage>,
    /// Present only for `needs_disambiguation`; the caller resolves it by
    /// asking the user
    pub candidates: Vec<EntityCandidate>,
    pub best_score: Option<f32>,
    pub kb_passage_count: usize,
    pub web_passage_count: usize,
    /// True when the fallback provider was needed but unreachable
    pub fallback_unavailable: bool,
    /// True when the query deadline cut the pipeline short
    pub truncated: bool,
    pub processing_time_ms: u64,
}

/// Handle a chat/search query
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let filters = request.filters.to_search_filter();
    let ctx = state.engine.handle_query(&request.query, filters).await?;

    let mut passages = ctx.passages.clone();
    let kb_passage_count = passages.len();
    let mut web_passage_count = 0;
    let mut fallback_unavailable = false;

    // Fallback runs at most once per query, and only when the knowledge
    // base was insufficient. Existing KB passages are kept alongside.
    if ctx.outcome == QueryOutcome::InsufficientKb && !ctx.truncated {
        let fallback = state.fallback.run(&ctx.query).await;
        fallback_unavailable = !fallback.available;
        web_passage_count = fallback.passages.len();
        passages.extend(fallback.passages);
    }

    let processing_time_ms = start.elapsed().as_millis() as u64;
    let best_score = ctx.best_score();

    tracing::info!(
        query = %request.query,
        outcome = ctx.outcome.as_str(),
        kb_passages = kb_passage_count,
        web_passages = web_passage_count,
        latency_ms = processing_time_ms,
        "Query completed"
    );

    Ok(Json(QueryResponse {
        query: ctx.query,
        outcome: ctx.outcome,
        passages,
        candidates: ctx.candidates,
        best_score,
        kb_passage_count,
        web_passage_count,
        fallback_unavailable,
        truncated: ctx.truncated,
        processing_time_ms,
    }))
}
