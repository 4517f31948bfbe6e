//! Content generation handler
//!
//! Assembles a retrieval context package for a downstream LLM. The prompts
//! and the generation call itself live outside this service; this endpoint
//! returns the attributed passages and a prompt-ready context block.

use axum::{extract::State, Json};
use recall_common::{
    errors::{AppError, Result},
    index::SearchFilter,
};
use recall_retrieval::{
    context::{render_context, ContextPassage},
    disambiguation::EntityCandidate,
    engine::QueryOutcome,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;

/// Generation request
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    /// Topic or instruction the caller wants content about
    #[validate(length(min = 1, max = 1000))]
    pub topic: String,
}

/// Generation context package
#[derive(Serialize)]
pub struct GenerateResponse {
    pub topic: String,
    pub outcome: QueryOutcome,
    /// Prompt-ready context block rendered from the passages
    pub context: String,
    pub passages: Vec<ContextPassage>,
    pub candidates: Vec<EntityCandidate>,
    pub fallback_unavailable: bool,
    pub truncated: bool,
}

/// Build a generation context from the knowledge base (with web fallback)
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let ctx = state
        .engine
        .handle_query(&request.topic, SearchFilter::default())
        .await?;

    let mut passages = ctx.passages.clone();
    let mut fallback_unavailable = false;

    if ctx.outcome == QueryOutcome::InsufficientKb && !ctx.truncated {
        let fallback = state.fallback.run(&ctx.query).await;
        fallback_unavailable = !fallback.available;
        passages.extend(fallback.passages);
    }

    Ok(Json(GenerateResponse {
        topic: request.topic,
        outcome: ctx.outcome,
        context: render_context(&passages),
        passages,
        candidates: ctx.candidates,
        fallback_unavailable,
        truncated: ctx.truncated,
    }))
}
