//! Job status handlers

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, FixedOffset};
use recall_common::errors::{AppError, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;

#[derive(Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub item_id: Uuid,
    pub state: String,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
    pub started_at: Option<DateTime<FixedOffset>>,
    pub completed_at: Option<DateTime<FixedOffset>>,
}

/// Fetch one ingestion job
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>> {
    let job = state
        .catalog
        .find_job(id)
        .await?
        .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

    Ok(Json(JobResponse {
        id: job.id,
        item_id: job.item_id,
        state: job.state,
        attempt_count: job.attempt_count,
        last_error: job.last_error,
        next_retry_at: job.next_retry_at,
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
    }))
}
