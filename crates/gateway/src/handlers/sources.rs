//! Source handlers: feed registration, document uploads, item listing

use axum::{
    extract::{Path, State},
    Json,
};
use base64::Engine;
use chrono::{DateTime, FixedOffset};
use recall_common::{
    db::models::{ContentItem, Source},
    errors::{AppError, Result},
    extract::ContentKind,
};
use recall_ingestion::document::{needs_processing, register_document};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;

/// Feed registration request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterFeedRequest {
    #[validate(length(min = 1, max = 2048))]
    pub feed_url: String,
}

/// Document upload request
#[derive(Debug, Deserialize, Validate)]
pub struct UploadDocumentRequest {
    #[validate(length(min = 1, max = 512))]
    pub filename: String,

    /// Base64-encoded file content
    #[validate(length(min = 1))]
    pub content_base64: String,

    /// Declared kind: audio | pdf | text (inferred from filename if absent)
    pub kind: Option<String>,
}

#[derive(Serialize)]
pub struct SourceResponse {
    pub id: Uuid,
    pub kind: String,
    pub identity_key: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub last_polled_at: Option<DateTime<FixedOffset>>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<Source> for SourceResponse {
    fn from(source: Source) -> Self {
        Self {
            id: source.id,
            kind: source.kind,
            identity_key: source.identity_key,
            title: source.title,
            description: source.description,
            last_polled_at: source.last_polled_at,
            created_at: source.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct ItemResponse {
    pub id: Uuid,
    pub source_id: Uuid,
    pub identity_key: String,
    pub content_kind: String,
    pub title: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub chunk_count: usize,
    pub published_at: Option<DateTime<FixedOffset>>,
    pub updated_at: DateTime<FixedOffset>,
}

impl From<ContentItem> for ItemResponse {
    fn from(item: ContentItem) -> Self {
        let chunk_count = item.owned_chunk_ids().len();
        Self {
            id: item.id,
            source_id: item.source_id,
            identity_key: item.identity_key,
            content_kind: item.content_kind,
            title: item.title,
            status: item.status,
            error_message: item.error_message,
            chunk_count,
            published_at: item.published_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub source: SourceResponse,
    pub item: ItemResponse,
    /// True when this content hash was uploaded before
    pub already_known: bool,
    pub job_id: Option<Uuid>,
}

/// Register a feed source and kick off a discovery cycle.
///
/// Discovery and job execution run in the background; this handler only
/// registers and enqueues.
pub async fn register_feed(
    State(state): State<AppState>,
    Json(request): Json<RegisterFeedRequest>,
) -> Result<Json<SourceResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let source = state.discovery.register_feed(&request.feed_url).await?;

    // First discovery cycle runs detached; the poller keeps it fresh after
    let discovery = state.discovery.clone();
    let orchestrator = state.orchestrator.clone();
    let spawned_source = source.clone();
    tokio::spawn(async move {
        match discovery.discover(&spawned_source).await {
            Ok(outcome) => {
                for item in outcome.new_items {
                    if let Err(e) = orchestrator.submit(item.id).await {
                        error!(item_id = %item.id, error = %e, "Failed to enqueue item");
                    }
                }
            }
            Err(e) => {
                error!(source_id = %spawned_source.id, error = %e, "Initial discovery failed");
            }
        }
    });

    Ok(Json(source.into()))
}

/// Upload a document and enqueue it for ingestion
pub async fn upload_document(
    State(state): State<AppState>,
    Json(request): Json<UploadDocumentRequest>,
) -> Result<Json<UploadResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&request.content_base64)
        .map_err(|e| AppError::InvalidFormat {
            message: format!("content_base64 is not valid base64: {}", e),
        })?;

    let kind = request.kind.map(ContentKind::from);
    let registration =
        register_document(state.catalog.as_ref(), &request.filename, kind, bytes).await?;

    // Duplicate uploads of completed items are not reprocessed
    let job_id = if needs_processing(&registration) {
        Some(state.orchestrator.submit(registration.item.id).await?.id)
    } else {
        None
    };

    Ok(Json(UploadResponse {
        source: registration.source.into(),
        item: registration.item.into(),
        already_known: registration.already_known,
        job_id,
    }))
}

/// List all registered sources
pub async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<SourceResponse>>> {
    let sources = state.catalog.list_sources().await?;
    Ok(Json(sources.into_iter().map(Into::into).collect()))
}

/// List the content items of one source with their processing status
pub async fn list_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ItemResponse>>> {
    state
        .catalog
        .find_source(id)
        .await?
        .ok_or_else(|| AppError::SourceNotFound { id: id.to_string() })?;

    let items = state.catalog.list_items(id).await?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}
