//! Ingestion orchestrator
//!
//! Drives content items through extract → chunk → embed → index as
//! asynchronous, retryable jobs:
//!
//! queued → running → { succeeded | failed_retryable → queued | failed_terminal }
//!
//! Each content item has at most one in-flight job. Chunk ids are
//! deterministic functions of (item id, ordinal), so upserts are idempotent
//! and a crash between embedding and the status flip leaves the item
//! `processing` and safely retryable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use recall_common::db::models::{IngestionJob, ItemStatus, JobState};
use recall_common::embeddings::Embedder;
use recall_common::errors::{AppError, Result};
use recall_common::extract::{ExtractSource, Extractor};
use recall_common::index::{ChunkPoint, VectorIndex};
use recall_common::metrics;
use recall_common::store::Catalog;
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::chunker::{chunk_extraction, ChunkingConfig};

/// Deterministic chunk id: uuid v5 of (item_id, ordinal).
///
/// Re-ingestion of an already-completed item is a no-op and partial failures
/// resume without creating duplicate vectors.
pub fn chunk_id(item_id: Uuid, ordinal: i32) -> Uuid {
    Uuid::new_v5(&item_id, ordinal.to_string().as_bytes())
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrent worker slots
    pub worker_concurrency: usize,
    /// Maximum attempts before a job fails terminally
    pub max_attempts: u32,
    /// Base retry delay; grows exponentially with jitter
    pub retry_base: Duration,
    /// Upper bound on a single retry delay
    pub retry_max: Duration,
    /// Chunking parameters
    pub chunking: ChunkingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            max_attempts: 5,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(60),
            chunking: ChunkingConfig::default(),
        }
    }
}

/// The per-item processing pipeline
pub struct IngestionPipeline {
    catalog: Arc<dyn Catalog>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    chunking: ChunkingConfig,
}

impl IngestionPipeline {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            catalog,
            index,
            embedder,
            extractor,
            chunking,
        }
    }

    /// Process one content item to completion.
    ///
    /// Step order matters: chunks are embedded and upserted into the index
    /// first, and only then is the catalog updated with the chunk-id list
    /// and the `completed` status.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn process_item(&self, item_id: Uuid) -> Result<usize> {
        let item = self
            .catalog
            .find_item(item_id)
            .await?
            .ok_or_else(|| AppError::ItemNotFound {
                id: item_id.to_string(),
            })?;

        // Re-ingestion of a completed item is a no-op
        if item.item_status() == ItemStatus::Completed {
            info!("Item already completed, skipping");
            return Ok(item.owned_chunk_ids().len());
        }

        let source = self
            .catalog
            .find_source(item.source_id)
            .await?
            .ok_or_else(|| AppError::SourceNotFound {
                id: item.source_id.to_string(),
            })?;

        self.catalog
            .update_item_status(item_id, ItemStatus::Processing, None)
            .await?;

        let extract_source = if let Some(url) = item.media_url.clone() {
            ExtractSource::Remote(url)
        } else if let Some(payload) = item.payload.clone() {
            ExtractSource::Inline(payload)
        } else {
            return Err(AppError::MalformedContent {
                message: "Item has neither media URL nor payload".to_string(),
            });
        };

        let extraction = self
            .extractor
            .extract(extract_source, item.content_kind())
            .await?;

        let chunks = chunk_extraction(&extraction, &self.chunking);
        if chunks.is_empty() {
            return Err(AppError::MalformedContent {
                message: "Extraction produced no text".to_string(),
            });
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Embedding count mismatch: {} chunks, {} vectors",
                    chunks.len(),
                    embeddings.len()
                ),
            });
        }

        // The distinguishing entity attribute used at query time
        let entity = source
            .title
            .clone()
            .or_else(|| item.title.clone())
            .unwrap_or_else(|| source.identity_key.clone());

        let points: Vec<ChunkPoint> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkPoint {
                id: chunk_id(item.id, chunk.ordinal),
                item_id: item.id,
                source_id: source.id,
                ordinal: chunk.ordinal,
                text: chunk.text,
                token_count: chunk.token_count,
                start_secs: chunk.start_secs,
                end_secs: chunk.end_secs,
                section: chunk.section.clone(),
                metadata: json!({
                    "source_kind": source.kind,
                    "content_kind": item.content_kind,
                    "source_title": source.title,
                    "item_title": item.title,
                    "entity": entity,
                    "section": chunk.section,
                }),
                embedding,
            })
            .collect();

        let ids: Vec<Uuid> = points.iter().map(|p| p.id).collect();

        self.index.upsert(points).await?;
        self.catalog.commit_item_chunks(item.id, &ids).await?;

        metrics::record_chunks_indexed(ids.len());
        info!(chunks = ids.len(), "Item indexed");

        Ok(ids.len())
    }
}

struct Inner {
    pipeline: IngestionPipeline,
    catalog: Arc<dyn Catalog>,
    config: OrchestratorConfig,
    workers: Arc<Semaphore>,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Worker pool driving ingestion jobs through the state machine
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        pipeline: IngestionPipeline,
        catalog: Arc<dyn Catalog>,
        config: OrchestratorConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_concurrency));
        Self {
            inner: Arc::new(Inner {
                pipeline,
                catalog,
                config,
                workers,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Enqueue an ingestion job for a content item.
    ///
    /// Mutual exclusion: if the item already has an in-flight job, that job
    /// is returned instead of creating a second one.
    pub async fn submit(&self, item_id: Uuid) -> Result<IngestionJob> {
        // The lock is held across job creation so a concurrent submit for the
        // same item always finds the job record it is told about.
        let mut in_flight = self.inner.in_flight.lock().await;

        if in_flight.contains(&item_id) {
            let existing = self.inner.catalog.find_job_for_item(item_id).await?;
            return existing.ok_or_else(|| AppError::Internal {
                message: format!("In-flight item {} has no job record", item_id),
            });
        }

        let job = self.inner.catalog.create_job(item_id).await?;
        in_flight.insert(item_id);
        drop(in_flight);

        let inner = self.inner.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            Inner::drive(inner, spawned).await;
        });

        Ok(job)
    }

    /// Block until a job settles. Used by tests and synchronous callers.
    pub async fn wait(&self, job_id: Uuid, timeout: Duration) -> Result<IngestionJob> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.inner.catalog.find_job(job_id).await? {
                if job.is_terminal() {
                    return Ok(job);
                }
            }
            if Instant::now() >= deadline {
                return Err(AppError::TransientIo {
                    message: format!("Job {} did not settle within {:?}", job_id, timeout),
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Inner {
    async fn drive(inner: Arc<Inner>, job: IngestionJob) {
        // One worker slot per running job
        let Ok(_permit) = inner.workers.clone().acquire_owned().await else {
            return;
        };

        let started = Instant::now();
        let item_id = job.item_id;
        let mut attempt: i32 = 0;

        loop {
            attempt += 1;

            if let Err(e) = inner
                .catalog
                .update_job(job.id, JobState::Running, attempt, None, None)
                .await
            {
                error!(job_id = %job.id, error = %e, "Failed to mark job running");
                break;
            }

            match inner.pipeline.process_item(item_id).await {
                Ok(chunk_count) => {
                    info!(
                        job_id = %job.id,
                        chunks = chunk_count,
                        attempt,
                        "Ingestion job succeeded"
                    );
                    if let Err(e) = inner
                        .catalog
                        .update_job(job.id, JobState::Succeeded, attempt, None, None)
                        .await
                    {
                        error!(job_id = %job.id, error = %e, "Failed to mark job succeeded");
                    }
                    metrics::record_ingestion_duration(started.elapsed().as_secs_f64());
                    break;
                }
                Err(e) if e.is_transient() && (attempt as u32) < inner.config.max_attempts => {
                    let delay = retry_delay(attempt as u32, &inner.config);
                    warn!(
                        job_id = %job.id,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, re-queueing with backoff"
                    );
                    metrics::record_job_retry();

                    let next_retry = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    let message = Some(e.to_string());
                    for state in [JobState::FailedRetryable, JobState::Queued] {
                        if let Err(e) = inner
                            .catalog
                            .update_job(job.id, state, attempt, message.clone(), Some(next_retry))
                            .await
                        {
                            error!(job_id = %job.id, error = %e, "Failed to record retry state");
                        }
                    }

                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Terminal: malformed content or attempts exhausted.
                    // The failure is surfaced on the item, not dropped.
                    error!(
                        job_id = %job.id,
                        error = %e,
                        attempt,
                        "Ingestion job failed terminally"
                    );
                    metrics::record_job_failed();

                    if let Err(err) = inner
                        .catalog
                        .update_item_status(item_id, ItemStatus::Failed, Some(e.to_string()))
                        .await
                    {
                        error!(item_id = %item_id, error = %err, "Failed to mark item failed");
                    }
                    if let Err(err) = inner
                        .catalog
                        .update_job(
                            job.id,
                            JobState::FailedTerminal,
                            attempt,
                            Some(e.to_string()),
                            None,
                        )
                        .await
                    {
                        error!(job_id = %job.id, error = %err, "Failed to mark job terminal");
                    }
                    break;
                }
            }
        }

        inner.in_flight.lock().await.remove(&item_id);
    }
}

/// Exponential backoff with jitter
fn retry_delay(attempt: u32, config: &OrchestratorConfig) -> Duration {
    let exp = config
        .retry_base
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(config.retry_max);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use recall_common::db::models::SourceKind;
    use recall_common::embeddings::MockEmbedder;
    use recall_common::extract::{ContentKind, Extraction, PlainTextExtractor};
    use recall_common::index::MemoryIndex;
    use recall_common::store::{MemoryCatalog, NewContentItem};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyExtractor {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Extractor for FlakyExtractor {
        async fn extract(&self, _source: ExtractSource, _kind: ContentKind) -> Result<Extraction> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::TransientIo {
                    message: "simulated provider timeout".to_string(),
                });
            }
            Ok(Extraction {
                text: "This transcript finally made it through after the outage cleared."
                    .to_string(),
                segments: Vec::new(),
            })
        }
    }

    struct BrokenExtractor;

    #[async_trait]
    impl Extractor for BrokenExtractor {
        async fn extract(&self, _source: ExtractSource, _kind: ContentKind) -> Result<Extraction> {
            Err(AppError::MalformedContent {
                message: "audio stream is corrupt".to_string(),
            })
        }
    }

    struct SlowExtractor;

    #[async_trait]
    impl Extractor for SlowExtractor {
        async fn extract(&self, _source: ExtractSource, _kind: ContentKind) -> Result<Extraction> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(Extraction {
                text: "slow but steady".to_string(),
                segments: Vec::new(),
            })
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            worker_concurrency: 4,
            max_attempts: 5,
            retry_base: Duration::from_millis(1),
            retry_max: Duration::from_millis(5),
            chunking: ChunkingConfig::default(),
        }
    }

    fn build(
        extractor: Arc<dyn Extractor>,
        config: OrchestratorConfig,
    ) -> (Arc<MemoryCatalog>, Arc<MemoryIndex>, Orchestrator) {
        let catalog = Arc::new(MemoryCatalog::new());
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(MockEmbedder::new(64));

        let pipeline = IngestionPipeline::new(
            catalog.clone(),
            index.clone(),
            embedder,
            extractor,
            config.chunking.clone(),
        );
        let orchestrator = Orchestrator::new(pipeline, catalog.clone(), config);
        (catalog, index, orchestrator)
    }

    async fn seed_feed_items(
        catalog: &MemoryCatalog,
        count: usize,
    ) -> (Uuid, Vec<Uuid>) {
        let source = catalog
            .upsert_source(
                SourceKind::Feed,
                "https://example.com/feed.xml",
                Some("Deep Dives".to_string()),
                None,
            )
            .await
            .unwrap();

        let mut item_ids = Vec::new();
        for i in 0..count {
            let item = catalog
                .insert_item(NewContentItem {
                    source_id: source.id,
                    identity_key: format!("guid-{}", i),
                    content_kind: "text".to_string(),
                    title: Some(format!("Episode {}", i)),
                    media_url: None,
                    payload: Some(
                        format!("Transcript for episode {}. It covers many topics in detail.", i)
                            .into_bytes(),
                    ),
                    published_at: None,
                })
                .await
                .unwrap();
            item_ids.push(item.id);
        }
        (source.id, item_ids)
    }

    #[test]
    fn test_chunk_id_determinism() {
        let item = Uuid::new_v4();
        assert_eq!(chunk_id(item, 0), chunk_id(item, 0));
        assert_ne!(chunk_id(item, 0), chunk_id(item, 1));
        assert_ne!(chunk_id(item, 0), chunk_id(Uuid::new_v4(), 0));
    }

    #[tokio::test]
    async fn test_feed_ingestion_twice_changes_nothing() {
        // Scenario: 3 feed entries ingest to completion; a second run over the
        // unchanged source alters neither the catalog nor the index.
        let (catalog, index, orchestrator) = build(Arc::new(PlainTextExtractor), fast_config());
        let (source_id, item_ids) = seed_feed_items(&catalog, 3).await;

        for item_id in &item_ids {
            let job = orchestrator.submit(*item_id).await.unwrap();
            let job = orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();
            assert_eq!(job.job_state(), JobState::Succeeded);
        }

        assert_eq!(catalog.count_items(source_id).await.unwrap(), 3);
        for item_id in &item_ids {
            let item = catalog.find_item(*item_id).await.unwrap().unwrap();
            assert_eq!(item.item_status(), ItemStatus::Completed);
            assert!(!item.owned_chunk_ids().is_empty());
        }

        let indexed_after_first_run = index.count().await.unwrap();
        assert!(indexed_after_first_run >= 3);

        // Second run: resubmitting completed items is a no-op
        for item_id in &item_ids {
            let job = orchestrator.submit(*item_id).await.unwrap();
            let job = orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();
            assert_eq!(job.job_state(), JobState::Succeeded);
        }

        assert_eq!(catalog.count_items(source_id).await.unwrap(), 3);
        assert_eq!(index.count().await.unwrap(), indexed_after_first_run);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success_records_attempts() {
        // Scenario: the extraction service times out twice, then recovers.
        // The job succeeds on the third attempt with the count recorded.
        let extractor = Arc::new(FlakyExtractor {
            failures_left: AtomicU32::new(2),
        });
        let (catalog, _index, orchestrator) = build(extractor, fast_config());
        let (_source_id, item_ids) = seed_feed_items(&catalog, 1).await;

        let job = orchestrator.submit(item_ids[0]).await.unwrap();
        let job = orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(job.job_state(), JobState::Succeeded);
        assert_eq!(job.attempt_count, 3);

        let item = catalog.find_item(item_ids[0]).await.unwrap().unwrap();
        assert_eq!(item.item_status(), ItemStatus::Completed);
    }

    #[tokio::test]
    async fn test_malformed_content_is_terminal_on_first_attempt() {
        let (catalog, index, orchestrator) = build(Arc::new(BrokenExtractor), fast_config());
        let (_source_id, item_ids) = seed_feed_items(&catalog, 1).await;

        let job = orchestrator.submit(item_ids[0]).await.unwrap();
        let job = orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(job.job_state(), JobState::FailedTerminal);
        assert_eq!(job.attempt_count, 1);

        // The failure is surfaced on the item, not silently dropped
        let item = catalog.find_item(item_ids[0]).await.unwrap().unwrap();
        assert_eq!(item.item_status(), ItemStatus::Failed);
        assert!(item
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("corrupt"));

        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attempt_cap_exhaustion_is_terminal() {
        let extractor = Arc::new(FlakyExtractor {
            failures_left: AtomicU32::new(100),
        });
        let mut config = fast_config();
        config.max_attempts = 3;
        let (catalog, _index, orchestrator) = build(extractor, config);
        let (_source_id, item_ids) = seed_feed_items(&catalog, 1).await;

        let job = orchestrator.submit(item_ids[0]).await.unwrap();
        let job = orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(job.job_state(), JobState::FailedTerminal);
        assert_eq!(job.attempt_count, 3);

        let item = catalog.find_item(item_ids[0]).await.unwrap().unwrap();
        assert_eq!(item.item_status(), ItemStatus::Failed);
    }

    #[tokio::test]
    async fn test_one_in_flight_job_per_item() {
        let (catalog, _index, orchestrator) = build(Arc::new(SlowExtractor), fast_config());
        let (_source_id, item_ids) = seed_feed_items(&catalog, 1).await;

        let first = orchestrator.submit(item_ids[0]).await.unwrap();
        let second = orchestrator.submit(item_ids[0]).await.unwrap();
        assert_eq!(first.id, second.id);

        let settled = orchestrator
            .wait(first.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(settled.job_state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_resume_after_partial_failure_creates_no_duplicates() {
        // Simulate a crash between the index upsert and the status flip:
        // the item is left `processing` and reprocessing upserts the same
        // deterministic chunk ids.
        let (catalog, index, orchestrator) = build(Arc::new(PlainTextExtractor), fast_config());
        let (_source_id, item_ids) = seed_feed_items(&catalog, 1).await;

        let job = orchestrator.submit(item_ids[0]).await.unwrap();
        orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();
        let indexed = index.count().await.unwrap();

        catalog
            .update_item_status(item_ids[0], ItemStatus::Processing, None)
            .await
            .unwrap();

        let job = orchestrator.submit(item_ids[0]).await.unwrap();
        let job = orchestrator.wait(job.id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(job.job_state(), JobState::Succeeded);

        assert_eq!(index.count().await.unwrap(), indexed);
        let item = catalog.find_item(item_ids[0]).await.unwrap().unwrap();
        assert_eq!(item.item_status(), ItemStatus::Completed);
    }
}
