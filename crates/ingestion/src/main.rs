//! Recall Ingestion Service
//!
//! Background worker that:
//! 1. Polls registered feed sources for new entries
//! 2. Inserts new content items behind the deduplication gate
//! 3. Drives items through extract → chunk → embed → index as retryable jobs

use recall_common::{
    config::AppConfig,
    db::{DbPool, SqlCatalog},
    embeddings::create_embedder,
    extract::HttpExtractor,
    index::PgVectorIndex,
    metrics,
    store::Catalog,
    VERSION,
};
use recall_ingestion::{
    chunker::ChunkingConfig,
    feed::FeedDiscovery,
    orchestrator::{IngestionPipeline, Orchestrator, OrchestratorConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Recall Ingestion Service v{}", VERSION);

    // Load and validate configuration; missing settings are fatal here only
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    config.validate()?;
    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let catalog: Arc<dyn Catalog> = Arc::new(SqlCatalog::new(db.clone()));
    let index = Arc::new(PgVectorIndex::new(db, config.embedding.model.clone()));

    // Initialize providers
    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );
    let extractor = Arc::new(HttpExtractor::new(&config.extraction)?);

    // Build the orchestrator
    let chunking = ChunkingConfig {
        max_chars: config.ingestion.chunk_chars,
        overlap_chars: config.ingestion.chunk_overlap_chars,
    };
    let pipeline = IngestionPipeline::new(
        catalog.clone(),
        index,
        embedder,
        extractor,
        chunking.clone(),
    );
    let orchestrator = Orchestrator::new(
        pipeline,
        catalog.clone(),
        OrchestratorConfig {
            worker_concurrency: config.ingestion.worker_concurrency,
            max_attempts: config.ingestion.max_attempts,
            retry_base: Duration::from_millis(config.ingestion.retry_base_ms),
            retry_max: Duration::from_millis(config.ingestion.retry_max_ms),
            chunking,
        },
    );

    let discovery = FeedDiscovery::new(
        catalog.clone(),
        Duration::from_secs(config.ingestion.fetch_timeout_secs),
    )?;

    info!(
        poll_interval_secs = config.ingestion.poll_interval_secs,
        "Ingestion worker ready, starting feed polling"
    );

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.ingestion.poll_interval_secs));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = poll_sources(&catalog, &discovery, &orchestrator).await {
                    error!(error = %e, "Discovery cycle failed");
                }
            }
        }
    }

    info!("Ingestion service shutting down");
    Ok(())
}

/// One discovery cycle over every registered feed source.
///
/// Discovery only enqueues; it never waits for extraction or embedding.
async fn poll_sources(
    catalog: &Arc<dyn Catalog>,
    discovery: &FeedDiscovery,
    orchestrator: &Orchestrator,
) -> recall_common::Result<()> {
    let sources = catalog.list_sources().await?;

    for source in sources {
        if source.kind != "feed" {
            continue;
        }

        match discovery.discover(&source).await {
            Ok(outcome) => {
                for item in outcome.new_items {
                    if let Err(e) = orchestrator.submit(item.id).await {
                        error!(item_id = %item.id, error = %e, "Failed to enqueue item");
                    }
                }
            }
            Err(e) if e.is_transient() => {
                // Feed host hiccup; next poll retries
                warn!(source_id = %source.id, error = %e, "Feed poll failed transiently");
            }
            Err(e) => {
                error!(source_id = %source.id, error = %e, "Feed poll failed");
            }
        }
    }

    Ok(())
}
