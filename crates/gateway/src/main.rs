//! Recall API Gateway
//!
//! The entry point for all external API requests:
//! - Source registration (feeds and document uploads)
//! - Content item and job status
//! - Chat/search queries with knowledge-base-vs-web attribution
//! - Context packages for content generation

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use recall_common::{
    config::AppConfig,
    db::{DbPool, SqlCatalog},
    embeddings::create_embedder,
    errors::Result,
    extract::{Extractor, HttpExtractor, PlainTextExtractor},
    index::PgVectorIndex,
    metrics,
    store::Catalog,
};
use recall_ingestion::{
    chunker::ChunkingConfig,
    feed::FeedDiscovery,
    orchestrator::{IngestionPipeline, Orchestrator, OrchestratorConfig},
};
use recall_retrieval::{
    engine::{EngineConfig, RetrievalEngine},
    fallback::{FallbackCoordinator, HttpWebSearch, WebSearchProvider},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<dyn Catalog>,
    pub engine: Arc<RetrievalEngine>,
    pub fallback: Arc<FallbackCoordinator>,
    pub orchestrator: Orchestrator,
    pub discovery: Arc<FeedDiscovery>,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Recall API Gateway v{}", recall_common::VERSION);

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
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let state = build_state(config.clone(), db)?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wire the shared components behind their trait seams
fn build_state(config: Arc<AppConfig>, db: DbPool) -> Result<AppState> {
    let catalog: Arc<dyn Catalog> = Arc::new(SqlCatalog::new(db.clone()));
    let index = Arc::new(PgVectorIndex::new(db, config.embedding.model.clone()));

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    // Uploads are processed in-process; without an extraction service only
    // plain-text content can be ingested here
    let extractor: Arc<dyn Extractor> = if config.extraction.api_base.is_some() {
        Arc::new(HttpExtractor::new(&config.extraction)?)
    } else {
        Arc::new(PlainTextExtractor)
    };

    let chunking = ChunkingConfig {
        max_chars: config.ingestion.chunk_chars,
        overlap_chars: config.ingestion.chunk_overlap_chars,
    };
    let pipeline = IngestionPipeline::new(
        catalog.clone(),
        index.clone(),
        embedder.clone(),
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

    let discovery = Arc::new(FeedDiscovery::new(
        catalog.clone(),
        Duration::from_secs(config.ingestion.fetch_timeout_secs),
    )?);

    let engine = Arc::new(RetrievalEngine::new(
        embedder,
        index,
        EngineConfig::from(&config.retrieval),
    ));

    let fallback = if config.web_search.enabled {
        let provider: Arc<dyn WebSearchProvider> =
            Arc::new(HttpWebSearch::new(&config.web_search)?);
        Arc::new(FallbackCoordinator::new(
            Some(provider),
            config.web_search.max_results,
        ))
    } else {
        Arc::new(FallbackCoordinator::disabled())
    };

    Ok(AppState {
        config,
        catalog,
        engine,
        fallback,
        orchestrator,
        discovery,
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Source endpoints
        .route("/sources", post(handlers::sources::register_feed))
        .route("/sources", get(handlers::sources::list_sources))
        .route("/sources/documents", post(handlers::sources::upload_document))
        .route("/sources/{id}/items", get(handlers::sources::list_items))
        // Job endpoints
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        // Query endpoints
        .route("/query", post(handlers::query::query))
        // Generation endpoints
        .route("/generate", post(handlers::generation::generate));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
