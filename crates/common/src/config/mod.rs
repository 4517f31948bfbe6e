//! Configuration management for Recall services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Missing required settings are fatal at startup ([`AppConfig::validate`]),
//! never mid-pipeline.

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Content extraction service configuration
    pub extraction: ExtractionConfig,

    /// Ingestion pipeline configuration
    pub ingestion: IngestionConfig,

    /// Retrieval pipeline configuration
    pub retrieval: RetrievalConfig,

    /// Web search fallback configuration
    pub web_search: WebSearchConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: http, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Maximum transport-level retries
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// Extraction service base URL (speech-to-text / document conversion)
    pub api_base: Option<String>,

    /// Request timeout in seconds (audio transcription is slow)
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Concurrent worker slots for ingestion jobs
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Maximum attempts before a job fails terminally
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in milliseconds (grows exponentially, with jitter)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound on a single retry delay in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Feed polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Timeout for fetching feed/media bytes, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Target chunk size in characters
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Overlap between consecutive chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Number of chunks fetched from the index per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum best-hit similarity for the knowledge base to count as
    /// sufficient. The boundary is inclusive.
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Maximum distinct entity groups offered for disambiguation
    #[serde(default = "default_max_entity_groups")]
    pub max_entity_groups: usize,

    /// Token budget for assembled context
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    /// Per-query deadline in milliseconds; past it the pipeline returns a
    /// partial context flagged `truncated`
    #[serde(default = "default_query_deadline_ms")]
    pub query_deadline_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// Enable the web search fallback
    #[serde(default = "default_web_search_enabled")]
    pub enabled: bool,

    /// API key for the web search provider
    pub api_key: Option<String>,

    /// Provider endpoint
    #[serde(default = "default_web_search_base")]
    pub api_base: String,

    /// Maximum snippets to request
    #[serde(default = "default_web_search_results")]
    pub max_results: usize,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    50
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_embedding_provider() -> String {
    "http".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_provider_timeout() -> u64 {
    30
}
fn default_provider_retries() -> u32 {
    3
}
fn default_embedding_batch_size() -> usize {
    20
}
fn default_extraction_timeout() -> u64 {
    300
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_poll_interval() -> u64 {
    900
}
fn default_fetch_timeout() -> u64 {
    60
}
fn default_chunk_chars() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_top_k() -> usize {
    10
}
fn default_relevance_threshold() -> f32 {
    0.7
}
fn default_max_entity_groups() -> usize {
    5
}
fn default_context_token_budget() -> usize {
    4000
}
fn default_query_deadline_ms() -> u64 {
    8000
}
fn default_web_search_enabled() -> bool {
    true
}
fn default_web_search_base() -> String {
    "https://api.tavily.com/search".to_string()
}
fn default_web_search_results() -> usize {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_service_name() -> String {
    "recall".to_string()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Check settings that must be present before any pipeline starts.
    ///
    /// Called once at process startup. A failure here is fatal; nothing else
    /// in the system is allowed to raise a configuration error.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(AppError::Configuration {
                message: "database.url is required".to_string(),
            });
        }
        if self.embedding.provider == "http" && self.embedding.api_key.is_none() {
            return Err(AppError::Configuration {
                message: "embedding.api_key is required for the http provider".to_string(),
            });
        }
        if self.web_search.enabled && self.web_search.api_key.is_none() {
            return Err(AppError::Configuration {
                message: "web_search.api_key is required when web_search.enabled".to_string(),
            });
        }
        if self.ingestion.chunk_overlap_chars >= self.ingestion.chunk_chars {
            return Err(AppError::Configuration {
                message: "ingestion.chunk_overlap_chars must be smaller than chunk_chars"
                    .to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retrieval.relevance_threshold) {
            return Err(AppError::Configuration {
                message: "retrieval.relevance_threshold must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database
            .read_url
            .as_deref()
            .unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/recall".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            embedding: EmbeddingConfig {
                provider: default_embedding_provider(),
                api_key: None,
                api_base: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_provider_timeout(),
                max_retries: default_provider_retries(),
                batch_size: default_embedding_batch_size(),
            },
            extraction: ExtractionConfig {
                api_base: None,
                timeout_secs: default_extraction_timeout(),
            },
            ingestion: IngestionConfig {
                worker_concurrency: default_worker_concurrency(),
                max_attempts: default_max_attempts(),
                retry_base_ms: default_retry_base_ms(),
                retry_max_ms: default_retry_max_ms(),
                poll_interval_secs: default_poll_interval(),
                fetch_timeout_secs: default_fetch_timeout(),
                chunk_chars: default_chunk_chars(),
                chunk_overlap_chars: default_chunk_overlap(),
            },
            retrieval: RetrievalConfig {
                top_k: default_top_k(),
                relevance_threshold: default_relevance_threshold(),
                max_entity_groups: default_max_entity_groups(),
                context_token_budget: default_context_token_budget(),
                query_deadline_ms: default_query_deadline_ms(),
            },
            web_search: WebSearchConfig {
                enabled: default_web_search_enabled(),
                api_key: None,
                api_base: default_web_search_base(),
                max_results: default_web_search_results(),
                timeout_secs: default_provider_timeout(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.retrieval.relevance_threshold, 0.7);
        assert_eq!(config.ingestion.max_attempts, 5);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/recall");
    }

    #[test]
    fn test_validate_rejects_missing_embedding_key() {
        let mut config = AppConfig::default();
        config.web_search.enabled = false;
        // provider is "http" by default, with no key set
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("embedding.api_key"));
    }

    #[test]
    fn test_validate_rejects_overlap_wider_than_window() {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        config.web_search.enabled = false;
        config.ingestion.chunk_chars = 100;
        config.ingestion.chunk_overlap_chars = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_mock_offline_setup() {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        config.web_search.enabled = false;
        assert!(config.validate().is_ok());
    }
}
