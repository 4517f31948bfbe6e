//! Embedding service abstraction
//!
//! Provides a unified interface over embedding providers:
//! - HTTP (OpenAI-compatible /embeddings endpoint)
//! - Deterministic mock for tests and offline runs
//!
//! The same client embeds ingestion chunks and query text so the vector
//! spaces always match.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible HTTP embedding client
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create a new HTTP embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the http provider".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build embedding HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Retries exhausted: the provider is effectively down for this call
        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(AppError::ProviderUnavailable {
            provider: "embedding".to_string(),
            message: detail,
        })
    }

    async fn make_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::TransientIo {
                message: format!("Embedding request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(AppError::TransientIo {
                    message: format!("Embedding API error {}: {}", status, body),
                });
            }
            return Err(AppError::EmbeddingError {
                message: format!("Embedding API error {}: {}", status, body),
            });
        }

        let result: EmbeddingResponse =
            response.json().await.map_err(|e| AppError::EmbeddingError {
                message: format!("Failed to parse embedding response: {}", e),
            })?;

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_with_retry(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty embedding response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Providers cap texts per request
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let embeddings = self.request_with_retry(chunk).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for tests and offline runs.
///
/// Same text always yields the same unit vector, so ingestion idempotence
/// and retrieval behavior can be exercised without a provider.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut values: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let byte = digest[i % digest.len()];
                // Re-hash position to decorrelate repeated digest bytes
                let salt = digest[(i / digest.len() + i) % digest.len()];
                (byte as f32 - 127.5) + (salt as f32 / 255.0)
            })
            .collect();

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in values.iter_mut() {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_dimension() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("same input").await.unwrap();
        let b = embedder.embed("same input").await.unwrap();
        assert_eq!(a, b);

        let c = embedder.embed("different input").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_embedder_unit_norm() {
        let embedder = MockEmbedder::new(128);
        let v = embedder.embed("normalize me").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_batch() {
        let embedder = MockEmbedder::new(32);
        let texts = vec!["text1".to_string(), "text2".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 32);
    }
}
