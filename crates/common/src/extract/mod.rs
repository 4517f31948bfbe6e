//! Content extraction service boundary
//!
//! Speech-to-text and document conversion are external collaborators; this
//! module only defines the interface: raw bytes (or a remote URL) plus a
//! declared kind go in, plain text plus optional aligned segments come out.
//! Segment timestamps and section labels are what the chunker preserves.

use crate::errors::{AppError, Result};
use crate::config::ExtractionConfig;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Declared content kind of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Audio,
    Pdf,
    Text,
}

impl From<String> for ContentKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "audio" => ContentKind::Audio,
            "pdf" => ContentKind::Pdf,
            _ => ContentKind::Text,
        }
    }
}

impl From<ContentKind> for String {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Audio => "audio".to_string(),
            ContentKind::Pdf => "pdf".to_string(),
            ContentKind::Text => "text".to_string(),
        }
    }
}

/// Where the raw content lives
#[derive(Debug, Clone)]
pub enum ExtractSource {
    /// Bytes captured at registration time (uploads)
    Inline(Vec<u8>),
    /// Remote media fetched by the extraction service (feed enclosures)
    Remote(String),
}

/// One time-aligned or structurally-labeled span of extracted text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    #[serde(default)]
    pub start_secs: Option<f64>,
    #[serde(default)]
    pub end_secs: Option<f64>,
    /// Structural label for document segments (e.g. "introduction")
    #[serde(default)]
    pub section: Option<String>,
}

/// Extraction output: normalized text plus optional segments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

/// Trait for the external extraction service
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: ExtractSource, kind: ContentKind) -> Result<Extraction>;
}

#[derive(Serialize)]
struct ExtractRequest {
    kind: ContentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_base64: Option<String>,
}

/// HTTP client for the extraction service
pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let base_url = config
            .api_base
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "extraction.api_base is required".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build extraction HTTP client: {}", e),
            })?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, source: ExtractSource, kind: ContentKind) -> Result<Extraction> {
        let request = match source {
            ExtractSource::Remote(url) => ExtractRequest {
                kind,
                url: Some(url),
                content_base64: None,
            },
            ExtractSource::Inline(bytes) => ExtractRequest {
                kind,
                url: None,
                content_base64: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            },
        };

        let url = format!("{}/extract", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::TransientIo {
                message: format!("Extraction request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::from_provider_status("extraction", status, body));
        }

        response
            .json::<Extraction>()
            .await
            .map_err(|e| AppError::ExtractionError {
                message: format!("Failed to parse extraction response: {}", e),
            })
    }
}

/// Passthrough extractor for plain-text uploads; no external call needed
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, source: ExtractSource, _kind: ContentKind) -> Result<Extraction> {
        let bytes = match source {
            ExtractSource::Inline(bytes) => bytes,
            ExtractSource::Remote(url) => {
                return Err(AppError::ExtractionError {
                    message: format!("Plain-text extractor cannot fetch remote content: {}", url),
                })
            }
        };

        let text = String::from_utf8(bytes).map_err(|_| AppError::MalformedContent {
            message: "Upload is not valid UTF-8 text".to_string(),
        })?;

        Ok(Extraction {
            text,
            segments: Vec::new(),
        })
    }
}
