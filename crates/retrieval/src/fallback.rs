//! Web search fallback
//!
//! Invoked when the retrieval engine reports `insufficient_kb` or zero hits.
//! Knowledge-base passages are never discarded: web snippets are merged in
//! alongside them with an explicit `web` attribution tag. The provider is
//! queried at most once per query, and a provider failure degrades the
//! response instead of failing it.

use async_trait::async_trait;
use recall_common::config::WebSearchConfig;
use recall_common::errors::{AppError, Result};
use recall_common::metrics;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::context::{Attribution, AttributionOrigin, ContextPassage};

/// One cleaned web search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSnippet {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub domain: String,
    pub score: f32,
}

/// Trait for the external web search provider
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>>;
}

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    results: Vec<ProviderResult>,
}

#[derive(Deserialize)]
struct ProviderResult {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
    score: Option<f32>,
}

/// HTTP web search client (Tavily-shaped API)
pub struct HttpWebSearch {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpWebSearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "web_search.api_key is required".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build web search HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base.clone(),
        })
    }
}

#[async_trait]
impl WebSearchProvider for HttpWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "include_answer": false,
            "max_results": max_results,
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::TransientIo {
                message: format!("Web search request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::from_provider_status("web_search", status, text));
        }

        let parsed: ProviderResponse =
            response
                .json()
                .await
                .map_err(|e| AppError::WebSearchError {
                    message: format!("Failed to parse web search response: {}", e),
                })?;

        let snippets = parsed
            .results
            .into_iter()
            .filter_map(|r| {
                let url = r.url?;
                let snippet = clean_snippet(&r.content.unwrap_or_default());
                if snippet.is_empty() {
                    return None;
                }
                Some(WebSnippet {
                    title: clean_snippet(&r.title.unwrap_or_default()),
                    domain: extract_domain(&url),
                    url,
                    snippet,
                    score: r.score.unwrap_or(0.0),
                })
            })
            .collect();

        Ok(snippets)
    }
}

/// Strip markup and collapse whitespace in provider snippets
pub fn clean_snippet(text: &str) -> String {
    static TAG_RE: OnceLock<regex_lite::Regex> = OnceLock::new();
    let tag_re = TAG_RE.get_or_init(|| {
        regex_lite::Regex::new(r"<[^>]+>").expect("tag pattern is valid")
    });

    let without_tags = tag_re.replace_all(text, " ");
    without_tags
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Domain label used for attribution
pub fn extract_domain(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme
        .split('/')
        .next()
        .unwrap_or("unknown")
        .to_ascii_lowercase()
}

/// Outcome of a fallback attempt
#[derive(Debug, Default)]
pub struct FallbackOutcome {
    /// Web passages tagged with `web` attribution
    pub passages: Vec<ContextPassage>,
    /// False when the provider is disabled or unreachable; the caller
    /// degrades to knowledge-base-only results with a note
    pub available: bool,
}

/// Decides when and how to merge external web results into a query
pub struct FallbackCoordinator {
    provider: Option<Arc<dyn WebSearchProvider>>,
    max_results: usize,
}

impl FallbackCoordinator {
    pub fn new(provider: Option<Arc<dyn WebSearchProvider>>, max_results: usize) -> Self {
        Self {
            provider,
            max_results,
        }
    }

    /// Coordinator with no provider configured; every fallback degrades
    pub fn disabled() -> Self {
        Self {
            provider: None,
            max_results: 0,
        }
    }

    /// Query the web provider once. Never errors: provider problems are
    /// reported through `available = false`.
    pub async fn run(&self, query: &str) -> FallbackOutcome {
        let Some(provider) = &self.provider else {
            metrics::record_fallback(false);
            return FallbackOutcome::default();
        };

        match provider.search(query, self.max_results).await {
            Ok(snippets) => {
                info!(results = snippets.len(), "Web fallback returned snippets");
                metrics::record_fallback(true);
                FallbackOutcome {
                    passages: snippets.into_iter().map(snippet_passage).collect(),
                    available: true,
                }
            }
            Err(e) => {
                // No retry loop here beyond the transport policy; one shot
                warn!(error = %e, "Web fallback unavailable, degrading to KB-only");
                metrics::record_fallback(false);
                FallbackOutcome::default()
            }
        }
    }
}

fn snippet_passage(snippet: WebSnippet) -> ContextPassage {
    let token_count = (snippet.snippet.chars().count() / 4) as i32;
    let title = if snippet.title.is_empty() {
        snippet.domain.clone()
    } else {
        snippet.title.clone()
    };

    ContextPassage {
        text: snippet.snippet,
        score: snippet.score,
        token_count,
        section: None,
        attribution: Attribution {
            origin: AttributionOrigin::Web,
            source_id: None,
            item_id: None,
            title: Some(title),
            url: Some(snippet.url),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        snippets: Vec<WebSnippet>,
    }

    #[async_trait]
    impl WebSearchProvider for StubProvider {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>> {
            Ok(self.snippets.clone())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl WebSearchProvider for DownProvider {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>> {
            Err(AppError::ProviderUnavailable {
                provider: "web_search".to_string(),
                message: "gateway timeout".to_string(),
            })
        }
    }

    fn snippet(url: &str, text: &str) -> WebSnippet {
        WebSnippet {
            title: "Result".to_string(),
            url: url.to_string(),
            snippet: text.to_string(),
            domain: extract_domain(url),
            score: 0.4,
        }
    }

    #[test]
    fn test_clean_snippet_strips_markup() {
        assert_eq!(
            clean_snippet("<p>Hello   <b>world</b></p>\n\ttrailing"),
            "Hello world trailing"
        );
        assert_eq!(clean_snippet(""), "");
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://Example.COM/path?q=1"),
            "example.com"
        );
        assert_eq!(extract_domain("http://sub.site.org"), "sub.site.org");
    }

    #[tokio::test]
    async fn test_fallback_tags_passages_as_web() {
        let coordinator = FallbackCoordinator::new(
            Some(Arc::new(StubProvider {
                snippets: vec![snippet("https://example.com/a", "A useful web passage.")],
            })),
            5,
        );

        let outcome = coordinator.run("some query").await;
        assert!(outcome.available);
        assert_eq!(outcome.passages.len(), 1);
        assert_eq!(
            outcome.passages[0].attribution.origin,
            AttributionOrigin::Web
        );
        assert_eq!(
            outcome.passages[0].attribution.url.as_deref(),
            Some("https://example.com/a")
        );
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_gracefully() {
        let coordinator = FallbackCoordinator::new(Some(Arc::new(DownProvider)), 5);

        let outcome = coordinator.run("some query").await;
        assert!(!outcome.available);
        assert!(outcome.passages.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_coordinator_reports_unavailable() {
        let coordinator = FallbackCoordinator::disabled();
        let outcome = coordinator.run("some query").await;
        assert!(!outcome.available);
        assert!(outcome.passages.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_kb_merges_web_alongside_kb_passages() {
        use crate::engine::{EngineConfig, QueryOutcome, RetrievalEngine};
        use recall_common::embeddings::Embedder;
        use recall_common::errors::Result as CommonResult;
        use recall_common::index::{ChunkPoint, MemoryIndex, SearchFilter, VectorIndex};
        use uuid::Uuid;

        struct FixedEmbedder;

        #[async_trait]
        impl Embedder for FixedEmbedder {
            async fn embed(&self, _text: &str) -> CommonResult<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
            async fn embed_batch(&self, texts: &[String]) -> CommonResult<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
            fn model_name(&self) -> &str {
                "fixed"
            }
            fn dimension(&self) -> usize {
                2
            }
        }

        // One weakly related chunk: score ~0.55, below the 0.7 threshold
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(vec![ChunkPoint {
                id: Uuid::new_v4(),
                item_id: Uuid::new_v4(),
                source_id: Uuid::new_v4(),
                ordinal: 0,
                text: "A loosely related episode passage.".to_string(),
                token_count: 8,
                start_secs: None,
                end_secs: None,
                section: None,
                metadata: serde_json::json!({"entity": "Show"}),
                embedding: vec![0.55, 0.835],
            }])
            .await
            .unwrap();

        let engine = RetrievalEngine::new(
            Arc::new(FixedEmbedder),
            index,
            EngineConfig {
                relevance_threshold: 0.7,
                ..Default::default()
            },
        );

        let ctx = engine
            .handle_query("something niche", SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(ctx.outcome, QueryOutcome::InsufficientKb);
        assert_eq!(ctx.passages.len(), 1);

        let coordinator = FallbackCoordinator::new(
            Some(Arc::new(StubProvider {
                snippets: vec![snippet("https://example.com/answer", "Fresh web knowledge.")],
            })),
            5,
        );
        let fallback = coordinator.run(&ctx.query).await;
        assert!(fallback.available);

        // Merge policy: KB passages are kept and presented alongside web ones
        let mut merged = ctx.passages.clone();
        merged.extend(fallback.passages);
        assert!(merged
            .iter()
            .any(|p| p.attribution.origin == AttributionOrigin::KnowledgeBase));
        assert!(merged
            .iter()
            .any(|p| p.attribution.origin == AttributionOrigin::Web));
    }
}
