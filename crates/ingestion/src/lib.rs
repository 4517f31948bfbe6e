//! Recall ingestion library
//!
//! Feed and document source adapters, the deterministic chunker, and the
//! orchestrator that drives content items through extract → chunk → embed →
//! index as retryable background jobs.

pub mod chunker;
pub mod document;
pub mod feed;
pub mod orchestrator;

pub use chunker::{chunk_extraction, ChunkingConfig, TextChunk};
pub use document::{register_document, DocumentRegistration};
pub use feed::{parse_feed, FeedDiscovery, ParsedFeed};
pub use orchestrator::{chunk_id, IngestionPipeline, Orchestrator, OrchestratorConfig};
