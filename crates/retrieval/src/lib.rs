//! Recall retrieval library
//!
//! The query-time pipeline: embed → search → relevance threshold →
//! disambiguation → context assembly, with a web-search fallback when the
//! knowledge base is insufficient.

pub mod context;
pub mod disambiguation;
pub mod engine;
pub mod fallback;

pub use context::{assemble_context, render_context, Attribution, AttributionOrigin, ContextPassage};
pub use disambiguation::{disambiguate, EntityCandidate, EntityGroup};
pub use engine::{EngineConfig, QueryContext, QueryOutcome, RetrievalEngine};
pub use fallback::{FallbackCoordinator, FallbackOutcome, HttpWebSearch, WebSearchProvider};
