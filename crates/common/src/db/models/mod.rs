//! SeaORM entity models
//!
//! Database entities for the Recall metadata store. The metadata store is the
//! authoritative owner of identity and status; the vector index is a derived
//! projection keyed by chunk id.

mod chunk;
mod content_item;
mod ingestion_job;
mod source;

pub use source::{
    ActiveModel as SourceActiveModel, Column as SourceColumn, Entity as SourceEntity,
    Model as Source, SourceKind,
};

pub use content_item::{
    ActiveModel as ContentItemActiveModel, Column as ContentItemColumn,
    Entity as ContentItemEntity, ItemStatus, Model as ContentItem,
};

pub use chunk::{
    ActiveModel as ChunkActiveModel, Column as ChunkColumn, Entity as ChunkEntity, Model as Chunk,
};

pub use ingestion_job::{
    ActiveModel as IngestionJobActiveModel, Column as IngestionJobColumn,
    Entity as IngestionJobEntity, JobState, Model as IngestionJob,
};
