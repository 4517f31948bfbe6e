//! Uploaded document source adapter
//!
//! Uploads are identified by a sha-256 content hash: the same bytes uploaded
//! twice resolve to the same source and item, and the second upload is a
//! no-op reported as already known.

use recall_common::db::models::{ContentItem, ItemStatus, Source, SourceKind};
use recall_common::errors::{AppError, Result};
use recall_common::extract::ContentKind;
use recall_common::metrics;
use recall_common::store::{content_item_id, Catalog, NewContentItem};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

/// Upload size cap; larger payloads belong in object storage, not the catalog
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Result of registering an uploaded document
#[derive(Debug)]
pub struct DocumentRegistration {
    pub source: Source,
    pub item: ContentItem,
    /// True when the content hash had been uploaded before
    pub already_known: bool,
}

/// Content hash used as the identity key for uploads
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Infer the content kind from the file name
pub fn kind_from_filename(filename: &str) -> ContentKind {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        ContentKind::Pdf
    } else if lower.ends_with(".mp3") || lower.ends_with(".wav") || lower.ends_with(".m4a") {
        ContentKind::Audio
    } else {
        ContentKind::Text
    }
}

/// Register an uploaded document: one source and one content item keyed by
/// the content hash.
#[instrument(skip(catalog, bytes), fields(filename = %filename, size = bytes.len()))]
pub async fn register_document(
    catalog: &dyn Catalog,
    filename: &str,
    kind: Option<ContentKind>,
    bytes: Vec<u8>,
) -> Result<DocumentRegistration> {
    if bytes.is_empty() {
        return Err(AppError::Validation {
            message: "Uploaded document is empty".to_string(),
            field: Some("content".to_string()),
        });
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::PayloadTooLarge {
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }

    let hash = content_hash(&bytes);
    let kind = kind.unwrap_or_else(|| kind_from_filename(filename));

    let source = catalog
        .upsert_source(
            SourceKind::Document,
            &hash,
            Some(filename.to_string()),
            None,
        )
        .await?;

    let new_item = NewContentItem {
        source_id: source.id,
        identity_key: hash.clone(),
        content_kind: String::from(kind),
        title: Some(filename.to_string()),
        media_url: None,
        payload: Some(bytes),
        published_at: None,
    };

    match catalog.insert_item(new_item).await {
        Ok(item) => {
            metrics::record_item_discovered("document");
            info!(item_id = %item.id, "Document registered");
            Ok(DocumentRegistration {
                source,
                item,
                already_known: false,
            })
        }
        Err(AppError::DuplicateItem { .. }) => {
            metrics::record_item_deduplicated("document");
            let id = content_item_id(source.id, &hash);
            let item = catalog
                .find_item(id)
                .await?
                .ok_or_else(|| AppError::ItemNotFound { id: id.to_string() })?;
            info!(item_id = %item.id, status = %item.status, "Document already known");
            Ok(DocumentRegistration {
                source,
                item,
                already_known: true,
            })
        }
        Err(e) => Err(e),
    }
}

/// Whether a registration still needs an ingestion job
pub fn needs_processing(registration: &DocumentRegistration) -> bool {
    !registration.already_known
        || matches!(
            registration.item.item_status(),
            ItemStatus::Pending | ItemStatus::Failed
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_common::store::MemoryCatalog;

    #[tokio::test]
    async fn test_register_document_then_duplicate() {
        let catalog = MemoryCatalog::new();

        let first = register_document(&catalog, "notes.txt", None, b"hello notes".to_vec())
            .await
            .unwrap();
        assert!(!first.already_known);
        assert_eq!(first.item.content_kind, "text");

        let second = register_document(&catalog, "notes.txt", None, b"hello notes".to_vec())
            .await
            .unwrap();
        assert!(second.already_known);
        assert_eq!(first.item.id, second.item.id);

        // Different bytes are a different identity
        let third = register_document(&catalog, "notes.txt", None, b"other notes".to_vec())
            .await
            .unwrap();
        assert!(!third.already_known);
        assert_ne!(first.item.id, third.item.id);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let catalog = MemoryCatalog::new();
        let err = register_document(&catalog, "empty.txt", None, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_kind_inference() {
        assert_eq!(kind_from_filename("paper.pdf"), ContentKind::Pdf);
        assert_eq!(kind_from_filename("EPISODE.MP3"), ContentKind::Audio);
        assert_eq!(kind_from_filename("readme.md"), ContentKind::Text);
    }

    #[test]
    fn test_content_hash_stability() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }
}
