//! RSS feed source adapter
//!
//! Parses podcast feeds, normalizes entries, and runs discovery: new entries
//! pass the deduplication gate into the catalog, seen GUIDs are skipped.
//! Discovery only enqueues work; it never blocks on extraction or embedding.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use recall_common::db::models::{Source, SourceKind};
use recall_common::errors::{AppError, Result};
use recall_common::extract::ContentKind;
use recall_common::store::{Catalog, NewContentItem};
use recall_common::{db::models::ContentItem, metrics};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// One normalized feed entry
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub guid: String,
    pub title: Option<String>,
    pub media_url: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// A parsed feed with channel metadata
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

/// Outcome of one discovery run over a source
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Items that passed the deduplication gate this run
    pub new_items: Vec<ContentItem>,
    /// Entries skipped because their identity key was already seen
    pub seen: usize,
}

/// Parse an RSS 2.0 feed document
pub fn parse_feed(xml: &[u8]) -> Result<ParsedFeed> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut buf = Vec::new();

    let mut in_item = false;
    let mut current_tag: Vec<u8> = Vec::new();
    let mut entry = EntryBuilder::default();

    loop {
        let event = reader.read_event_into(&mut buf);
        match event {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"item" || name == b"entry" {
                    in_item = true;
                    entry = EntryBuilder::default();
                } else if name == b"enclosure" && in_item {
                    let (href, kind) = enclosure_attrs(&e);
                    entry.offer_enclosure(href, kind);
                } else {
                    current_tag = name;
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"enclosure" && in_item {
                    let (href, kind) = enclosure_attrs(&e);
                    entry.offer_enclosure(href, kind);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().trim().to_string();
                apply_text(&mut feed, &mut entry, in_item, &current_tag, text);
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(&t.into_inner()).trim().to_string();
                apply_text(&mut feed, &mut entry, in_item, &current_tag, text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"item" || name.as_ref() == b"entry" {
                    in_item = false;
                    feed.entries.push(entry.build());
                    entry = EntryBuilder::default();
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::MalformedContent {
                    message: format!("Failed to parse feed XML: {}", e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    if feed.entries.is_empty() && feed.title.is_none() {
        return Err(AppError::MalformedContent {
            message: "Document does not look like an RSS feed".to_string(),
        });
    }

    Ok(feed)
}

fn apply_text(
    feed: &mut ParsedFeed,
    entry: &mut EntryBuilder,
    in_item: bool,
    tag: &[u8],
    text: String,
) {
    if text.is_empty() {
        return;
    }
    if in_item {
        entry.set_field(tag, text);
    } else if tag == b"title" && feed.title.is_none() {
        feed.title = Some(text);
    } else if (tag == b"description" || tag == b"subtitle") && feed.description.is_none() {
        feed.description = Some(text);
    }
}

#[derive(Default)]
struct EntryBuilder {
    guid: Option<String>,
    title: Option<String>,
    link: Option<String>,
    enclosure_url: Option<String>,
    published: Option<String>,
    summary: Option<String>,
}

impl EntryBuilder {
    fn set_field(&mut self, tag: &[u8], text: String) {
        if tag == b"guid" || tag == b"id" {
            self.guid = Some(text);
        } else if tag == b"title" {
            self.title = Some(text);
        } else if tag == b"link" {
            self.link = Some(text);
        } else if tag == b"pubDate" || tag == b"published" || tag == b"updated" {
            self.published = Some(text);
        } else if tag == b"description" || tag == b"summary" {
            self.summary = Some(text);
        }
    }

    fn offer_enclosure(&mut self, href: Option<String>, kind: Option<String>) {
        let Some(href) = href else { return };
        let is_audio = kind.as_deref().map(|k| k.starts_with("audio")).unwrap_or(false);
        // Prefer audio enclosures; keep the first one otherwise
        if is_audio || self.enclosure_url.is_none() {
            self.enclosure_url = Some(href);
        }
    }

    fn build(self) -> ParsedEntry {
        let guid = self
            .guid
            .clone()
            .unwrap_or_else(|| guid_fallback(self.title.as_deref(), self.link.as_deref()));

        let published_at = self.published.as_deref().and_then(parse_published);
        let media_url = self.enclosure_url.or_else(|| self.link.clone());

        ParsedEntry {
            guid,
            title: self.title,
            media_url,
            link: self.link,
            published_at,
            summary: self.summary,
        }
    }
}

fn enclosure_attrs(e: &quick_xml::events::BytesStart<'_>) -> (Option<String>, Option<String>) {
    let mut href = None;
    let mut kind = None;
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"url" {
            href = attr.unescape_value().ok().map(|v| v.into_owned());
        } else if attr.key.as_ref() == b"type" {
            kind = attr.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    (href, kind)
}

/// Entries without a GUID fall back to a content hash of title + link
fn guid_fallback(title: Option<&str>, link: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.unwrap_or_default().as_bytes());
    hasher.update(link.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Validate a feed URL before registration
pub fn validate_feed_url(url: &str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::Validation {
            message: "Feed URL must start with http or https".to_string(),
            field: Some("feed_url".to_string()),
        });
    }
    Ok(())
}

/// Feed discovery: fetches, parses, and syncs feeds into the catalog
pub struct FeedDiscovery {
    catalog: Arc<dyn Catalog>,
    client: reqwest::Client,
}

impl FeedDiscovery {
    pub fn new(catalog: Arc<dyn Catalog>, fetch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to build feed HTTP client: {}", e),
            })?;

        Ok(Self { catalog, client })
    }

    /// Register a feed source by URL, fetching channel metadata.
    /// Re-registering a known URL refreshes metadata and returns the
    /// existing source.
    #[instrument(skip(self))]
    pub async fn register_feed(&self, feed_url: &str) -> Result<Source> {
        validate_feed_url(feed_url)?;
        let parsed = self.fetch_feed(feed_url).await?;

        self.catalog
            .upsert_source(
                SourceKind::Feed,
                feed_url,
                parsed.title.clone(),
                parsed.description.clone(),
            )
            .await
    }

    /// Fetch and parse the feed document for a URL
    pub async fn fetch_feed(&self, feed_url: &str) -> Result<ParsedFeed> {
        info!(url = %feed_url, "Fetching feed");

        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| AppError::TransientIo {
                message: format!("Feed fetch failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::from_provider_status(
                "feed",
                status,
                format!("fetching {}", feed_url),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| AppError::TransientIo {
            message: format!("Feed body read failed: {}", e),
        })?;

        parse_feed(&bytes)
    }

    /// Run one discovery cycle: fetch the feed and sync its entries
    #[instrument(skip(self, source), fields(source_id = %source.id))]
    pub async fn discover(&self, source: &Source) -> Result<DiscoveryOutcome> {
        let parsed = self.fetch_feed(&source.identity_key).await?;
        self.sync_entries(source, &parsed).await
    }

    /// Sync parsed entries into the catalog behind the deduplication gate.
    ///
    /// Running this twice over an unchanged feed discovers zero new items
    /// the second time and leaves the catalog untouched.
    pub async fn sync_entries(
        &self,
        source: &Source,
        parsed: &ParsedFeed,
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();
        let mut newest_published: Option<DateTime<Utc>> = None;

        for entry in &parsed.entries {
            if let Some(published) = entry.published_at {
                if newest_published.map_or(true, |n| published > n) {
                    newest_published = Some(published);
                }
            }

            let (content_kind, media_url, payload) = match (&entry.media_url, &entry.summary) {
                (Some(url), _) => (ContentKind::Audio, Some(url.clone()), None),
                (None, Some(summary)) => {
                    (ContentKind::Text, None, Some(summary.clone().into_bytes()))
                }
                (None, None) => {
                    warn!(guid = %entry.guid, "Entry has no media or summary, skipping");
                    continue;
                }
            };

            let new_item = NewContentItem {
                source_id: source.id,
                identity_key: entry.guid.clone(),
                content_kind: String::from(content_kind),
                title: entry.title.clone(),
                media_url,
                payload,
                published_at: entry.published_at,
            };

            match self.catalog.insert_item(new_item).await {
                Ok(item) => {
                    metrics::record_item_discovered("feed");
                    outcome.new_items.push(item);
                }
                Err(AppError::DuplicateItem { .. }) => {
                    metrics::record_item_deduplicated("feed");
                    outcome.seen += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.catalog
            .touch_source_cursor(source.id, Utc::now(), newest_published)
            .await?;

        info!(
            source_id = %source.id,
            new = outcome.new_items.len(),
            seen = outcome.seen,
            "Feed discovery complete"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_common::store::MemoryCatalog;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Deep Dives</title>
    <description>A show about everything</description>
    <item>
      <guid>episode-1</guid>
      <title>Origins</title>
      <link>https://example.com/ep1</link>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
      <enclosure url="https://cdn.example.com/ep1.mp3" type="audio/mpeg" length="1"/>
      <description>The first episode.</description>
    </item>
    <item>
      <guid>episode-2</guid>
      <title>Growth</title>
      <link>https://example.com/ep2</link>
      <pubDate>Mon, 13 Jan 2025 10:00:00 GMT</pubDate>
      <enclosure url="https://cdn.example.com/ep2.mp3" type="audio/mpeg" length="1"/>
    </item>
    <item>
      <title>No Guid Here</title>
      <link>https://example.com/ep3</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_channel_and_entries() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Deep Dives"));
        assert_eq!(feed.description.as_deref(), Some("A show about everything"));
        assert_eq!(feed.entries.len(), 3);

        let first = &feed.entries[0];
        assert_eq!(first.guid, "episode-1");
        assert_eq!(
            first.media_url.as_deref(),
            Some("https://cdn.example.com/ep1.mp3")
        );
        assert!(first.published_at.is_some());
    }

    #[test]
    fn test_guid_fallback_is_stable() {
        let feed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();
        let third = &feed.entries[2];
        assert_eq!(
            third.guid,
            guid_fallback(Some("No Guid Here"), Some("https://example.com/ep3"))
        );

        // Same inputs, same key
        assert_eq!(
            guid_fallback(Some("a"), Some("b")),
            guid_fallback(Some("a"), Some("b"))
        );
        assert_ne!(
            guid_fallback(Some("a"), Some("b")),
            guid_fallback(Some("a"), Some("c"))
        );
    }

    #[test]
    fn test_parse_rejects_non_feed_document() {
        let err = parse_feed(b"<html><body>nope</body></html>").unwrap_err();
        assert!(matches!(err, AppError::MalformedContent { .. }));
    }

    #[test]
    fn test_validate_feed_url() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("ftp://example.com/feed.xml").is_err());
    }

    #[tokio::test]
    async fn test_sync_entries_dedupes_on_second_run() {
        let catalog = Arc::new(MemoryCatalog::new());
        let discovery =
            FeedDiscovery::new(catalog.clone(), Duration::from_secs(5)).unwrap();

        let source = catalog
            .upsert_source(
                SourceKind::Feed,
                "https://example.com/feed.xml",
                Some("Deep Dives".to_string()),
                None,
            )
            .await
            .unwrap();

        let parsed = parse_feed(SAMPLE_FEED.as_bytes()).unwrap();

        let first = discovery.sync_entries(&source, &parsed).await.unwrap();
        assert_eq!(first.new_items.len(), 3);
        assert_eq!(first.seen, 0);

        let second = discovery.sync_entries(&source, &parsed).await.unwrap();
        assert_eq!(second.new_items.len(), 0);
        assert_eq!(second.seen, 3);

        assert_eq!(catalog.count_items(source.id).await.unwrap(), 3);

        // Cursor advanced to the newest entry's publish time
        let source = catalog.find_source(source.id).await.unwrap().unwrap();
        assert!(source.last_polled_at.is_some());
        assert!(source.last_entry_published_at.is_some());
    }
}
