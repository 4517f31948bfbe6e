//! Text chunking module
//!
//! Splits extracted text into overlapping windows while preserving
//! source-specific metadata: audio chunks carry the union of the time ranges
//! of the segments they span, document chunks inherit the nearest enclosing
//! section label.
//!
//! Chunking is deterministic: the same text and configuration always yield
//! the same ordinal boundaries, which is what makes chunk ids stable across
//! re-runs.

use recall_common::extract::Extraction;
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub max_chars: usize,
    /// Overlap between consecutive chunks in characters
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap_chars: 200,
        }
    }
}

/// A text chunk with preserved source metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Zero-based position within the item; stable across re-runs
    pub ordinal: i32,
    /// The chunk content
    pub text: String,
    /// Approximate token count (~4 chars per token)
    pub token_count: i32,
    /// Earliest start of the audio segments this chunk spans
    pub start_secs: Option<f64>,
    /// Latest end of the audio segments this chunk spans
    pub end_secs: Option<f64>,
    /// Nearest enclosing structural label for document chunks
    pub section: Option<String>,
}

/// Char span of one extraction segment within the combined text
struct SegmentSpan {
    start: usize,
    end: usize,
    start_secs: Option<f64>,
    end_secs: Option<f64>,
    section: Option<String>,
}

/// Separator used when joining segments into the combined text
const SEGMENT_SEPARATOR: &str = "\n\n";

/// Split an extraction into chunks for embedding.
///
/// A source shorter than one window yields exactly one chunk containing all
/// of it. Empty text yields no chunks.
pub fn chunk_extraction(extraction: &Extraction, config: &ChunkingConfig) -> Vec<TextChunk> {
    let (combined, spans) = combine_segments(extraction);
    let chars: Vec<char> = combined.chars().collect();
    let total = chars.len();

    if combined.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut ordinal = 0;

    while start < total {
        let mut end = (start + config.max_chars).min(total);
        if end < total {
            end = snap_to_sentence(&chars, start, end);
        }

        let text: String = chars[start..end].iter().collect();
        let text = text.trim().to_string();

        if !text.is_empty() {
            let (start_secs, end_secs, section) = span_metadata(&spans, start, end);
            let token_count = (text.chars().count() / 4) as i32;

            chunks.push(TextChunk {
                ordinal,
                text,
                token_count,
                start_secs,
                end_secs,
                section,
            });
            ordinal += 1;
        }

        if end >= total {
            break;
        }

        // Step forward keeping the configured overlap with the snapped end
        start = (end.saturating_sub(config.overlap_chars)).max(start + 1);
    }

    debug!(
        input_chars = total,
        chunk_count = chunks.len(),
        max_chars = config.max_chars,
        "Text chunked"
    );

    chunks
}

/// Join segments into one text, recording each segment's char span
fn combine_segments(extraction: &Extraction) -> (String, Vec<SegmentSpan>) {
    if extraction.segments.is_empty() {
        return (extraction.text.clone(), Vec::new());
    }

    let mut combined = String::new();
    let mut spans = Vec::with_capacity(extraction.segments.len());
    let mut cursor = 0;

    for segment in &extraction.segments {
        if segment.text.is_empty() {
            continue;
        }
        if !combined.is_empty() {
            combined.push_str(SEGMENT_SEPARATOR);
            cursor += SEGMENT_SEPARATOR.chars().count();
        }
        let len = segment.text.chars().count();
        spans.push(SegmentSpan {
            start: cursor,
            end: cursor + len,
            start_secs: segment.start_secs,
            end_secs: segment.end_secs,
            section: segment.section.clone(),
        });
        combined.push_str(&segment.text);
        cursor += len;
    }

    (combined, spans)
}

/// Find a sentence boundary in the tail of the window.
///
/// Searches the last fifth of the window for sentence-ending punctuation
/// followed by whitespace; falls back to the hard boundary.
fn snap_to_sentence(chars: &[char], start: usize, end: usize) -> usize {
    let window = end - start;
    let search_start = start + (window * 4) / 5;

    let mut boundary = None;
    for i in search_start..end.saturating_sub(1) {
        if matches!(chars[i], '.' | '!' | '?') && chars[i + 1].is_whitespace() {
            boundary = Some(i + 1);
        }
    }

    boundary.unwrap_or(end)
}

/// Metadata for the chunk spanning chars [start, end).
///
/// The time range is the union of the overlapped segments' ranges; a chunk
/// never claims a range wider than its source segments justify. The section
/// is the label of the segment enclosing the chunk start.
fn span_metadata(
    spans: &[SegmentSpan],
    start: usize,
    end: usize,
) -> (Option<f64>, Option<f64>, Option<String>) {
    let overlapped: Vec<&SegmentSpan> = spans
        .iter()
        .filter(|s| s.start < end && s.end > start)
        .collect();

    if overlapped.is_empty() {
        return (None, None, None);
    }

    let start_secs = overlapped
        .iter()
        .filter_map(|s| s.start_secs)
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        });
    let end_secs = overlapped
        .iter()
        .filter_map(|s| s.end_secs)
        .fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        });

    let section = overlapped
        .iter()
        .find(|s| s.start <= start && start < s.end)
        .or(overlapped.first())
        .and_then(|s| s.section.clone());

    (start_secs, end_secs, section)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_common::extract::Segment;

    fn plain(text: &str) -> Extraction {
        Extraction {
            text: text.to_string(),
            segments: Vec::new(),
        }
    }

    #[test]
    fn test_short_input_yields_single_chunk() {
        let config = ChunkingConfig::default();
        let chunks = chunk_extraction(&plain("A short note."), &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "A short note.");
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let config = ChunkingConfig::default();
        assert!(chunk_extraction(&plain(""), &config).is_empty());
        assert!(chunk_extraction(&plain("   \n  "), &config).is_empty());
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "This is a sentence. ".repeat(200);
        let config = ChunkingConfig {
            max_chars: 300,
            overlap_chars: 60,
        };

        let first = chunk_extraction(&plain(&text), &config);
        let second = chunk_extraction(&plain(&text), &config);

        assert!(first.len() > 1);
        assert_eq!(first, second);
        for (i, chunk) in first.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as i32);
        }
    }

    #[test]
    fn test_windows_overlap() {
        let text = "word ".repeat(200);
        let config = ChunkingConfig {
            max_chars: 100,
            overlap_chars: 30,
        };

        let chunks = chunk_extraction(&plain(&text), &config);
        assert!(chunks.len() > 2);

        // Consecutive chunks share their boundary region
        let tail: String = chunks[0].text.chars().rev().take(10).collect();
        let tail: String = tail.chars().rev().collect();
        assert!(chunks[1].text.contains(tail.trim()));
    }

    #[test]
    fn test_sentence_boundary_snapping() {
        let text = format!("{} End of story. {}", "x".repeat(80), "y".repeat(200));
        let config = ChunkingConfig {
            max_chars: 110,
            overlap_chars: 10,
        };

        let chunks = chunk_extraction(&plain(&text), &config);
        assert!(chunks[0].text.ends_with("End of story."));
    }

    #[test]
    fn test_time_range_is_union_of_spanned_segments() {
        let extraction = Extraction {
            text: String::new(),
            segments: vec![
                Segment {
                    text: "a".repeat(50),
                    start_secs: Some(0.0),
                    end_secs: Some(10.0),
                    section: None,
                },
                Segment {
                    text: "b".repeat(50),
                    start_secs: Some(10.0),
                    end_secs: Some(20.0),
                    section: None,
                },
                Segment {
                    text: "c".repeat(500),
                    start_secs: Some(20.0),
                    end_secs: Some(120.0),
                    section: None,
                },
            ],
        };
        let config = ChunkingConfig {
            max_chars: 104, // first two segments plus separator
            overlap_chars: 10,
        };

        let chunks = chunk_extraction(&extraction, &config);

        // First chunk covers exactly the first two segments
        assert_eq!(chunks[0].start_secs, Some(0.0));
        assert_eq!(chunks[0].end_secs, Some(20.0));

        // No chunk may claim a range wider than its segments justify
        for chunk in &chunks {
            if let (Some(start), Some(end)) = (chunk.start_secs, chunk.end_secs) {
                assert!(start >= 0.0 && end <= 120.0 && start < end);
            }
        }
    }

    #[test]
    fn test_section_label_from_enclosing_segment() {
        let extraction = Extraction {
            text: String::new(),
            segments: vec![
                Segment {
                    text: "Intro text. ".repeat(10),
                    start_secs: None,
                    end_secs: None,
                    section: Some("introduction".to_string()),
                },
                Segment {
                    text: "Method text. ".repeat(10),
                    start_secs: None,
                    end_secs: None,
                    section: Some("methodology".to_string()),
                },
            ],
        };
        let config = ChunkingConfig {
            max_chars: 2000,
            overlap_chars: 100,
        };

        let chunks = chunk_extraction(&extraction, &config);
        assert_eq!(chunks.len(), 1);
        // Chunk starts inside the first segment
        assert_eq!(chunks[0].section.as_deref(), Some("introduction"));
    }
}
