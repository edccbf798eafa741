use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<&PipelineConfig> for ChunkingConfig {
    fn from(value: &PipelineConfig) -> Self {
        Self {
            max_chars: value.chunk_size,
            overlap_chars: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_chars == 0 {
            return Err(PipelineError::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(PipelineError::Configuration(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Stable chunk identity: identical document content and parameters always
/// produce the same identifier for the same position.
pub fn chunk_identifier(fingerprint: &str, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(sequence.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Splits a document into an ordered chunk sequence. Paragraph boundaries
/// are preferred, sentences next, and a unit that still exceeds the chunk
/// size is hard-cut with exactly `overlap_chars` shared between pieces.
pub fn split_document(
    document: &Document,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, PipelineError> {
    config.validate()?;

    let chunks = split_spans(&document.text, config)
        .into_iter()
        .enumerate()
        .map(|(index, span)| Chunk {
            chunk_id: chunk_identifier(&document.fingerprint, index as u64),
            document_id: document.document_id.clone(),
            sequence: index as u64,
            page: document.page_at(span.offset),
            text: span.text,
            descriptor: document.descriptor.clone(),
        })
        .collect();

    Ok(chunks)
}

#[derive(Debug, Clone)]
struct Span {
    /// Byte offset of the span's own content within the source text; overlap
    /// carried over from the previous chunk does not move it.
    offset: usize,
    text: String,
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_spans(text: &str, config: ChunkingConfig) -> Vec<Span> {
    let mut units = Vec::new();
    for paragraph in paragraph_spans(text) {
        if char_len(&paragraph.text) <= config.max_chars {
            units.push(paragraph);
            continue;
        }
        for sentence in sentence_spans(&paragraph.text, paragraph.offset) {
            if char_len(&sentence.text) <= config.max_chars {
                units.push(sentence);
            } else {
                units.extend(hard_cut(&sentence.text, sentence.offset, config));
            }
        }
    }

    accumulate(units, config)
}

/// Packs boundary-aware units into chunks, seeding each new chunk with the
/// tail of the previous one so context survives the cut point.
fn accumulate(units: Vec<Span>, config: ChunkingConfig) -> Vec<Span> {
    let mut chunks: Vec<Span> = Vec::new();
    let mut current = String::new();
    let mut current_offset = 0;

    for unit in units {
        if current.is_empty() {
            current_offset = unit.offset;
            current = unit.text;
            continue;
        }

        if char_len(&current) + 1 + char_len(&unit.text) <= config.max_chars {
            current.push(' ');
            current.push_str(&unit.text);
            continue;
        }

        let emitted = std::mem::take(&mut current);
        let tail = overlap_tail(&emitted, config.overlap_chars);
        chunks.push(Span {
            offset: current_offset,
            text: emitted,
        });

        current_offset = unit.offset;
        if !tail.is_empty() && char_len(&tail) + 1 + char_len(&unit.text) <= config.max_chars {
            current = format!("{tail} {}", unit.text);
        } else {
            current = unit.text;
        }
    }

    if !current.is_empty() {
        chunks.push(Span {
            offset: current_offset,
            text: current,
        });
    }

    chunks
}

fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    let total = char_len(text);
    text.chars().skip(total.saturating_sub(overlap_chars)).collect()
}

fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for part in text.split("\n\n") {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let lead = part.len() - part.trim_start().len();
            spans.push(Span {
                offset: offset + lead,
                text: normalize_whitespace(trimmed),
            });
        }
        offset += part.len() + 2;
    }
    spans
}

fn sentence_spans(text: &str, base: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((index, ch)) = iter.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = match iter.peek() {
            Some((_, next)) => next.is_whitespace(),
            None => true,
        };
        if at_boundary {
            let end = index + ch.len_utf8();
            let piece = text[start..end].trim();
            if !piece.is_empty() {
                spans.push(Span {
                    offset: base + start,
                    text: piece.to_string(),
                });
            }
            start = end;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        spans.push(Span {
            offset: base + start,
            text: rest.to_string(),
        });
    }

    spans
}

fn hard_cut(text: &str, base: usize, config: ChunkingConfig) -> Vec<Span> {
    let boundaries: Vec<usize> = text.char_indices().map(|(index, _)| index).collect();
    let total = boundaries.len();
    let step = config.max_chars - config.overlap_chars;

    let mut spans = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + config.max_chars).min(total);
        let byte_start = boundaries[start];
        let byte_end = if end == total {
            text.len()
        } else {
            boundaries[end]
        };
        spans.push(Span {
            offset: base + byte_start,
            text: text[byte_start..byte_end].to_string(),
        });
        if end == total {
            break;
        }
        start += step;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceDescriptor;

    fn document(text: &str) -> Document {
        let descriptor = SourceDescriptor::parse("/data/doc.txt").unwrap();
        Document::new(descriptor, text.as_bytes(), text.to_string())
    }

    fn config(max: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars: max,
            overlap_chars: overlap,
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn chunking_is_deterministic() {
        let doc = document("First paragraph about cats.\n\nSecond paragraph about dogs. It keeps going for a while to span chunks.");
        let cfg = config(40, 8);

        let first: Vec<String> = split_document(&doc, cfg)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();
        let second: Vec<String> = split_document(&doc, cfg)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn small_document_yields_single_chunk() {
        let doc = document("Cats are mammals. Dogs are mammals too.");
        let chunks = split_document(&doc, config(500, 50)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].document_id, doc.document_id);
    }

    #[test]
    fn every_chunk_respects_the_size_limit() {
        let text = "Sentence one is here. Sentence two follows it. Sentence three keeps the text growing. Sentence four as well. Sentence five wraps it up.";
        let doc = document(text);
        let cfg = config(50, 10);

        let chunks = split_document(&doc, cfg).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= cfg.max_chars);
        }
    }

    #[test]
    fn hard_cut_pieces_share_exactly_the_overlap() {
        // One long unbroken token forces character-level cuts.
        let text: String = std::iter::repeat('x').take(100).collect();
        let doc = document(&text);
        let cfg = config(30, 10);

        let chunks = split_document(&doc, cfg).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].text.chars().count() - cfg.overlap_chars)
                .collect();
            let next_head: String = pair[1].text.chars().take(cfg.overlap_chars).collect();
            assert_eq!(prev_tail, next_head);
        }
    }

    #[test]
    fn identical_content_reingested_keeps_chunk_ids() {
        let doc_a = document("Shared content across ingestions.");
        let doc_b = document("Shared content across ingestions.");
        let cfg = config(100, 10);

        let ids_a: Vec<String> = split_document(&doc_a, cfg)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();
        let ids_b: Vec<String> = split_document(&doc_b, cfg)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();

        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn changed_content_changes_chunk_ids() {
        let cfg = config(100, 10);
        let old_ids: Vec<String> = split_document(&document("Version one."), cfg)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();
        let new_ids: Vec<String> = split_document(&document("Version two."), cfg)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect();
        assert_ne!(old_ids, new_ids);
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let doc = document("text");
        assert!(matches!(
            split_document(&doc, config(10, 10)),
            Err(PipelineError::Configuration(_))
        ));
    }
}
