use crate::error::ChunkingError;
use crate::models::{Chunk, IngestionOptions, SourceDocument};
use std::collections::HashMap;

/// Break points in order of preference. A break lands right after the
/// separator so paragraph and sentence endings stay with the earlier chunk.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = ChunkingError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

/// Splits every document into overlapping chunks, keeping document order.
///
/// `chunk_index` counts chunks per `source_id`, so all pages of one file
/// share a single sequence.
pub fn split_documents(documents: &[SourceDocument], config: ChunkingConfig) -> Vec<Chunk> {
    let mut next_index: HashMap<&str, u64> = HashMap::new();
    let mut chunks = Vec::new();

    for document in documents {
        let cursor = next_index.entry(document.source_id.as_str()).or_insert(0);
        for text in split_text(&document.text, config) {
            chunks.push(Chunk {
                text,
                source_id: document.source_id.clone(),
                chunk_index: *cursor,
            });
            *cursor += 1;
        }
    }

    chunks
}

/// Splits `text` into pieces of at most `chunk_size` characters.
///
/// Text that already fits is returned untouched as a single piece. Longer
/// text is cut at the best break point inside each window and the next
/// window starts `overlap` characters before the cut, moved forward to a
/// word start when one is available.
///
/// Windows holding only whitespace are dropped. Neighbouring chunks always
/// overlap, except around a whitespace run long enough to fill a window of
/// its own: there the chunks on either side share nothing.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.chunk_size {
        return vec![text.to_string()];
    }

    chunk_spans(&chars, config)
        .into_iter()
        .map(|(start, end)| chars[start..end].iter().collect::<String>())
        .filter(|piece| !piece.trim().is_empty())
        .collect()
}

fn chunk_spans(chars: &[char], config: ChunkingConfig) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let window_end = start + config.chunk_size;
        if window_end >= chars.len() {
            spans.push((start, chars.len()));
            break;
        }

        let cut = find_break(chars, start, window_end, config);
        spans.push((start, cut));
        start = overlap_start(chars, cut, config.overlap);
    }

    spans
}

/// Cut position in `(start + overlap, window_end]`, which keeps the next
/// window start strictly ahead of `start`.
fn find_break(chars: &[char], start: usize, window_end: usize, config: ChunkingConfig) -> usize {
    let lowest = start + config.overlap + 1;
    let half_full = start + config.chunk_size / 2;

    for min_cut in [lowest.max(half_full), lowest] {
        for separator in SEPARATORS {
            if let Some(cut) = last_break_after(chars, separator, min_cut, window_end) {
                return cut;
            }
        }
    }

    window_end
}

fn last_break_after(chars: &[char], separator: &str, min_cut: usize, max_cut: usize) -> Option<usize> {
    let pattern: Vec<char> = separator.chars().collect();
    (min_cut.max(pattern.len())..=max_cut)
        .rev()
        .find(|&cut| chars[cut - pattern.len()..cut] == pattern[..])
}

fn overlap_start(chars: &[char], cut: usize, overlap: usize) -> usize {
    let earliest = cut - overlap;
    if earliest == 0 || chars[earliest - 1].is_whitespace() {
        return earliest;
    }

    (earliest + 1..cut)
        .find(|&position| chars[position - 1].is_whitespace() && !chars[position].is_whitespace())
        .unwrap_or(earliest)
}
