use crate::models::{Chunk, EmbeddingVector, IndexedEntry};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable id for a chunk: the same source, position and text always map to
/// the same entry, so re-running ingestion replaces instead of duplicating.
pub fn entry_id(chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk.chunk_index.to_le_bytes());
    hasher.update(chunk.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// UUID form of an entry id for backends that only accept UUID point ids.
pub fn entry_uuid(entry_id: &str) -> Uuid {
    let mut bytes = [0u8; 16];
    for (index, slot) in bytes.iter_mut().enumerate() {
        *slot = entry_id
            .get(index * 2..index * 2 + 2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .unwrap_or_default();
    }
    Uuid::from_bytes(bytes)
}

pub fn build_entries(chunks: &[Chunk], vectors: Vec<EmbeddingVector>) -> Vec<IndexedEntry> {
    chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexedEntry {
            entry_id: entry_id(chunk),
            vector,
            text: chunk.text.clone(),
            source_id: chunk.source_id.clone(),
        })
        .collect()
}
