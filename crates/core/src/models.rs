use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One loaded page of a source file.
///
/// `metadata` carries whatever the loader knows about the page (page number,
/// page count). It is stripped by the metadata normalizer before
/// chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub text: String,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SourceDocument {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    /// Position of the chunk among all chunks of the same source.
    pub chunk_index: u64,
}

pub type EmbeddingVector = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub entry_id: String,
    pub vector: EmbeddingVector,
    pub text: String,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub text: String,
    pub source_id: String,
    pub score: f32,
}

/// Search hits ordered by descending similarity.
pub type QueryResult = Vec<ScoredChunk>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnswerResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            answer: Some(text.into()),
            error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            answer: None,
            error: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    DotProduct,
    Euclidean,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::DotProduct => "dotproduct",
            SimilarityMetric::Euclidean => "euclidean",
        }
    }

    /// Higher is closer for every metric, so euclidean distance is negated.
    pub fn score(&self, left: &[f32], right: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => {
                let dot = dot(left, right);
                let norm_left = dot_self(left).sqrt();
                let norm_right = dot_self(right).sqrt();
                if norm_left == 0.0 || norm_right == 0.0 {
                    0.0
                } else {
                    dot / (norm_left * norm_right)
                }
            }
            SimilarityMetric::DotProduct => dot(left, right),
            SimilarityMetric::Euclidean => -left
                .iter()
                .zip(right)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn dot_self(values: &[f32]) -> f32 {
    values.iter().map(|value| value * value).sum()
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "dotproduct" | "dot" => Ok(SimilarityMetric::DotProduct),
            "euclidean" => Ok(SimilarityMetric::Euclidean),
            other => Err(format!("unknown similarity metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 20,
            embed_batch_size: 32,
        }
    }
}

/// Query-time search parameters. The similarity metric belongs to the index
/// and is fixed when it is created.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub files: usize,
    pub skipped_files: usize,
    pub pages: usize,
    pub chunks: usize,
    pub upserted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
