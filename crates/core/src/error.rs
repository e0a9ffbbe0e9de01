use crate::orchestrator::IngestionStage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {name}: {details}")]
    Invalid { name: &'static str, details: String },

    #[error("invalid url for {name}: {source}")]
    Url {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("no pdf files found in {0}")]
    NoDocuments(PathBuf),

    #[error("no readable pages in {folder} ({skipped} file(s) skipped)")]
    NothingReadable { folder: PathBuf, skipped: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),
}

#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed ({provider}): {details}")]
    Request { provider: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("expected {expected} embeddings, provider returned {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index not available: {0}")]
    Unavailable(String),

    #[error("index {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("index is configured as {configured}, but {requested} was requested")]
    NameMismatch { configured: String, requested: String },

    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed ({provider}): {details}")]
    Request { provider: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single question run through the query pipeline.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no query provided")]
    Validation,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },
}

impl QueryError {
    /// True when the caller sent a bad request rather than a provider failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, QueryError::Validation)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
#[error("ingestion failed during {stage}: {source}")]
pub struct IngestionFailure {
    pub stage: IngestionStage,
    #[source]
    pub source: IngestError,
}
