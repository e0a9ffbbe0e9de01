pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{split_documents, split_text, ChunkingConfig};
pub use config::{EmbedderKind, RagConfig, VectorStoreKind, DEFAULT_INDEX_NAME};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingProvider, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ChunkingError, ConfigError, EmbeddingError, GenerationError, IndexError, IngestError,
    IngestionFailure, LoadError, QueryError,
};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{AnswerGenerator, ChatModel, OllamaChatModel, DEFAULT_SYSTEM_TEMPLATE};
pub use ingest::{discover_pdf_files, load_documents, LoadReport, SkippedPdf};
pub use models::{
    AnswerResponse, Chunk, EmbeddingVector, IndexSpec, IndexedEntry, IngestionOptions,
    IngestionSummary, QueryResult, RetrievalOptions, ScoredChunk, SimilarityMetric,
    SourceDocument,
};
pub use normalize::normalize_metadata;
pub use orchestrator::{IngestionOrchestrator, IngestionRun, IngestionStage};
pub use pipeline::{PipelineReply, RagPipeline, GENERIC_FAILURE_MESSAGE, NO_QUERY_MESSAGE};
pub use retriever::Retriever;
pub use store::{build_entries, entry_id};
pub use stores::{InMemoryIndex, PineconeIndex, QdrantIndex, ServerlessSpec};
pub use traits::VectorIndex;
