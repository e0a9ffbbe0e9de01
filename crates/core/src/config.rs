use crate::embeddings::{
    CharacterNgramEmbedder, EmbeddingProvider, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
use crate::error::ConfigError;
use crate::extractor::LopdfExtractor;
use crate::generation::{AnswerGenerator, OllamaChatModel};
use crate::models::{IndexSpec, IngestionOptions, RetrievalOptions, SimilarityMetric};
use crate::orchestrator::IngestionOrchestrator;
use crate::pipeline::RagPipeline;
use crate::retriever::Retriever;
use crate::stores::{PineconeIndex, QdrantIndex, ServerlessSpec};
use crate::traits::VectorIndex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_INDEX_NAME: &str = "ensa-chatbot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    #[default]
    Pinecone,
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    #[default]
    Ollama,
    Ngram,
}

impl FromStr for VectorStoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(VectorStoreKind::Pinecone),
            "qdrant" => Ok(VectorStoreKind::Qdrant),
            other => Err(format!("unknown vector store: {other}")),
        }
    }
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(EmbedderKind::Ollama),
            "ngram" => Ok(EmbedderKind::Ngram),
            other => Err(format!("unknown embedder: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub vector_store: VectorStoreKind,
    pub pinecone_api_key: Option<String>,
    pub pinecone_cloud: String,
    pub pinecone_region: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub index_name: String,
    pub embedder: EmbedderKind,
    pub ollama_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_model: String,
    pub metric: SimilarityMetric,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub request_timeout: Duration,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vector_store: VectorStoreKind::Pinecone,
            pinecone_api_key: None,
            pinecone_cloud: "aws".to_string(),
            pinecone_region: "us-east-1".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            embedder: EmbedderKind::Ollama,
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSIONS,
            chat_model: "gemma:2b".to_string(),
            metric: SimilarityMetric::Cosine,
            top_k: 3,
            chunk_size: 500,
            chunk_overlap: 20,
            embed_batch_size: 32,
            request_timeout: Duration::from_secs(60),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Parses a base url and makes sure relative joins append to its path.
fn base_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|source| ConfigError::Url { name, source })
}

fn invalid(name: &'static str, details: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        details: details.to_string(),
    }
}

impl RagConfig {
    /// Checks every setting needed before serving traffic or reading files.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_store == VectorStoreKind::Pinecone
            && non_blank(self.pinecone_api_key.as_deref()).is_none()
        {
            return Err(ConfigError::Missing("PINECONE_API_KEY"));
        }
        if self.index_name.trim().is_empty() {
            return Err(ConfigError::Missing("index name"));
        }
        if self.embedding_dimension == 0 {
            return Err(invalid("embedding dimension", "must be greater than zero"));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k", "must be greater than zero"));
        }
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(invalid(
                "chunk size",
                format!(
                    "overlap ({}) must be smaller than a non-zero chunk size ({})",
                    self.chunk_overlap, self.chunk_size
                ),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(invalid("embed batch size", "must be greater than zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request timeout", "must be greater than zero"));
        }
        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::Missing("chat model"));
        }
        base_url("ollama url", &self.ollama_url)?;
        if self.vector_store == VectorStoreKind::Qdrant {
            base_url("qdrant url", &self.qdrant_url)?;
        }
        Ok(())
    }

    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            name: self.index_name.trim().to_string(),
            dimension: self.embedding_dimension,
            metric: self.metric,
        }
    }

    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embed_batch_size: self.embed_batch_size,
        }
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions { top_k: self.top_k }
    }

    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
        match self.embedder {
            EmbedderKind::Ngram => Ok(Arc::new(CharacterNgramEmbedder {
                dimensions: self.embedding_dimension,
            })),
            EmbedderKind::Ollama => {
                let base = base_url("ollama url", &self.ollama_url)?;
                let embedder = OllamaEmbedder::new(
                    &base,
                    &self.embedding_model,
                    self.embedding_dimension,
                    self.request_timeout,
                )
                .map_err(|error| invalid("embedding model", error))?;
                Ok(Arc::new(embedder))
            }
        }
    }

    pub fn build_index(&self) -> Result<Arc<dyn VectorIndex>, ConfigError> {
        let name = self.index_name.trim();
        match self.vector_store {
            VectorStoreKind::Pinecone => {
                let api_key = non_blank(self.pinecone_api_key.as_deref())
                    .ok_or(ConfigError::Missing("PINECONE_API_KEY"))?;
                let index = PineconeIndex::new(
                    api_key,
                    name,
                    ServerlessSpec {
                        cloud: self.pinecone_cloud.clone(),
                        region: self.pinecone_region.clone(),
                    },
                    self.request_timeout,
                )
                .map_err(|error| invalid("pinecone", error))?;
                Ok(Arc::new(index))
            }
            VectorStoreKind::Qdrant => {
                let endpoint = base_url("qdrant url", &self.qdrant_url)?;
                let api_key = non_blank(self.qdrant_api_key.as_deref()).map(str::to_string);
                let index = QdrantIndex::new(&endpoint, name, api_key, self.request_timeout)
                    .map_err(|error| invalid("qdrant", error))?;
                Ok(Arc::new(index))
            }
        }
    }

    /// Builds the shared, read-only query pipeline handle.
    pub fn build_pipeline(&self) -> Result<RagPipeline, ConfigError> {
        self.validate()?;
        let base = base_url("ollama url", &self.ollama_url)?;
        let chat_model = OllamaChatModel::new(&base, &self.chat_model, self.request_timeout)
            .map_err(|error| invalid("chat model", error))?;

        let retriever = Retriever::new(
            self.build_embedder()?,
            self.build_index()?,
            self.retrieval_options(),
            self.request_timeout,
        );

        Ok(RagPipeline::new(
            retriever,
            AnswerGenerator::new(Arc::new(chat_model)),
            self.request_timeout,
        ))
    }

    pub fn build_orchestrator(&self) -> Result<IngestionOrchestrator, ConfigError> {
        self.validate()?;
        Ok(IngestionOrchestrator::new(
            Arc::new(LopdfExtractor),
            self.build_embedder()?,
            self.build_index()?,
            self.index_spec(),
            self.ingestion_options(),
        ))
    }
}
