use crate::embeddings::EmbeddingProvider;
use crate::error::{IndexError, QueryError};
use crate::models::{QueryResult, RetrievalOptions};
use crate::pipeline::bounded;
use crate::traits::VectorIndex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Embeds a question and searches the index with fixed parameters.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    options: RetrievalOptions,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        options: RetrievalOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            options,
            timeout,
        }
    }

    /// Checks that the index exists and has the embedder's dimension.
    pub async fn verify(&self) -> Result<(), QueryError> {
        let expected = self.embedder.dimensions();
        let stored = bounded("index check", self.timeout, self.index.stored_dimension()).await?;

        match stored {
            None => Err(IndexError::Unavailable(format!(
                "{} index does not exist; run ingestion first",
                self.index.backend()
            ))
            .into()),
            Some(actual) if actual != expected => Err(IndexError::DimensionMismatch {
                index: self.index.backend().to_string(),
                expected,
                actual,
            }
            .into()),
            Some(_) => Ok(()),
        }
    }

    /// Up to `top_k` chunks, most similar first. An empty index yields an
    /// empty result rather than an error.
    pub async fn retrieve(&self, question: &str) -> Result<QueryResult, QueryError> {
        let vector = bounded("embedding", self.timeout, self.embedder.embed(question)).await?;
        let mut hits = bounded(
            "vector search",
            self.timeout,
            self.index.search(&vector, self.options.top_k),
        )
        .await?;

        hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        hits.truncate(self.options.top_k);
        debug!(
            backend = self.index.backend(),
            hits = hits.len(),
            top_score = hits.first().map(|hit| hit.score),
            "retrieved context"
        );
        Ok(hits)
    }
}
