//! The query pipeline: question → embedding → search → grounded answer.
//!
//! [`RagPipeline`] is built once at startup and shared read-only across
//! requests. Provider failures are turned into a [`PipelineReply`] here so
//! that no internal error text reaches a caller.

use crate::error::QueryError;
use crate::generation::AnswerGenerator;
use crate::models::AnswerResponse;
use crate::retriever::Retriever;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

pub const NO_QUERY_MESSAGE: &str = "No query provided";

pub const GENERIC_FAILURE_MESSAGE: &str = "An internal server error occurred.";

pub(crate) async fn bounded<T, E, F>(
    stage: &'static str,
    limit: Duration,
    future: F,
) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<QueryError>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(QueryError::Timeout {
            stage,
            seconds: limit.as_secs(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineReply {
    Answer(String),
    InvalidQuery,
    Failed,
}

impl PipelineReply {
    pub fn into_response(self) -> AnswerResponse {
        match self {
            PipelineReply::Answer(answer) => AnswerResponse::answer(answer),
            PipelineReply::InvalidQuery => AnswerResponse::error(NO_QUERY_MESSAGE),
            PipelineReply::Failed => AnswerResponse::answer(GENERIC_FAILURE_MESSAGE),
        }
    }
}

pub struct RagPipeline {
    retriever: Retriever,
    generator: AnswerGenerator,
    timeout: Duration,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, generator: AnswerGenerator, timeout: Duration) -> Self {
        Self {
            retriever,
            generator,
            timeout,
        }
    }

    /// Startup check: fails when the index is missing or its dimension
    /// differs from the embedder's, so a mismatch never reaches a request.
    pub async fn verify(&self) -> Result<(), QueryError> {
        self.retriever.verify().await?;
        info!(model = self.generator.model_name(), "query pipeline verified");
        Ok(())
    }

    /// Runs one question through retrieval and generation.
    ///
    /// Blank questions fail with [`QueryError::Validation`] before any
    /// provider is called.
    pub async fn answer(&self, question: &str) -> Result<String, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::Validation);
        }

        let hits = self.retriever.retrieve(question).await?;
        let context = hits.into_iter().map(|hit| hit.text).collect::<Vec<_>>();

        bounded(
            "generation",
            self.timeout,
            self.generator.generate(question, &context),
        )
        .await
    }

    /// Like [`RagPipeline::answer`], with failures logged and reduced to a
    /// detail-free reply.
    pub async fn respond(&self, question: &str) -> PipelineReply {
        match self.answer(question).await {
            Ok(answer) => {
                info!(model = self.generator.model_name(), "answered query");
                PipelineReply::Answer(answer)
            }
            Err(failure) if failure.is_client_error() => PipelineReply::InvalidQuery,
            Err(failure) => {
                error!(error = %failure, "query pipeline failed");
                PipelineReply::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{
        CharacterNgramEmbedder, EmbeddingProvider, DEFAULT_EMBEDDING_DIMENSIONS,
    };
    use crate::error::{EmbeddingError, GenerationError, IndexError};
    use crate::generation::ChatModel;
    use crate::models::{
        EmbeddingVector, IndexSpec, IndexedEntry, QueryResult, RetrievalOptions, SimilarityMetric,
    };
    use crate::stores::InMemoryIndex;
    use crate::traits::VectorIndex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn name(&self) -> &str {
            "counting"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        async fn embed_batch(
            &self,
            texts: &[&str],
        ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }
    }

    /// Replies with the context it was handed followed by chatter.
    struct ContextEchoModel;

    #[async_trait]
    impl ChatModel for ContextEchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, system: &str, _user: &str) -> Result<String, GenerationError> {
            let context = system.split("\n\n").nth(1).unwrap_or_default();
            Ok(format!(
                "{context} Please check the notice board. Good luck. Anything else?"
            ))
        }
    }

    struct SlowModel;

    #[async_trait]
    impl ChatModel for SlowModel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".to_string())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
            Err(GenerationError::Request {
                provider: "failing".to_string(),
                details: "model crashed with secret stack trace".to_string(),
            })
        }
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        fn backend(&self) -> &str {
            "down"
        }

        async fn ensure_index(&self, _spec: &IndexSpec) -> Result<(), IndexError> {
            Ok(())
        }

        async fn stored_dimension(&self) -> Result<Option<usize>, IndexError> {
            Ok(Some(DEFAULT_EMBEDDING_DIMENSIONS))
        }

        async fn upsert(&self, _entries: &[IndexedEntry]) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search(&self, _vector: &[f32], _top_k: usize) -> Result<QueryResult, IndexError> {
            Err(IndexError::Unavailable(
                "pinecone host ensa-chatbot-xyz unreachable".to_string(),
            ))
        }
    }

    async fn exam_index(embedder: &CharacterNgramEmbedder) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        index
            .ensure_index(&IndexSpec {
                name: "ensa-chatbot".to_string(),
                dimension: embedder.dimensions,
                metric: SimilarityMetric::Cosine,
            })
            .await
            .unwrap();
        let texts = [
            "The exam schedule: written exams run from June 3 to June 14.",
            "The cafeteria serves lunch from noon to two.",
            "Student clubs meet on Wednesday afternoons.",
        ];
        let entries = texts
            .iter()
            .enumerate()
            .map(|(position, text)| IndexedEntry {
                entry_id: position.to_string(),
                vector: embedder.embed_text(text),
                text: text.to_string(),
                source_id: "data/calendar.pdf".to_string(),
            })
            .collect::<Vec<_>>();
        index.upsert(&entries).await.unwrap();
        index
    }

    fn pipeline(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> RagPipeline {
        let timeout = Duration::from_secs(2);
        RagPipeline::new(
            Retriever::new(
                embedder,
                index,
                RetrievalOptions { top_k },
                timeout,
            ),
            AnswerGenerator::new(model),
            timeout,
        )
    }

    #[tokio::test]
    async fn blank_questions_never_reach_the_embedder() {
        let embedder = Arc::new(CountingEmbedder::default());
        let rag = pipeline(
            embedder.clone(),
            Arc::new(InMemoryIndex::new()),
            Arc::new(ContextEchoModel),
            3,
        );

        for question in ["", "   ", "\n\t"] {
            assert!(matches!(rag.answer(question).await, Err(QueryError::Validation)));
            assert_eq!(rag.respond(question).await, PipelineReply::InvalidQuery);
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exam_question_is_answered_from_retrieved_context() {
        let embedder = CharacterNgramEmbedder::default();
        let index = exam_index(&embedder).await;
        let rag = pipeline(Arc::new(embedder), index, Arc::new(ContextEchoModel), 1);

        let answer = rag.answer("What is the exam schedule?").await.unwrap();

        assert!(answer.starts_with("The exam schedule: written exams run from June 3 to June 14."));
        assert!(!answer.contains("cafeteria"));
        let sentences = answer
            .split_inclusive(['.', '!', '?'])
            .filter(|part| !part.trim().is_empty())
            .count();
        assert!(sentences <= 3, "too many sentences in {answer:?}");
    }

    #[tokio::test]
    async fn startup_check_fails_for_mismatched_embedder() {
        let index = exam_index(&CharacterNgramEmbedder::default()).await;
        let rag = pipeline(
            Arc::new(CharacterNgramEmbedder { dimensions: 64 }),
            index.clone(),
            Arc::new(ContextEchoModel),
            3,
        );

        assert!(matches!(
            rag.verify().await,
            Err(QueryError::Index(IndexError::DimensionMismatch {
                expected: 64,
                actual: DEFAULT_EMBEDDING_DIMENSIONS,
                ..
            }))
        ));

        let matching = pipeline(
            Arc::new(CharacterNgramEmbedder::default()),
            index,
            Arc::new(ContextEchoModel),
            3,
        );
        assert!(matching.verify().await.is_ok());
    }

    #[tokio::test]
    async fn index_failure_becomes_generic_reply() {
        let rag = pipeline(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(DownIndex),
            Arc::new(ContextEchoModel),
            3,
        );

        let reply = rag.respond("What is the exam schedule?").await;
        assert_eq!(reply, PipelineReply::Failed);

        let response = reply.into_response();
        assert_eq!(response.answer.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn generation_failure_details_stay_internal() {
        let embedder = CharacterNgramEmbedder::default();
        let index = exam_index(&embedder).await;
        let rag = pipeline(Arc::new(embedder), index, Arc::new(FailingModel), 3);

        assert!(matches!(
            rag.answer("When are exams?").await,
            Err(QueryError::Generation(_))
        ));
        let response = rag.respond("When are exams?").await.into_response();
        let body = format!("{response:?}");
        assert!(!body.contains("secret stack trace"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let embedder = CharacterNgramEmbedder::default();
        let index = exam_index(&embedder).await;
        let rag = pipeline(Arc::new(embedder), index, Arc::new(SlowModel), 3);

        let result = rag.answer("When are exams?").await;
        assert!(matches!(
            result,
            Err(QueryError::Timeout {
                stage: "generation",
                ..
            })
        ));
    }

    #[test]
    fn invalid_query_reply_uses_error_key() {
        let response = PipelineReply::InvalidQuery.into_response();
        assert_eq!(response.error.as_deref(), Some(NO_QUERY_MESSAGE));
        assert!(response.answer.is_none());
    }
}
