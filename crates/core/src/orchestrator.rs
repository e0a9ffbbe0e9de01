use crate::chunking::{split_documents, ChunkingConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{EmbeddingError, IngestError, IngestionFailure, LoadError};
use crate::extractor::PdfExtractor;
use crate::ingest::{load_documents, LoadReport};
use crate::models::{Chunk, IndexSpec, IngestionOptions, IngestionSummary};
use crate::normalize::normalize_metadata;
use crate::store::build_entries;
use crate::traits::VectorIndex;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestionStage {
    NotStarted,
    Loading,
    Normalizing,
    Chunking,
    EmbeddingAndIndexing,
    Done,
    Failed,
}

impl IngestionStage {
    /// The only stage that may follow `self` on success.
    pub fn next(self) -> Option<IngestionStage> {
        match self {
            IngestionStage::NotStarted => Some(IngestionStage::Loading),
            IngestionStage::Loading => Some(IngestionStage::Normalizing),
            IngestionStage::Normalizing => Some(IngestionStage::Chunking),
            IngestionStage::Chunking => Some(IngestionStage::EmbeddingAndIndexing),
            IngestionStage::EmbeddingAndIndexing => Some(IngestionStage::Done),
            IngestionStage::Done | IngestionStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionStage::NotStarted => "not started",
            IngestionStage::Loading => "loading",
            IngestionStage::Normalizing => "normalizing",
            IngestionStage::Chunking => "chunking",
            IngestionStage::EmbeddingAndIndexing => "embedding and indexing",
            IngestionStage::Done => "done",
            IngestionStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one pass through the stages. Runs are not resumable: a failure
/// moves to `Failed` and the whole run has to be started again.
#[derive(Debug, Clone)]
pub struct IngestionRun {
    stage: IngestionStage,
    history: Vec<IngestionStage>,
}

impl Default for IngestionRun {
    fn default() -> Self {
        Self {
            stage: IngestionStage::NotStarted,
            history: vec![IngestionStage::NotStarted],
        }
    }
}

impl IngestionRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> IngestionStage {
        self.stage
    }

    pub fn history(&self) -> &[IngestionStage] {
        &self.history
    }

    pub fn advance(&mut self) -> IngestionStage {
        if let Some(next) = self.stage.next() {
            info!(from = %self.stage, to = %next, "ingestion stage");
            self.stage = next;
            self.history.push(next);
        }
        self.stage
    }

    pub fn fail(&mut self, source: impl Into<IngestError>) -> IngestionFailure {
        let failure = IngestionFailure {
            stage: self.stage,
            source: source.into(),
        };
        error!(stage = %failure.stage, error = %failure.source, "ingestion failed");
        self.stage = IngestionStage::Failed;
        self.history.push(IngestionStage::Failed);
        failure
    }
}

/// Loads, normalizes, chunks, embeds and indexes a folder of pdf files.
pub struct IngestionOrchestrator {
    extractor: Arc<dyn PdfExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    index_spec: IndexSpec,
    options: IngestionOptions,
}

impl IngestionOrchestrator {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        index_spec: IndexSpec,
        options: IngestionOptions,
    ) -> Self {
        Self {
            extractor,
            embedder,
            index,
            index_spec,
            options,
        }
    }

    pub async fn run(&self, folder: &Path) -> Result<IngestionSummary, IngestionFailure> {
        let mut run = IngestionRun::new();
        let started_at = Utc::now();

        run.advance();
        let report = self.load(folder).await.map_err(|error| run.fail(error))?;
        info!(
            files = report.files,
            skipped = report.skipped_files.len(),
            pages = report.documents.len(),
            "loaded documents"
        );

        run.advance();
        let pages = report.documents.len();
        let documents = normalize_metadata(report.documents);

        run.advance();
        let config =
            ChunkingConfig::try_from(&self.options).map_err(|error| run.fail(error))?;
        let chunks = split_documents(&documents, config);
        info!(documents = documents.len(), chunks = chunks.len(), "split documents");

        run.advance();
        let upserted = self
            .embed_and_index(&chunks)
            .await
            .map_err(|error| run.fail(error))?;

        run.advance();
        Ok(IngestionSummary {
            files: report.files,
            skipped_files: report.skipped_files.len(),
            pages,
            chunks: chunks.len(),
            upserted,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn load(&self, folder: &Path) -> Result<LoadReport, LoadError> {
        let extractor = Arc::clone(&self.extractor);
        let folder: PathBuf = folder.to_path_buf();

        tokio::task::spawn_blocking(move || load_documents(&folder, extractor.as_ref()))
            .await
            .map_err(|join_error| LoadError::Io(std::io::Error::other(join_error)))?
    }

    async fn embed_and_index(&self, chunks: &[Chunk]) -> Result<usize, IngestError> {
        if self.embedder.dimensions() != self.index_spec.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.index_spec.dimension,
                actual: self.embedder.dimensions(),
            }
            .into());
        }

        self.index.ensure_index(&self.index_spec).await?;

        let batch_size = self.options.embed_batch_size.max(1);
        let mut upserted = 0;
        for batch in chunks.chunks(batch_size) {
            let texts = batch.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }

            let entries = build_entries(batch, vectors);
            self.index.upsert(&entries).await?;
            upserted += entries.len();
            debug!(upserted, total = chunks.len(), "indexed batch");
        }

        info!(
            index = %self.index_spec.name,
            backend = self.index.backend(),
            upserted,
            "indexing complete"
        );
        Ok(upserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::IndexError;
    use crate::extractor::PageText;
    use crate::models::{EmbeddingVector, IndexedEntry, QueryResult, SimilarityMetric};
    use crate::stores::InMemoryIndex;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Reads the fixture file itself as the text of page 1.
    struct PlainTextExtractor;

    impl PdfExtractor for PlainTextExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, LoadError> {
            let text = fs::read_to_string(path)?;
            Ok(vec![PageText { number: 1, text }])
        }
    }

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        batches: AtomicUsize,
        fail: bool,
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
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::Request {
                    provider: "counting".to_string(),
                    details: "model offline".to_string(),
                });
            }
            self.inner.embed_batch(texts).await
        }
    }

    struct RefusingIndex;

    #[async_trait]
    impl VectorIndex for RefusingIndex {
        fn backend(&self) -> &str {
            "refusing"
        }

        async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
            Err(IndexError::Unavailable(format!("cannot create {}", spec.name)))
        }

        async fn stored_dimension(&self) -> Result<Option<usize>, IndexError> {
            Ok(None)
        }

        async fn upsert(&self, _entries: &[IndexedEntry]) -> Result<(), IndexError> {
            Ok(())
        }

        async fn search(&self, _vector: &[f32], _top_k: usize) -> Result<QueryResult, IndexError> {
            Ok(Vec::new())
        }
    }

    fn spec() -> IndexSpec {
        IndexSpec {
            name: "ensa-chatbot".to_string(),
            dimension: CharacterNgramEmbedder::default().dimensions,
            metric: SimilarityMetric::Cosine,
        }
    }

    fn orchestrator(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        options: IngestionOptions,
    ) -> IngestionOrchestrator {
        IngestionOrchestrator::new(Arc::new(PlainTextExtractor), embedder, index, spec(), options)
    }

    fn corpus() -> Result<tempfile::TempDir, std::io::Error> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("calendar.pdf"),
            "Exams run from June 3 to June 14. Retakes are held in July. ".repeat(20),
        )?;
        fs::write(
            dir.path().join("guide.pdf"),
            "The library opens at eight. Clubs meet on Wednesdays. ".repeat(15),
        )?;
        Ok(dir)
    }

    #[test]
    fn stages_advance_in_order_and_stop_at_done() {
        let mut run = IngestionRun::new();
        while !run.stage().is_terminal() {
            run.advance();
        }
        assert_eq!(
            run.history(),
            &[
                IngestionStage::NotStarted,
                IngestionStage::Loading,
                IngestionStage::Normalizing,
                IngestionStage::Chunking,
                IngestionStage::EmbeddingAndIndexing,
                IngestionStage::Done,
            ]
        );
        assert_eq!(run.advance(), IngestionStage::Done);
    }

    #[test]
    fn failure_records_the_stage_it_happened_in() {
        let mut run = IngestionRun::new();
        run.advance();
        run.advance();
        let failure = run.fail(LoadError::PdfParse("bad".to_string()));
        assert_eq!(failure.stage, IngestionStage::Normalizing);
        assert_eq!(run.stage(), IngestionStage::Failed);
        assert!(run.stage().is_terminal());
    }

    #[tokio::test]
    async fn full_run_populates_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = corpus()?;
        let index = Arc::new(InMemoryIndex::new());
        let summary = orchestrator(
            Arc::new(CharacterNgramEmbedder::default()),
            index.clone(),
            IngestionOptions::default(),
        )
        .run(dir.path())
        .await?;

        assert_eq!(summary.files, 2);
        assert_eq!(summary.pages, 2);
        assert!(summary.chunks > 2);
        assert_eq!(summary.upserted, summary.chunks);
        assert_eq!(index.len().await, summary.chunks);
        Ok(())
    }

    #[tokio::test]
    async fn rerunning_does_not_duplicate_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = corpus()?;
        let index = Arc::new(InMemoryIndex::new());
        let ingest = orchestrator(
            Arc::new(CharacterNgramEmbedder::default()),
            index.clone(),
            IngestionOptions::default(),
        );

        ingest.run(dir.path()).await?;
        let first = index.len().await;
        ingest.run(dir.path()).await?;
        assert_eq!(index.len().await, first);
        Ok(())
    }

    #[tokio::test]
    async fn six_hundred_character_page_becomes_two_entries(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("single.pdf"), "abcdefghij".repeat(60))?;
        let index = Arc::new(InMemoryIndex::new());

        let summary = orchestrator(
            Arc::new(CharacterNgramEmbedder::default()),
            index.clone(),
            IngestionOptions {
                chunk_size: 500,
                chunk_overlap: 20,
                embed_batch_size: 32,
            },
        )
        .run(dir.path())
        .await?;

        assert_eq!(summary.chunks, 2);
        assert_eq!(index.len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn batches_cover_every_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = corpus()?;
        let embedder = Arc::new(CountingEmbedder::default());
        let index = Arc::new(InMemoryIndex::new());

        let summary = orchestrator(
            embedder.clone(),
            index.clone(),
            IngestionOptions {
                embed_batch_size: 2,
                ..IngestionOptions::default()
            },
        )
        .run(dir.path())
        .await?;

        assert_eq!(
            embedder.batches.load(Ordering::SeqCst),
            summary.chunks.div_ceil(2)
        );
        assert_eq!(index.len().await, summary.chunks);
        Ok(())
    }

    #[tokio::test]
    async fn missing_folder_fails_while_loading() {
        let failure = orchestrator(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryIndex::new()),
            IngestionOptions::default(),
        )
        .run(Path::new("/no/such/data"))
        .await
        .unwrap_err();

        assert_eq!(failure.stage, IngestionStage::Loading);
        assert!(matches!(
            failure.source,
            IngestError::Load(LoadError::MissingDirectory(_))
        ));
    }

    #[tokio::test]
    async fn invalid_overlap_fails_while_chunking() -> Result<(), Box<dyn std::error::Error>> {
        let dir = corpus()?;
        let failure = orchestrator(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(InMemoryIndex::new()),
            IngestionOptions {
                chunk_size: 20,
                chunk_overlap: 20,
                embed_batch_size: 8,
            },
        )
        .run(dir.path())
        .await
        .unwrap_err();

        assert_eq!(failure.stage, IngestionStage::Chunking);
        Ok(())
    }

    #[tokio::test]
    async fn index_creation_happens_before_any_embedding() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = corpus()?;
        let embedder = Arc::new(CountingEmbedder::default());
        let failure = orchestrator(
            embedder.clone(),
            Arc::new(RefusingIndex),
            IngestionOptions::default(),
        )
        .run(dir.path())
        .await
        .unwrap_err();

        assert_eq!(failure.stage, IngestionStage::EmbeddingAndIndexing);
        assert!(matches!(failure.source, IngestError::Index(IndexError::Unavailable(_))));
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_aborts_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = corpus()?;
        let index = Arc::new(InMemoryIndex::new());
        let failure = orchestrator(
            Arc::new(CountingEmbedder {
                fail: true,
                ..CountingEmbedder::default()
            }),
            index.clone(),
            IngestionOptions::default(),
        )
        .run(dir.path())
        .await
        .unwrap_err();

        assert_eq!(failure.stage, IngestionStage::EmbeddingAndIndexing);
        assert!(matches!(failure.source, IngestError::Embedding(_)));
        assert!(index.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn embedder_and_index_dimensions_must_agree() -> Result<(), Box<dyn std::error::Error>> {
        let dir = corpus()?;
        let failure = orchestrator(
            Arc::new(CharacterNgramEmbedder { dimensions: 16 }),
            Arc::new(InMemoryIndex::new()),
            IngestionOptions::default(),
        )
        .run(dir.path())
        .await
        .unwrap_err();

        assert!(matches!(
            failure.source,
            IngestError::Embedding(EmbeddingError::DimensionMismatch { .. })
        ));
        Ok(())
    }
}
