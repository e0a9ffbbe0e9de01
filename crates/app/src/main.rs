mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use ensa_rag_core::{EmbedderKind, RagConfig, SimilarityMetric, VectorStoreKind};
use server::{run_server, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ensa-rag", version, about = "Student assistant over the ENSA Marrakech documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Args, Debug)]
struct Settings {
    /// Vector store backend (pinecone or qdrant)
    #[arg(long, env = "RAG_VECTOR_STORE", default_value = "pinecone")]
    vector_store: VectorStoreKind,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Cloud for a newly created serverless index
    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pinecone_cloud: String,

    /// Region for a newly created serverless index
    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pinecone_region: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Index (or collection) name
    #[arg(long, env = "RAG_INDEX_NAME", default_value = ensa_rag_core::DEFAULT_INDEX_NAME)]
    index_name: String,

    /// Embedding backend (ollama or ngram)
    #[arg(long, env = "RAG_EMBEDDER", default_value = "ollama")]
    embedder: EmbedderKind,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "all-minilm")]
    embedding_model: String,

    #[arg(long, env = "RAG_EMBEDDING_DIMENSION", default_value_t = 384)]
    embedding_dimension: usize,

    #[arg(long, env = "RAG_CHAT_MODEL", default_value = "gemma:2b")]
    chat_model: String,

    /// Similarity metric (cosine, dotproduct or euclidean)
    #[arg(long, env = "RAG_METRIC", default_value = "cosine")]
    metric: SimilarityMetric,

    /// Number of chunks handed to the chat model
    #[arg(long, env = "RAG_TOP_K", default_value_t = 3)]
    top_k: usize,

    /// Chunk size in characters
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value_t = 500)]
    chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value_t = 20)]
    chunk_overlap: usize,

    #[arg(long, env = "RAG_EMBED_BATCH_SIZE", default_value_t = 32)]
    embed_batch_size: usize,

    /// Per-request timeout for every provider call
    #[arg(long, env = "RAG_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,
}

impl Settings {
    fn into_config(self) -> RagConfig {
        RagConfig {
            vector_store: self.vector_store,
            pinecone_api_key: self.pinecone_api_key,
            pinecone_cloud: self.pinecone_cloud,
            pinecone_region: self.pinecone_region,
            qdrant_url: self.qdrant_url,
            qdrant_api_key: self.qdrant_api_key,
            index_name: self.index_name,
            embedder: self.embedder,
            ollama_url: self.ollama_url,
            embedding_model: self.embedding_model,
            embedding_dimension: self.embedding_dimension,
            chat_model: self.chat_model,
            metric: self.metric,
            top_k: self.top_k,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embed_batch_size: self.embed_batch_size,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load every PDF in a folder, then chunk, embed and upsert it.
    Ingest {
        /// Folder with the source PDFs (not searched recursively).
        #[arg(long, env = "RAG_DATA_DIR", default_value = "data/")]
        data_dir: PathBuf,
    },
    /// Serve POST /chat over HTTP.
    Serve {
        #[arg(long, env = "RAG_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "RAG_PORT", default_value_t = 5000)]
        port: u16,
    },
    /// Answer a single question and exit.
    Ask {
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.settings.into_config();
    config.validate().context("invalid configuration")?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        vector_store = ?config.vector_store,
        index = %config.index_name,
        "ensa-rag boot"
    );

    match cli.command {
        Command::Ingest { data_dir } => {
            let orchestrator = config.build_orchestrator()?;
            let summary = orchestrator
                .run(&data_dir)
                .await
                .with_context(|| format!("ingestion of {} failed", data_dir.display()))?;

            if summary.skipped_files > 0 {
                warn!(
                    "skipped_files={} for folder={}",
                    summary.skipped_files,
                    data_dir.display()
                );
            }

            println!(
                "{} files ({} skipped), {} pages, {} chunks, {} entries upserted at {}",
                summary.files,
                summary.skipped_files,
                summary.pages,
                summary.chunks,
                summary.upserted,
                summary.finished_at.to_rfc3339()
            );
        }
        Command::Serve { host, port } => {
            let pipeline = Arc::new(config.build_pipeline()?);
            pipeline
                .verify()
                .await
                .context("index is not usable with the configured embedder")?;
            run_server(ServerConfig { host, port }, pipeline).await?;
        }
        Command::Ask { query } => {
            let pipeline = config.build_pipeline()?;
            pipeline
                .verify()
                .await
                .context("index is not usable with the configured embedder")?;
            let answer = pipeline.answer(&query).await.context("query failed")?;
            println!("{answer}");
        }
    }

    Ok(())
}
