use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ensa_rag_core::{AnswerResponse, PipelineReply, RagPipeline};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    query: Option<String>,
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(config: ServerConfig, pipeline: Arc<RagPipeline>) -> anyhow::Result<()> {
    let app = app_router(AppState { pipeline });
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid host/port {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("query service ready on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("query service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "ensa-rag"}))
}

/// `POST /chat`: a missing, non-string or blank `query` is a 400 with an
/// `error` key; pipeline failures are a 500 that still uses the `answer` key.
async fn chat(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<AnswerResponse>) {
    let query = serde_json::from_slice::<ChatRequest>(&body)
        .ok()
        .and_then(|request| request.query);

    let Some(query) = query else {
        warn!("rejected chat request without a query");
        return reply(PipelineReply::InvalidQuery);
    };

    info!(query = %query, "received chat query");
    reply(state.pipeline.respond(&query).await)
}

fn reply(outcome: PipelineReply) -> (StatusCode, Json<AnswerResponse>) {
    let status = match outcome {
        PipelineReply::Answer(_) => StatusCode::OK,
        PipelineReply::InvalidQuery => StatusCode::BAD_REQUEST,
        PipelineReply::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(outcome.into_response()))
}
