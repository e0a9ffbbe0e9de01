use crate::error::IndexError;
use crate::models::{IndexSpec, IndexedEntry, QueryResult, ScoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

const CONTROL_PLANE: &str = "https://api.pinecone.io/";
const API_VERSION: &str = "2024-07";
const UPSERT_BATCH: usize = 100;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const READY_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone)]
pub struct ServerlessSpec {
    pub cloud: String,
    pub region: String,
}

impl Default for ServerlessSpec {
    fn default() -> Self {
        Self {
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Pinecone serverless index over the REST API.
///
/// Entries are stored with `text` and `source` metadata keys. The data-plane
/// host is resolved once from the control plane and reused.
pub struct PineconeIndex {
    client: Client,
    control_plane: Url,
    api_key: String,
    index_name: String,
    serverless: ServerlessSpec,
    host: OnceCell<Url>,
}

impl PineconeIndex {
    pub fn new(
        api_key: impl Into<String>,
        index_name: impl Into<String>,
        serverless: ServerlessSpec,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            control_plane: Url::parse(CONTROL_PLANE)?,
            api_key: api_key.into(),
            index_name: index_name.into(),
            serverless,
            host: OnceCell::new(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn describe(&self) -> Result<Option<Value>, IndexError> {
        let url = self
            .control_plane
            .join(&format!("indexes/{}", self.index_name))?;
        let response = self.authorized(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(expect_success(response).await?.json().await?))
    }

    fn check_name(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        if spec.name != self.index_name {
            return Err(IndexError::NameMismatch {
                configured: self.index_name.clone(),
                requested: spec.name.clone(),
            });
        }
        Ok(())
    }

    fn create_body(&self, spec: &IndexSpec) -> Value {
        json!({
            "name": self.index_name,
            "dimension": spec.dimension,
            "metric": spec.metric.as_str(),
            "spec": {
                "serverless": {
                    "cloud": self.serverless.cloud,
                    "region": self.serverless.region,
                }
            }
        })
    }

    async fn create(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let url = self.control_plane.join("indexes")?;
        let response = self
            .authorized(self.client.post(url))
            .json(&self.create_body(spec))
            .send()
            .await?;

        if creation_accepted(response.status()) {
            return Ok(());
        }
        expect_success(response).await?;
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<Value, IndexError> {
        for _ in 0..READY_POLL_ATTEMPTS {
            if let Some(description) = self.describe().await? {
                if is_ready(&description) {
                    return Ok(description);
                }
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Err(IndexError::Unavailable(format!(
            "index {} did not become ready",
            self.index_name
        )))
    }

    async fn host(&self) -> Result<&Url, IndexError> {
        self.host
            .get_or_try_init(|| async {
                let description = self.describe().await?.ok_or_else(|| {
                    IndexError::Unavailable(format!("index {} does not exist", self.index_name))
                })?;
                host_url(&description)
            })
            .await
    }
}

/// A 409 means another writer created the index between describe and create.
fn creation_accepted(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::CONFLICT
}

fn is_ready(description: &Value) -> bool {
    description
        .pointer("/status/ready")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn described_dimension(description: &Value) -> Option<usize> {
    description
        .pointer("/dimension")
        .and_then(Value::as_u64)
        .map(|dimension| dimension as usize)
}

fn host_url(description: &Value) -> Result<Url, IndexError> {
    let host = description
        .pointer("/host")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| IndexError::Backend {
            backend: "pinecone".to_string(),
            details: "index description has no host".to_string(),
        })?;

    if host.starts_with("http://") || host.starts_with("https://") {
        Ok(Url::parse(host)?)
    } else {
        Ok(Url::parse(&format!("https://{host}"))?)
    }
}

async fn expect_success(response: Response) -> Result<Response, IndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Backend {
        backend: "pinecone".to_string(),
        details: format!("{status}: {body}"),
    })
}

fn matches_to_result(parsed: &Value) -> QueryResult {
    parsed
        .pointer("/matches")
        .and_then(Value::as_array)
        .map(|matches| {
            matches
                .iter()
                .map(|hit| ScoredChunk {
                    text: hit
                        .pointer("/metadata/text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    source_id: hit
                        .pointer("/metadata/source")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn backend(&self) -> &str {
        "pinecone"
    }

    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        self.check_name(spec)?;

        let description = match self.describe().await? {
            Some(description) => {
                info!(index = %self.index_name, "index already exists");
                description
            }
            None => {
                info!(index = %self.index_name, dimension = spec.dimension, metric = %spec.metric, "creating index");
                self.create(spec).await?;
                self.wait_until_ready().await?
            }
        };

        if let Some(actual) = described_dimension(&description) {
            if actual != spec.dimension {
                return Err(IndexError::DimensionMismatch {
                    index: self.index_name.clone(),
                    expected: spec.dimension,
                    actual,
                });
            }
        }

        let _ = self.host.set(host_url(&description)?);
        Ok(())
    }

    async fn stored_dimension(&self) -> Result<Option<usize>, IndexError> {
        let Some(description) = self.describe().await? else {
            return Ok(None);
        };
        described_dimension(&description).map(Some).ok_or_else(|| IndexError::Backend {
            backend: "pinecone".to_string(),
            details: "index description has no dimension".to_string(),
        })
    }

    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        let url = self.host().await?.join("vectors/upsert")?;
        for batch in entries.chunks(UPSERT_BATCH) {
            let vectors = batch
                .iter()
                .map(|entry| {
                    json!({
                        "id": entry.entry_id,
                        "values": entry.vector,
                        "metadata": {
                            "text": entry.text,
                            "source": entry.source_id,
                        },
                    })
                })
                .collect::<Vec<_>>();

            let response = self
                .authorized(self.client.post(url.clone()))
                .json(&json!({ "vectors": vectors }))
                .send()
                .await?;
            expect_success(response).await?;
            debug!(count = batch.len(), "upserted batch");
        }

        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<QueryResult, IndexError> {
        let url = self.host().await?.join("query")?;
        let response = self
            .authorized(self.client.post(url))
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
            }))
            .send()
            .await?;

        let parsed: Value = expect_success(response).await?.json().await?;
        let mut hits = matches_to_result(&parsed);
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PineconeIndex {
        PineconeIndex::new(
            "test-key",
            "ensa-chatbot",
            ServerlessSpec::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn spec(name: &str) -> IndexSpec {
        IndexSpec {
            name: name.to_string(),
            dimension: 384,
            metric: crate::models::SimilarityMetric::Cosine,
        }
    }

    #[test]
    fn create_body_is_serverless_and_uses_configured_name() {
        let body = index().create_body(&spec("ensa-chatbot"));
        assert_eq!(
            body,
            json!({
                "name": "ensa-chatbot",
                "dimension": 384,
                "metric": "cosine",
                "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } }
            })
        );
    }

    #[tokio::test]
    async fn other_index_names_are_rejected_before_any_request() {
        let result = index().ensure_index(&spec("someone-else")).await;
        assert!(matches!(
            result,
            Err(IndexError::NameMismatch { ref configured, ref requested })
                if configured == "ensa-chatbot" && requested == "someone-else"
        ));
    }

    #[test]
    fn conflict_on_create_counts_as_created() {
        assert!(creation_accepted(StatusCode::CREATED));
        assert!(creation_accepted(StatusCode::CONFLICT));
        assert!(!creation_accepted(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!creation_accepted(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn readiness_follows_status_flag() {
        assert!(is_ready(&json!({ "status": { "ready": true, "state": "Ready" } })));
        assert!(!is_ready(&json!({ "status": { "ready": false, "state": "Initializing" } })));
        assert!(!is_ready(&json!({ "name": "ensa-chatbot" })));
    }

    #[test]
    fn dimension_is_read_from_description() {
        assert_eq!(described_dimension(&json!({ "dimension": 384 })), Some(384));
        assert_eq!(described_dimension(&json!({})), None);
    }

    #[test]
    fn bare_host_gets_https_scheme() {
        let description = json!({ "host": "ensa-chatbot-abc123.svc.aped-4627-b74a.pinecone.io" });
        let url = host_url(&description).unwrap();
        assert_eq!(
            url.join("query").unwrap().as_str(),
            "https://ensa-chatbot-abc123.svc.aped-4627-b74a.pinecone.io/query"
        );
    }

    #[test]
    fn missing_host_is_a_backend_error() {
        assert!(matches!(
            host_url(&json!({ "name": "ensa-chatbot" })),
            Err(IndexError::Backend { .. })
        ));
    }

    #[test]
    fn matches_keep_text_source_and_order() {
        let parsed = json!({
            "matches": [
                { "id": "1", "score": 0.92, "metadata": { "text": "Exams begin June 3.", "source": "data/calendar.pdf" } },
                { "id": "2", "score": 0.41, "metadata": { "text": "Library hours.", "source": "data/guide.pdf" } }
            ]
        });
        let hits = matches_to_result(&parsed);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "Exams begin June 3.");
        assert_eq!(hits[0].source_id, "data/calendar.pdf");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn empty_query_response_is_empty_result() {
        assert!(matches_to_result(&json!({ "matches": [] })).is_empty());
        assert!(matches_to_result(&json!({})).is_empty());
    }
}
