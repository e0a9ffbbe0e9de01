use crate::error::IndexError;
use crate::models::{IndexSpec, IndexedEntry, QueryResult, ScoredChunk, SimilarityMetric};
use crate::store::entry_uuid;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

pub struct QdrantIndex {
    endpoint: Url,
    collection: String,
    api_key: Option<String>,
    client: Client,
    metric: RwLock<Option<SimilarityMetric>>,
}

impl QdrantIndex {
    pub fn new(
        endpoint: &Url,
        collection: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: endpoint.clone(),
            collection: collection.into(),
            api_key,
            client: Client::builder().timeout(timeout).build()?,
            metric: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url, IndexError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{path}", self.collection))?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn describe(&self) -> Result<Option<Value>, IndexError> {
        let response = self.authorized(self.client.get(self.url("")?)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(Some(response.json().await?))
    }

    fn check_name(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        if spec.name != self.collection {
            return Err(IndexError::NameMismatch {
                configured: self.collection.clone(),
                requested: spec.name.clone(),
            });
        }
        Ok(())
    }

    async fn stored_metric(&self) -> Result<SimilarityMetric, IndexError> {
        if let Some(metric) = *self.metric.read().await {
            return Ok(metric);
        }

        let description = self.describe().await?.ok_or_else(|| {
            IndexError::Unavailable(format!("collection {} does not exist", self.collection))
        })?;
        let metric = description
            .pointer("/result/config/params/vectors/distance")
            .and_then(Value::as_str)
            .and_then(metric_from_distance)
            .unwrap_or_default();
        *self.metric.write().await = Some(metric);
        Ok(metric)
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::Backend {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn described_size(description: &Value) -> Option<usize> {
    description
        .pointer("/result/config/params/vectors/size")
        .and_then(Value::as_u64)
        .map(|size| size as usize)
}

fn distance_name(metric: SimilarityMetric) -> &'static str {
    match metric {
        SimilarityMetric::Cosine => "Cosine",
        SimilarityMetric::DotProduct => "Dot",
        SimilarityMetric::Euclidean => "Euclid",
    }
}

fn metric_from_distance(distance: &str) -> Option<SimilarityMetric> {
    match distance {
        "Cosine" => Some(SimilarityMetric::Cosine),
        "Dot" => Some(SimilarityMetric::DotProduct),
        "Euclid" => Some(SimilarityMetric::Euclidean),
        _ => None,
    }
}

fn hits_to_result(parsed: &Value, metric: SimilarityMetric) -> QueryResult {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.iter()
        .map(|hit| {
            let raw = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            ScoredChunk {
                text: hit
                    .pointer("/payload/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                source_id: hit
                    .pointer("/payload/source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                // Euclid scores are distances; flip them so higher means closer.
                score: if metric == SimilarityMetric::Euclidean {
                    -raw
                } else {
                    raw
                },
            }
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        self.check_name(spec)?;

        if let Some(description) = self.describe().await? {
            if let Some(actual) = described_size(&description) {
                if actual != spec.dimension {
                    return Err(IndexError::DimensionMismatch {
                        index: self.collection.clone(),
                        expected: spec.dimension,
                        actual,
                    });
                }
            }
            info!(collection = %self.collection, "collection already exists");
        } else {
            info!(collection = %self.collection, dimension = spec.dimension, "creating collection");
            let response = self
                .authorized(self.client.put(self.url("")?))
                .json(&json!({
                    "vectors": {
                        "size": spec.dimension,
                        "distance": distance_name(spec.metric),
                    }
                }))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(backend_error(response.status()));
            }
        }

        *self.metric.write().await = Some(spec.metric);
        Ok(())
    }

    async fn stored_dimension(&self) -> Result<Option<usize>, IndexError> {
        let Some(description) = self.describe().await? else {
            return Ok(None);
        };
        described_size(&description).map(Some).ok_or_else(|| IndexError::Backend {
            backend: "qdrant".to_string(),
            details: "collection has no single vector size".to_string(),
        })
    }

    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        let points = entries
            .iter()
            .map(|entry| {
                json!({
                    "id": entry_uuid(&entry.entry_id).to_string(),
                    "vector": entry.vector,
                    "payload": {
                        "entry_id": entry.entry_id,
                        "text": entry.text,
                        "source": entry.source_id,
                    },
                })
            })
            .collect::<Vec<_>>();

        let response = self
            .authorized(self.client.put(self.url("/points?wait=true")?))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(IndexError::Unavailable(format!(
                "collection {} does not exist",
                self.collection
            ))),
            status if !status.is_success() => Err(backend_error(status)),
            _ => Ok(()),
        }
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<QueryResult, IndexError> {
        let metric = self.stored_metric().await?;
        let response = self
            .authorized(self.client.post(self.url("/points/search")?))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(IndexError::Unavailable(format!(
                "collection {} does not exist",
                self.collection
            ))),
            status if !status.is_success() => Err(backend_error(status)),
            _ => {
                let parsed: Value = response.json().await?;
                Ok(hits_to_result(&parsed, metric))
            }
        }
    }
}
