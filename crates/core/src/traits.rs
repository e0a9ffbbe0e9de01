use crate::error::IndexError;
use crate::models::{IndexSpec, IndexedEntry, QueryResult};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &str;

    /// Creates the index when it is absent; a no-op when it already exists
    /// with the same dimension.
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError>;

    /// Dimension of the stored index, or `None` when it does not exist yet.
    async fn stored_dimension(&self) -> Result<Option<usize>, IndexError>;

    /// Inserts entries, replacing any stored entry with the same `entry_id`.
    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError>;

    /// Returns at most `top_k` entries ordered by descending similarity.
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<QueryResult, IndexError>;
}
