use crate::error::IndexError;
use crate::models::{IndexSpec, IndexedEntry, QueryResult, ScoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Brute-force index held in process memory.
///
/// Entries keep their first insertion position, which breaks score ties so
/// that a fixed index state always yields the same ranking.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    state: RwLock<Option<MemoryState>>,
}

#[derive(Debug)]
struct MemoryState {
    spec: IndexSpec,
    entries: Vec<IndexedEntry>,
    positions: HashMap<String, usize>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state
            .read()
            .await
            .as_ref()
            .map_or(0, |state| state.entries.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn check_dimension(spec: &IndexSpec, actual: usize) -> Result<(), IndexError> {
    if spec.dimension != actual {
        return Err(IndexError::DimensionMismatch {
            index: spec.name.clone(),
            expected: spec.dimension,
            actual,
        });
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        let mut state = self.state.write().await;
        match state.as_ref() {
            Some(existing) => check_dimension(&existing.spec, spec.dimension),
            None => {
                *state = Some(MemoryState {
                    spec: spec.clone(),
                    entries: Vec::new(),
                    positions: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn stored_dimension(&self) -> Result<Option<usize>, IndexError> {
        Ok(self
            .state
            .read()
            .await
            .as_ref()
            .map(|state| state.spec.dimension))
    }

    async fn upsert(&self, entries: &[IndexedEntry]) -> Result<(), IndexError> {
        let mut guard = self.state.write().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| IndexError::Unavailable("in-memory index was not created".to_string()))?;

        for entry in entries {
            check_dimension(&state.spec, entry.vector.len())?;
        }

        for entry in entries {
            if let Some(position) = state.positions.get(&entry.entry_id).copied() {
                state.entries[position] = entry.clone();
                continue;
            }
            let position = state.entries.len();
            state.positions.insert(entry.entry_id.clone(), position);
            state.entries.push(entry.clone());
        }

        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<QueryResult, IndexError> {
        let guard = self.state.read().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| IndexError::Unavailable("in-memory index was not created".to_string()))?;
        check_dimension(&state.spec, vector.len())?;

        let mut scored = state
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                text: entry.text.clone(),
                source_id: entry.source_id.clone(),
                score: state.spec.metric.score(&entry.vector, vector),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
