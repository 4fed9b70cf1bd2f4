//! Process-local vector store with the same contract as the hosted index.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use super::{check_dimension, cosine_similarity, IndexMetadata, IndexRecord, VectorMatch, VectorStore};
use crate::error::{IngestError, IngestResult};

#[derive(Debug)]
struct ActiveIndex {
    name: String,
    dimension: usize,
}

/// `DashMap`-backed index collection; one index is active at a time.
#[derive(Clone, Default)]
pub struct InMemoryVectorStore {
    dimensions: Arc<DashMap<String, usize>>,
    records: Arc<DashMap<(String, String), IndexRecord>>,
    active: Arc<ArcSwapOption<ActiveIndex>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> IngestResult<Arc<ActiveIndex>> {
        self.active
            .load_full()
            .ok_or_else(|| IngestError::StoreWrite("index has not been initialized".to_string()))
    }

    /// Number of records in the active index.
    pub fn len(&self) -> usize {
        match self.active.load_full() {
            Some(index) => self.records.iter().filter(|r| r.key().0 == index.name).count(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_index(&self, name: &str, dimension: usize) -> IngestResult<()> {
        if dimension == 0 {
            return Err(IngestError::IndexProvisioning(
                "dimension must be positive".to_string(),
            ));
        }
        let existing = *self
            .dimensions
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Created in-memory index '{}' ({} dims)", name, dimension);
                dimension
            });
        if existing != dimension {
            return Err(IngestError::IndexProvisioning(format!(
                "index '{}' exists with dimension {}, requested {}",
                name, existing, dimension
            )));
        }
        self.active.store(Some(Arc::new(ActiveIndex {
            name: name.to_string(),
            dimension,
        })));
        Ok(())
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &IndexMetadata) -> IngestResult<()> {
        let index = self.active()?;
        check_dimension(index.dimension, vector)?;
        self.records.insert(
            (index.name.clone(), id.to_string()),
            IndexRecord {
                id: id.to_string(),
                values: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn fetch(&self, id: &str) -> IngestResult<Option<IndexRecord>> {
        let index = self.active()?;
        Ok(self
            .records
            .get(&(index.name.clone(), id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> IngestResult<Vec<VectorMatch>> {
        let index = self.active()?;
        check_dimension(index.dimension, vector)?;
        let mut matches: Vec<VectorMatch> = self
            .records
            .iter()
            .filter(|r| r.key().0 == index.name)
            .map(|r| VectorMatch {
                id: r.value().id.clone(),
                score: cosine_similarity(vector, &r.value().values),
                metadata: Some(r.value().metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }
}
