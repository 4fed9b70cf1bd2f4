//! Vector store gateway: persists (id, vector, metadata) triples into a
//! named, dimensioned index that supports nearest-neighbour queries.

pub mod memory;
pub mod pinecone;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};
use crate::pipeline::extractor::InvoiceDetails;

pub use memory::InMemoryVectorStore;
pub use pinecone::{PineconeConfig, PineconeStore};

/// Metadata stored alongside every email vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub subject: String,
    pub sender: String,
    pub invoice_details: InvoiceDetails,
}

/// The persisted unit. The id uniquely determines the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: IndexMetadata,
}

/// A query hit, ordered by descending score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<IndexMetadata>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create `name` with `dimension` if absent. Must run before any write.
    async fn ensure_index(&self, name: &str, dimension: usize) -> IngestResult<()>;

    /// Insert or overwrite the record for `id`.
    async fn upsert(&self, id: &str, vector: &[f32], metadata: &IndexMetadata) -> IngestResult<()>;

    async fn fetch(&self, id: &str) -> IngestResult<Option<IndexRecord>>;

    async fn query(&self, vector: &[f32], top_k: usize) -> IngestResult<Vec<VectorMatch>>;
}

/// Shared precondition for writes and queries.
pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> IngestResult<()> {
    if vector.len() != expected {
        return Err(IngestError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(3, &[1.0, 2.0, 3.0]).is_ok());
        let err = check_dimension(3, &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            IngestError::DimensionMismatch { expected: 3, actual: 1 }
        ));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_metadata_json_shape() {
        let mut details = InvoiceDetails::new();
        details.insert(crate::pipeline::extractor::InvoiceField::Amount, "$5");
        let metadata = IndexMetadata {
            subject: "Invoice".into(),
            sender: "a@b.test".into(),
            invoice_details: details,
        };
        assert_eq!(
            serde_json::to_value(&metadata).unwrap(),
            serde_json::json!({
                "subject": "Invoice",
                "sender": "a@b.test",
                "invoice_details": {"amount": "$5"}
            })
        );
    }
}
