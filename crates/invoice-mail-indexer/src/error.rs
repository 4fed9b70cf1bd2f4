//! Error taxonomy shared by every stage of the ingestion pipeline.

use axum::http::StatusCode;

/// Errors raised while decoding, enriching and persisting a single email.
///
/// Each variant maps to one failure kind; callers propagate them unchanged.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The raw bytes are not a usable MIME message.
    #[error("email parse error: {0}")]
    Parse(String),
    /// The entity recognizer could not run.
    #[error("invoice extraction error: {0}")]
    Extraction(String),
    /// The embedding model could not produce a vector for the body.
    #[error("embedding error: {0}")]
    Embedding(String),
    /// The vector index could not be created or described.
    #[error("index provisioning error: {0}")]
    IndexProvisioning(String),
    /// The write to the vector index failed in transport or at the service.
    #[error("vector store write error: {0}")]
    StoreWrite(String),
    /// Vector length disagrees with the configured index dimension.
    #[error("vector dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// An external call did not complete in time.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
}

impl IngestError {
    /// Stable machine-readable name, used in API responses and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Parse(_) => "parse",
            IngestError::Extraction(_) => "extraction",
            IngestError::Embedding(_) => "embedding",
            IngestError::IndexProvisioning(_) => "index_provisioning",
            IngestError::StoreWrite(_) => "store_write",
            IngestError::DimensionMismatch { .. } => "dimension_mismatch",
            IngestError::Timeout { .. } => "timeout",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Parse(_) => StatusCode::BAD_REQUEST,
            IngestError::Embedding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IngestError::DimensionMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::StoreWrite(_) => StatusCode::BAD_GATEWAY,
            IngestError::Extraction(_) | IngestError::IndexProvisioning(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            IngestError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
