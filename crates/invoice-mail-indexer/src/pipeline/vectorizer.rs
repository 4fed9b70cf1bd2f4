//! Body text to fixed-length embedding vectors.
//!
//! Two embedders are provided: a local ONNX model through fastembed (no
//! network once the model files are cached) and an OpenAI-compatible
//! `/v1/embeddings` HTTP backend. Both implement [`Embedder`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> IngestResult<Vec<f32>>;

    /// Output length; constant for the lifetime of the embedder.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Wraps an [`Embedder`] with a per-call timeout and output-length checks.
#[derive(Clone)]
pub struct ContentVectorizer {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl ContentVectorizer {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub async fn vectorize(&self, body: &str) -> IngestResult<Vec<f32>> {
        let vector = tokio::time::timeout(self.timeout, self.embedder.embed(body))
            .await
            .map_err(|_| IngestError::Timeout {
                operation: "embedding",
                seconds: self.timeout.as_secs(),
            })??;

        if vector.is_empty() {
            return Err(IngestError::Embedding(format!(
                "{} returned an empty vector",
                self.embedder.model_name()
            )));
        }
        if vector.len() != self.embedder.dimension() {
            return Err(IngestError::Embedding(format!(
                "{} returned {} values, expected {}",
                self.embedder.model_name(),
                vector.len(),
                self.embedder.dimension()
            )));
        }
        debug!("Vectorized body ({} chars) into {} dims", body.len(), vector.len());
        Ok(vector)
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    /// Local sentence-transformer model executed with ONNX Runtime.
    pub struct FastEmbedder {
        model: Arc<TextEmbedding>,
        model_name: String,
        dimension: usize,
    }

    impl FastEmbedder {
        /// Loads (downloading on first use) the named model.
        pub fn try_new(model_name: &str) -> anyhow::Result<Self> {
            let (model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                    (EmbeddingModel::AllMiniLML6V2, 384)
                }
                "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
                    (EmbeddingModel::AllMiniLML12V2, 384)
                }
                "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" | "BAAI/bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
                other => anyhow::bail!("unsupported local embedding model: {}", other),
            };

            let embedding = TextEmbedding::try_new(
                InitOptions::new(model).with_show_download_progress(false),
            )?;
            info!("Loaded local embedding model {} ({} dims)", model_name, dimension);

            Ok(Self {
                model: Arc::new(embedding),
                model_name: model_name.to_string(),
                dimension,
            })
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed(&self, text: &str) -> IngestResult<Vec<f32>> {
            let model = self.model.clone();
            let input = text.to_string();
            let mut batch = tokio::task::spawn_blocking(move || model.embed(vec![input], None))
                .await
                .map_err(|e| IngestError::Embedding(format!("embedding task failed: {}", e)))?
                .map_err(|e| IngestError::Embedding(e.to_string()))?;
            batch
                .pop()
                .ok_or_else(|| IngestError::Embedding("model returned no embeddings".to_string()))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding server speaking the OpenAI `/v1/embeddings` protocol.
pub struct HttpEmbedder {
    base_url: String,
    model_name: String,
    dimension: usize,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model_name: &str,
        dimension: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "embedding URL must be an http(s) URL"
        );
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        info!("HTTP embedder initialized with backend: {}", base_url);
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: model_name.to_string(),
            dimension,
            timeout,
            http_client,
        })
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> IngestResult<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model_name,
            input: vec![text],
        };
        let response = self
            .http_client
            .post(self.embeddings_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IngestError::Timeout {
                        operation: "embedding",
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    IngestError::Embedding(format!("embedding backend request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Embedding(format!(
                "embedding backend returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Embedding(format!("failed to parse embedding response: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| IngestError::Embedding("embedding backend returned no data".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
