//! Server startup
//!
//! Builds the embedder and vector store from configuration, provisions the
//! index, then serves the webhook. Startup fails fast on any provisioning
//! error; nothing is served until the index is ready.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::{Config, EmbeddingBackend, VectorStoreKind},
    pipeline::{ContentVectorizer, Embedder, HttpEmbedder, IngestionOrchestrator, InvoiceFieldExtractor},
    shared_state::AppState,
    vector_store::{InMemoryVectorStore, PineconeStore, VectorStore},
};

/// Run the ingestion server until ctrl-c.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics()?;
    cfg.print_config();

    let embedder = build_embedder(&cfg).await?;
    if embedder.dimension() != cfg.embedding_dimension {
        anyhow::bail!(
            "EMBEDDING_DIMENSION is {} but model '{}' produces {}-dimensional vectors",
            cfg.embedding_dimension,
            embedder.model_name(),
            embedder.dimension()
        );
    }

    let store = build_store(&cfg)?;
    info!("Ensuring index '{}' ({} dims)", cfg.index_name, cfg.embedding_dimension);
    store
        .ensure_index(&cfg.index_name, cfg.embedding_dimension)
        .await?;

    let orchestrator = IngestionOrchestrator::new(
        InvoiceFieldExtractor::default(),
        ContentVectorizer::new(embedder, cfg.external_call_timeout()),
        store,
    );
    let state = AppState::new(orchestrator, &cfg.default_sender);

    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state, cfg.request_timeout(), cfg.max_email_bytes);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn build_embedder(cfg: &Config) -> anyhow::Result<Arc<dyn Embedder>> {
    match cfg.embedding_backend {
        EmbeddingBackend::Http => Ok(Arc::new(HttpEmbedder::new(
            &cfg.embedding_url,
            &cfg.embedding_model,
            cfg.embedding_dimension,
            cfg.external_call_timeout(),
        )?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => {
            let model = cfg.embedding_model.clone();
            let embedder =
                tokio::task::spawn_blocking(move || crate::pipeline::FastEmbedder::try_new(&model))
                    .await??;
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => Err(anyhow::anyhow!(
            "EMBEDDING_BACKEND=local requires the local-embeddings feature; use EMBEDDING_BACKEND=http"
        )),
    }
}

fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    match cfg.vector_store {
        VectorStoreKind::Pinecone => Ok(Arc::new(PineconeStore::new(cfg.pinecone_config())?)),
        VectorStoreKind::Memory => {
            warn!("Using in-memory vector store; records are lost on restart");
            Ok(Arc::new(InMemoryVectorStore::new()))
        }
    }
}

/// Routes: the webhook plus health and metrics probes.
pub fn build_router(state: AppState, request_timeout: Duration, max_email_bytes: usize) -> Router {
    Router::new()
        .route("/webhook", post(crate::api::webhook))
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(DefaultBodyLimit::max(max_email_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestResult;
    use async_trait::async_trait;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        async fn embed(&self, _text: &str) -> IngestResult<Vec<f32>> {
            Ok(vec![0.5; 3])
        }
        fn dimension(&self) -> usize {
            3
        }
        fn model_name(&self) -> &str {
            "const"
        }
    }

    async fn router(max_email_bytes: usize) -> Router {
        let store = InMemoryVectorStore::new();
        store.ensure_index("emails", 3).await.unwrap();
        let orchestrator = IngestionOrchestrator::new(
            InvoiceFieldExtractor::default(),
            ContentVectorizer::new(Arc::new(ConstEmbedder), Duration::from_secs(5)),
            Arc::new(store),
        );
        build_router(
            AppState::new(orchestrator, "unknown@localhost"),
            Duration::from_secs(5),
            max_email_bytes,
        )
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = router(1024)
            .await
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_email_rejected() {
        let body = format!(
            "From: a@b.test\r\nSubject: big\r\n\r\n{}",
            "x".repeat(4096)
        );
        let response = router(1024)
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_webhook_requires_post() {
        let response = router(1024)
            .await
            .oneshot(Request::builder().uri("/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_build_store_memory() {
        let cfg = Config::from_lookup(|key| match key {
            "VECTOR_STORE" => Some("memory".to_string()),
            _ => None,
        })
        .unwrap();
        let store = build_store(&cfg).unwrap();
        store.ensure_index("emails", 4).await.unwrap();
        assert!(store.fetch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_build_http_embedder_rejects_bad_url() {
        let cfg = Config::from_lookup(|key| match key {
            "VECTOR_STORE" => Some("memory".to_string()),
            "EMBEDDING_BACKEND" => Some("http".to_string()),
            "EMBEDDING_URL" => Some("ftp://nowhere".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(build_embedder(&cfg).await.is_err());
    }
}
