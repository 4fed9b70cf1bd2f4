//! Pinecone REST client.
//!
//! Control plane calls (describe/create index) go to the controller URL;
//! data plane calls (upsert/fetch/query) go to the host reported by
//! describe. Metadata is flattened on the wire because Pinecone only
//! accepts scalar or string-list metadata values:
//! `subject`, `sender`, `invoice_amount`, `invoice_date`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{check_dimension, IndexMetadata, IndexRecord, VectorMatch, VectorStore};
use crate::error::{IngestError, IngestResult};
use crate::pipeline::extractor::{InvoiceDetails, InvoiceField};

pub const DEFAULT_CONTROLLER_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub controller_url: String,
    pub cloud: String,
    pub region: String,
    pub namespace: String,
    /// Per-request timeout for every HTTP call.
    pub timeout: Duration,
    /// How long `ensure_index` waits for a new index to become ready.
    pub ready_timeout: Duration,
}

#[derive(Debug)]
struct IndexHandle {
    name: String,
    dimension: usize,
    host: String,
}

pub struct PineconeStore {
    config: PineconeConfig,
    http_client: reqwest::Client,
    index: ArcSwapOption<IndexHandle>,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: IndexSpec<'a>,
}

#[derive(Debug, Serialize)]
struct IndexSpec<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    dimension: usize,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<WireVector<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct WireVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, FetchedVector>,
}

#[derive(Debug, Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    values: Vec<f32>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    vector: &'a [f32],
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl PineconeStore {
    pub fn new(config: PineconeConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(
            config.controller_url.starts_with("http://") || config.controller_url.starts_with("https://"),
            "Pinecone controller URL must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|e| anyhow::anyhow!("invalid Pinecone API key: {}", e))?,
        );
        headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        let config = PineconeConfig {
            controller_url: config.controller_url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self {
            config,
            http_client,
            index: ArcSwapOption::empty(),
        })
    }

    fn handle(&self) -> IngestResult<Arc<IndexHandle>> {
        self.index
            .load_full()
            .ok_or_else(|| IngestError::StoreWrite("index has not been initialized".to_string()))
    }

    fn data_error(&self, operation: &'static str, e: reqwest::Error) -> IngestError {
        if e.is_timeout() {
            IngestError::Timeout {
                operation,
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            IngestError::StoreWrite(format!("Pinecone {} request failed: {}", operation, e))
        }
    }

    async fn describe_index(&self, name: &str) -> IngestResult<Option<IndexDescription>> {
        let url = format!("{}/indexes/{}", self.config.controller_url, name);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| IngestError::IndexProvisioning(format!("describe index failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<IndexDescription>()
                .await
                .map(Some)
                .map_err(|e| IngestError::IndexProvisioning(format!("invalid describe response: {}", e))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IngestError::IndexProvisioning(format!(
                    "describe index returned {}: {}",
                    status, body
                )))
            }
        }
    }

    /// Returns the new index's description, or `None` if it already existed.
    async fn create_index(&self, name: &str, dimension: usize) -> IngestResult<Option<IndexDescription>> {
        let request = CreateIndexRequest {
            name,
            dimension,
            metric: "cosine",
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: &self.config.cloud,
                    region: &self.config.region,
                },
            },
        };
        let response = self
            .http_client
            .post(format!("{}/indexes", self.config.controller_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| IngestError::IndexProvisioning(format!("create index failed: {}", e)))?;

        match response.status() {
            StatusCode::CONFLICT => {
                warn!("Index '{}' was created concurrently", name);
                Ok(None)
            }
            status if status.is_success() => response
                .json::<IndexDescription>()
                .await
                .map(Some)
                .map_err(|e| IngestError::IndexProvisioning(format!("invalid create response: {}", e))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IngestError::IndexProvisioning(format!(
                    "create index returned {}: {}",
                    status, body
                )))
            }
        }
    }

    async fn wait_until_ready(&self, name: &str) -> IngestResult<IndexDescription> {
        let started = Instant::now();
        loop {
            if let Some(description) = self.describe_index(name).await? {
                if description.status.ready {
                    return Ok(description);
                }
                debug!("Index '{}' not ready yet (state: {})", name, description.status.state);
            }
            if started.elapsed() >= self.config.ready_timeout {
                return Err(IngestError::IndexProvisioning(format!(
                    "index '{}' not ready after {}s",
                    name,
                    self.config.ready_timeout.as_secs()
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn dimension_conflict(name: &str, existing: usize, requested: usize) -> IngestError {
    IngestError::IndexProvisioning(format!(
        "index '{}' exists with dimension {}, requested {}",
        name, existing, requested
    ))
}

fn to_wire_metadata(metadata: &IndexMetadata) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("subject".into(), Value::String(metadata.subject.clone()));
    map.insert("sender".into(), Value::String(metadata.sender.clone()));
    for (field, value) in metadata.invoice_details.iter() {
        map.insert(format!("invoice_{}", field), Value::String(value.to_string()));
    }
    map
}

fn from_wire_metadata(map: &Map<String, Value>) -> IndexMetadata {
    let text = |key: &str| map.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let mut invoice_details = InvoiceDetails::new();
    for field in InvoiceField::ALL {
        if let Some(value) = map.get(&format!("invoice_{}", field)).and_then(Value::as_str) {
            invoice_details.insert(field, value);
        }
    }
    IndexMetadata {
        subject: text("subject"),
        sender: text("sender"),
        invoice_details,
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn ensure_index(&self, name: &str, dimension: usize) -> IngestResult<()> {
        let description = match self.describe_index(name).await? {
            Some(existing) => {
                if existing.dimension != dimension {
                    return Err(dimension_conflict(name, existing.dimension, dimension));
                }
                info!("Using existing Pinecone index '{}'", name);
                if existing.status.ready {
                    existing
                } else {
                    self.wait_until_ready(name).await?
                }
            }
            None => {
                info!("Creating Pinecone index '{}' ({} dims, cosine)", name, dimension);
                match self.create_index(name, dimension).await? {
                    Some(created) if created.status.ready && !created.host.is_empty() => created,
                    _ => self.wait_until_ready(name).await?,
                }
            }
        };

        // Also covers an index created concurrently (409 on create).
        if description.dimension != dimension {
            return Err(dimension_conflict(name, description.dimension, dimension));
        }

        if description.host.is_empty() {
            return Err(IngestError::IndexProvisioning(format!(
                "index '{}' has no data plane host",
                name
            )));
        }
        let host = normalize_host(&description.host);
        info!("Pinecone index '{}' ready at {}", name, host);
        self.index.store(Some(Arc::new(IndexHandle {
            name: name.to_string(),
            dimension,
            host,
        })));
        Ok(())
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &IndexMetadata) -> IngestResult<()> {
        let index = self.handle()?;
        check_dimension(index.dimension, vector)?;

        let request = UpsertRequest {
            vectors: vec![WireVector {
                id,
                values: vector,
                metadata: to_wire_metadata(metadata),
            }],
            namespace: &self.config.namespace,
        };
        let response = self
            .http_client
            .post(format!("{}/vectors/upsert", index.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.data_error("upsert", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::StoreWrite(format!(
                "Pinecone upsert into '{}' returned {}: {}",
                index.name, status, body
            )));
        }
        debug!("Upserted '{}' into Pinecone index '{}'", id, index.name);
        Ok(())
    }

    async fn fetch(&self, id: &str) -> IngestResult<Option<IndexRecord>> {
        let index = self.handle()?;
        let mut request = self
            .http_client
            .get(format!("{}/vectors/fetch", index.host))
            .query(&[("ids", id)]);
        if !self.config.namespace.is_empty() {
            request = request.query(&[("namespace", self.config.namespace.as_str())]);
        }
        let response = request.send().await.map_err(|e| self.data_error("fetch", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::StoreWrite(format!(
                "Pinecone fetch returned {}: {}",
                status, body
            )));
        }
        let mut parsed: FetchResponse = response
            .json()
            .await
            .map_err(|e| IngestError::StoreWrite(format!("invalid fetch response: {}", e)))?;

        Ok(parsed.vectors.remove(id).map(|v| IndexRecord {
            id: v.id,
            values: v.values,
            metadata: v.metadata.as_ref().map(from_wire_metadata).unwrap_or_default(),
        }))
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> IngestResult<Vec<VectorMatch>> {
        let index = self.handle()?;
        check_dimension(index.dimension, vector)?;

        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            namespace: &self.config.namespace,
        };
        let response = self
            .http_client
            .post(format!("{}/query", index.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.data_error("query", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::StoreWrite(format!(
                "Pinecone query returned {}: {}",
                status, body
            )));
        }
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| IngestError::StoreWrite(format!("invalid query response: {}", e)))?;

        Ok(parsed
            .matches
            .into_iter()
            .map(|m| VectorMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.as_ref().map(from_wire_metadata),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn store_for(server: &mockito::Server) -> PineconeStore {
        PineconeStore::new(PineconeConfig {
            api_key: "test-key".to_string(),
            controller_url: server.url(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            namespace: String::new(),
            timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    fn described(server: &mockito::Server, dimension: usize) -> String {
        json!({
            "name": "emails",
            "dimension": dimension,
            "metric": "cosine",
            "host": server.url(),
            "status": {"ready": true, "state": "Ready"}
        })
        .to_string()
    }

    fn invoice_metadata() -> IndexMetadata {
        let mut details = InvoiceDetails::new();
        details.insert(InvoiceField::Amount, "$250.00");
        IndexMetadata {
            subject: "Invoice #42".to_string(),
            sender: "billing@acme.test".to_string(),
            invoice_details: details,
        }
    }

    async fn ready_store(server: &mut mockito::Server, dimension: usize) -> PineconeStore {
        let body = described(server, dimension);
        server
            .mock("GET", "/indexes/emails")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        let store = store_for(server);
        store.ensure_index("emails", dimension).await.unwrap();
        store
    }

    #[test]
    fn test_wire_metadata_round_trip() {
        let metadata = invoice_metadata();
        let wire = to_wire_metadata(&metadata);
        assert_eq!(
            Value::Object(wire.clone()),
            json!({
                "subject": "Invoice #42",
                "sender": "billing@acme.test",
                "invoice_amount": "$250.00"
            })
        );
        assert_eq!(from_wire_metadata(&wire), metadata);
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("idx-abc.svc.pinecone.io"), "https://idx-abc.svc.pinecone.io");
        assert_eq!(normalize_host("http://127.0.0.1:1234/"), "http://127.0.0.1:1234");
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = PineconeStore::new(PineconeConfig {
            api_key: " ".to_string(),
            controller_url: DEFAULT_CONTROLLER_URL.to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            namespace: String::new(),
            timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(1),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ensure_index_creates_missing_index() {
        let mut server = mockito::Server::new_async().await;
        let describe = server
            .mock("GET", "/indexes/emails")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/indexes")
            .match_header("api-key", "test-key")
            .match_body(Matcher::Json(json!({
                "name": "emails",
                "dimension": 384,
                "metric": "cosine",
                "spec": {"serverless": {"cloud": "aws", "region": "us-east-1"}}
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(described(&server, 384))
            .create_async()
            .await;

        let store = store_for(&server);
        store.ensure_index("emails", 384).await.unwrap();
        describe.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_index_existing_is_noop() {
        let mut server = mockito::Server::new_async().await;
        let create = server.mock("POST", "/indexes").expect(0).create_async().await;
        let _store = ready_store(&mut server, 384).await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_index_dimension_conflict() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/indexes/emails")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(described(&server, 768))
            .create_async()
            .await;
        let err = store_for(&server).ensure_index("emails", 384).await.unwrap_err();
        assert!(matches!(err, IngestError::IndexProvisioning(_)));
    }

    #[tokio::test]
    async fn test_ensure_index_concurrent_create_checks_dimension() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/indexes/emails")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/indexes")
            .with_status(409)
            .with_body(r#"{"error":{"code":"ALREADY_EXISTS"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/indexes/emails")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(described(&server, 768))
            .create_async()
            .await;

        let err = store_for(&server).ensure_index("emails", 384).await.unwrap_err();
        assert!(matches!(err, IngestError::IndexProvisioning(ref msg) if msg.contains("768")));
        missing.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_index_concurrent_create_same_dimension() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/indexes/emails")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/indexes")
            .with_status(409)
            .create_async()
            .await;
        server
            .mock("GET", "/indexes/emails")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(described(&server, 384))
            .create_async()
            .await;

        store_for(&server).ensure_index("emails", 384).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_index_bad_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/indexes/emails")
            .with_status(401)
            .with_body(r#"{"error":{"code":"UNAUTHENTICATED"}}"#)
            .create_async()
            .await;
        let err = store_for(&server).ensure_index("emails", 384).await.unwrap_err();
        assert!(matches!(err, IngestError::IndexProvisioning(_)));
    }

    #[tokio::test]
    async fn test_upsert_sends_flattened_metadata() {
        let mut server = mockito::Server::new_async().await;
        let store = ready_store(&mut server, 2).await;
        let upsert = server
            .mock("POST", "/vectors/upsert")
            .match_header("api-key", "test-key")
            .match_header("x-pinecone-api-version", API_VERSION)
            .match_body(Matcher::Json(json!({
                "vectors": [{
                    "id": "inv-42@acme.test",
                    "values": [0.5, 0.25],
                    "metadata": {
                        "subject": "Invoice #42",
                        "sender": "billing@acme.test",
                        "invoice_amount": "$250.00"
                    }
                }]
            })))
            .with_status(200)
            .with_body(r#"{"upsertedCount":1}"#)
            .create_async()
            .await;

        store
            .upsert("inv-42@acme.test", &[0.5, 0.25], &invoice_metadata())
            .await
            .unwrap();
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_dimension_mismatch_skips_network() {
        let mut server = mockito::Server::new_async().await;
        let store = ready_store(&mut server, 384).await;
        let upsert = server
            .mock("POST", "/vectors/upsert")
            .expect(0)
            .create_async()
            .await;

        let err = store.upsert("x", &[0.1, 0.2], &invoice_metadata()).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::DimensionMismatch { expected: 384, actual: 2 }
        ));
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_service_error_is_store_write() {
        let mut server = mockito::Server::new_async().await;
        let store = ready_store(&mut server, 2).await;
        server
            .mock("POST", "/vectors/upsert")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;
        let err = store.upsert("x", &[0.1, 0.2], &invoice_metadata()).await.unwrap_err();
        assert!(matches!(err, IngestError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_upsert_before_ensure_index() {
        let server = mockito::Server::new_async().await;
        let err = store_for(&server)
            .upsert("x", &[0.1], &invoice_metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_fetch_rebuilds_metadata() {
        let mut server = mockito::Server::new_async().await;
        let store = ready_store(&mut server, 2).await;
        server
            .mock("GET", "/vectors/fetch")
            .match_query(Matcher::UrlEncoded("ids".into(), "msg-1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "vectors": {
                        "msg-1": {
                            "id": "msg-1",
                            "values": [0.5, 0.25],
                            "metadata": {
                                "subject": "Invoice #42",
                                "sender": "billing@acme.test",
                                "invoice_amount": "$250.00"
                            }
                        }
                    },
                    "namespace": ""
                })
                .to_string(),
            )
            .create_async()
            .await;

        let record = store.fetch("msg-1").await.unwrap().unwrap();
        assert_eq!(record.id, "msg-1");
        assert_eq!(record.values, vec![0.5, 0.25]);
        assert_eq!(record.metadata, invoice_metadata());
    }

    #[tokio::test]
    async fn test_query_parses_matches() {
        let mut server = mockito::Server::new_async().await;
        let store = ready_store(&mut server, 2).await;
        server
            .mock("POST", "/query")
            .match_body(Matcher::PartialJson(json!({"topK": 3, "includeMetadata": true})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "matches": [
                        {"id": "a", "score": 0.9, "metadata": {"subject": "A", "sender": "x@y.test"}},
                        {"id": "b", "score": 0.4}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let hits = store.query(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].metadata.as_ref().unwrap().subject, "A");
        assert!(hits[1].metadata.is_none());
    }
}
