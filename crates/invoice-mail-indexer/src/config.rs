// invoice-mail-indexer/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::vector_store::pinecone::{PineconeConfig, DEFAULT_CONTROLLER_URL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreKind {
    Pinecone,
    Memory,
}

impl FromStr for VectorStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("unknown vector store '{}' (expected pinecone or memory)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Local,
    Http,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "http" => Ok(Self::Http),
            other => Err(anyhow::anyhow!("unknown embedding backend '{}' (expected local or http)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub vector_store: VectorStoreKind,
    pub pinecone_api_key: String,
    pub pinecone_controller_url: String,
    pub pinecone_cloud: String,
    pub pinecone_environment: String,
    pub pinecone_namespace: String,
    pub index_name: String,
    pub embedding_dimension: usize,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_url: String,
    pub default_sender: String,
    pub external_call_timeout_seconds: u64,
    pub index_ready_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub max_email_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let vector_store: VectorStoreKind = parse_or(&lookup, "VECTOR_STORE", "pinecone")?;
        let pinecone_api_key = get("PINECONE_API_KEY", "");
        if vector_store == VectorStoreKind::Pinecone && pinecone_api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "PINECONE_API_KEY environment variable not set. Please set it in your .env file or use VECTOR_STORE=memory"
            ));
        }

        let embedding_dimension: usize = parse_or(&lookup, "EMBEDDING_DIMENSION", "384")?;
        anyhow::ensure!(embedding_dimension > 0, "EMBEDDING_DIMENSION must be positive");

        let max_email_bytes: usize = parse_or(&lookup, "MAX_EMAIL_BYTES", "10485760")?;
        anyhow::ensure!(max_email_bytes > 0, "MAX_EMAIL_BYTES must be positive");

        let default_sender = get("DEFAULT_SENDER", "unknown@localhost");
        anyhow::ensure!(!default_sender.trim().is_empty(), "DEFAULT_SENDER cannot be empty");

        Ok(Self {
            api_host: get("API_HOST", "127.0.0.1"),
            api_port: parse_or(&lookup, "API_PORT", "5000")?,
            vector_store,
            pinecone_api_key,
            pinecone_controller_url: get("PINECONE_CONTROLLER_URL", DEFAULT_CONTROLLER_URL),
            pinecone_cloud: get("PINECONE_CLOUD", "aws"),
            pinecone_environment: get("PINECONE_ENVIRONMENT", "us-east-1"),
            pinecone_namespace: get("PINECONE_NAMESPACE", ""),
            index_name: get("INDEX_NAME", "email-extraction"),
            embedding_dimension,
            embedding_backend: parse_or(&lookup, "EMBEDDING_BACKEND", "local")?,
            embedding_model: get("EMBEDDING_MODEL", "all-MiniLM-L6-v2"),
            embedding_url: get("EMBEDDING_URL", "http://127.0.0.1:8081"),
            default_sender,
            external_call_timeout_seconds: parse_or(&lookup, "EXTERNAL_CALL_TIMEOUT_SECONDS", "30")?,
            index_ready_timeout_seconds: parse_or(&lookup, "INDEX_READY_TIMEOUT_SECONDS", "120")?,
            request_timeout_seconds: parse_or(&lookup, "REQUEST_TIMEOUT_SECONDS", "120")?,
            max_email_bytes,
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Vector Store: {:?}", self.vector_store);
        if self.vector_store == VectorStoreKind::Pinecone {
            info!("- Pinecone API Key: {}", mask_secret(&self.pinecone_api_key));
            info!("- Pinecone Controller: {}", self.pinecone_controller_url);
            info!("- Pinecone Cloud/Region: {}/{}", self.pinecone_cloud, self.pinecone_environment);
            info!("- Pinecone Namespace: {:?}", self.pinecone_namespace);
        }
        info!("- Index: {} ({} dims)", self.index_name, self.embedding_dimension);
        info!("- Embedding: {:?} / {}", self.embedding_backend, self.embedding_model);
        if self.embedding_backend == EmbeddingBackend::Http {
            info!("- Embedding URL: {}", self.embedding_url);
        }
        info!("- Default Sender: {}", self.default_sender);
        info!("- External Call Timeout: {}s", self.external_call_timeout_seconds);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- Max Email Size: {} bytes", self.max_email_bytes);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn pinecone_config(&self) -> PineconeConfig {
        PineconeConfig {
            api_key: self.pinecone_api_key.clone(),
            controller_url: self.pinecone_controller_url.clone(),
            cloud: self.pinecone_cloud.clone(),
            region: self.pinecone_environment.clone(),
            namespace: self.pinecone_namespace.clone(),
            timeout: self.external_call_timeout(),
            ready_timeout: Duration::from_secs(self.index_ready_timeout_seconds),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, raw, e))
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}
