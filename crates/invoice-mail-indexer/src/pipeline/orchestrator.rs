//! Ingestion orchestrator: extract -> vectorize -> assemble metadata -> upsert.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::decoder::DecodedEmail;
use super::extractor::InvoiceFieldExtractor;
use super::vectorizer::ContentVectorizer;
use crate::error::IngestResult;
use crate::metrics;
use crate::vector_store::{IndexMetadata, VectorStore};

/// One incoming email, ready for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub identifier: String,
    pub subject: String,
    pub sender: String,
    pub body: String,
}

impl EmailRecord {
    /// Applies the identity policy to a decoded message.
    ///
    /// Identifier: the Message-ID header, else the BLAKE3 hash of the raw
    /// bytes. Sender: the first From address, else `default_sender`.
    pub fn from_decoded(decoded: DecodedEmail, raw: &[u8], default_sender: &str) -> Self {
        let identifier = decoded
            .message_id
            .unwrap_or_else(|| blake3::hash(raw).to_hex().to_string());
        Self {
            identifier,
            subject: decoded.subject.unwrap_or_default(),
            sender: decoded.sender.unwrap_or_else(|| default_sender.to_string()),
            body: decoded.body,
        }
    }
}

/// Runs the enrichment steps for one email and writes a single record.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    extractor: InvoiceFieldExtractor,
    vectorizer: ContentVectorizer,
    store: Arc<dyn VectorStore>,
}

impl IngestionOrchestrator {
    pub fn new(
        extractor: InvoiceFieldExtractor,
        vectorizer: ContentVectorizer,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            extractor,
            vectorizer,
            store,
        }
    }

    pub fn vectorizer(&self) -> &ContentVectorizer {
        &self.vectorizer
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Steps run sequentially; the first error is returned unchanged and
    /// nothing is written unless extraction and vectorization both succeed.
    pub async fn process(&self, record: &EmailRecord) -> IngestResult<()> {
        let started = Instant::now();
        debug!("Processing email '{}'", record.identifier);

        let invoice_details = self.extractor.extract(&record.body).map_err(|e| {
            warn!("Extraction failed for '{}': {}", record.identifier, e);
            e
        })?;

        let vector = self.vectorizer.vectorize(&record.body).await.map_err(|e| {
            warn!("Vectorization failed for '{}': {}", record.identifier, e);
            e
        })?;

        let metadata = IndexMetadata {
            subject: record.subject.clone(),
            sender: record.sender.clone(),
            invoice_details,
        };

        self.store
            .upsert(&record.identifier, &vector, &metadata)
            .await
            .map_err(|e| {
                warn!("Upsert failed for '{}': {}", record.identifier, e);
                e
            })?;

        metrics::observe_ingest(started.elapsed().as_secs_f64());
        info!(
            "Indexed email '{}' from {} ({} invoice field(s), {} dims)",
            record.identifier,
            record.sender,
            metadata.invoice_details.len(),
            vector.len()
        );
        Ok(())
    }
}
