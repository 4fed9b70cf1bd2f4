//! Ingestion pipeline - decode, extract, vectorize, persist

pub mod decoder;
pub mod extractor;
pub mod orchestrator;
pub mod vectorizer;

pub use decoder::{DecodedEmail, EmailDecoder};
pub use extractor::{
    Entity, EntityLabel, EntityRecognizer, InvoiceDetails, InvoiceField, InvoiceFieldExtractor,
    PatternRecognizer,
};
pub use orchestrator::{EmailRecord, IngestionOrchestrator};
pub use vectorizer::{ContentVectorizer, Embedder, HttpEmbedder};
#[cfg(feature = "local-embeddings")]
pub use vectorizer::FastEmbedder;
