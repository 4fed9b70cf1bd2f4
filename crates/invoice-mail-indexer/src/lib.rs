// invoice-mail-indexer/src/lib.rs

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod shared_state;
pub mod telemetry;
pub mod vector_store;

// Public API exports
pub use config::Config;
pub use error::{IngestError, IngestResult};
pub use pipeline::{EmailDecoder, EmailRecord, IngestionOrchestrator, InvoiceDetails, InvoiceField};
pub use server::{build_router, run_server};
pub use vector_store::{IndexMetadata, VectorStore};
