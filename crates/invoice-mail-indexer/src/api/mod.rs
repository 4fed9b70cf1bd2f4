// invoice-mail-indexer/src/api/mod.rs
//! API module - HTTP surface of the ingestion service

pub mod webhook_api;

pub use webhook_api::{webhook, ApiError, ErrorResponse};
