//! Shared application state handed to every request handler.
//!
//! Everything here is built once at startup and is read-only afterwards,
//! so handlers only clone `Arc`s.

use std::sync::Arc;

use crate::pipeline::{EmailDecoder, IngestionOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub decoder: EmailDecoder,
    pub orchestrator: Arc<IngestionOrchestrator>,
    /// Sender recorded when a message has no usable From address.
    pub default_sender: Arc<str>,
}

impl AppState {
    pub fn new(orchestrator: IngestionOrchestrator, default_sender: &str) -> Self {
        Self {
            decoder: EmailDecoder::new(),
            orchestrator: Arc::new(orchestrator),
            default_sender: Arc::from(default_sender),
        }
    }
}
