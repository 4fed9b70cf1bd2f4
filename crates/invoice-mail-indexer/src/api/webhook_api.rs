// Webhook API: accept one raw RFC 5322 message per POST and index it
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::metrics;
use crate::pipeline::EmailRecord;
use crate::shared_state::AppState;

const ROUTE: &str = "/webhook";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    pub code: u16,
}

/// Error half of the webhook handler; renders as `{error, kind, code}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let status = err.status_code();
        Self {
            status,
            body: ErrorResponse {
                error: err.to_string(),
                kind: err.kind(),
                code: status.as_u16(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Decode the raw body, run extraction and vectorization, upsert the record.
pub async fn webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    info!("Webhook received email ({} bytes)", body.len());

    let result = async {
        let decoded = state.decoder.decode(&body)?;
        let record = EmailRecord::from_decoded(decoded, &body, &state.default_sender);
        state.orchestrator.process(&record).await
    }
    .await;

    match result {
        Ok(()) => {
            metrics::inc_request(ROUTE, StatusCode::OK.as_str());
            Ok((StatusCode::OK, "Email processed"))
        }
        Err(e) => {
            let err = ApiError::from(e);
            warn!("Webhook rejected email: {} ({})", err.body.error, err.status);
            metrics::inc_request(ROUTE, err.status.as_str());
            Err(err)
        }
    }
}
