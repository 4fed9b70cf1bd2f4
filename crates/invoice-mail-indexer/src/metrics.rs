// invoice-mail-indexer/src/metrics.rs

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref INIT_LOCK: Mutex<()> = Mutex::new(());
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static EMAILS_INGESTED: OnceLock<IntCounter> = OnceLock::new();
static INGEST_DURATION: OnceLock<Histogram> = OnceLock::new();

pub fn init_metrics() -> prometheus::Result<()> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REQ_COUNTER.get().is_some() {
        return Ok(());
    }

    let req_counter = IntCounterVec::new(
        prometheus::opts!("requests_total", "Total requests per route"),
        &["route", "status"],
    )?;
    let emails_ingested = IntCounter::new("emails_ingested_total", "Emails written to the vector index")?;
    let ingest_duration = Histogram::with_opts(
        HistogramOpts::new(
            "ingest_duration_seconds",
            "Time from extraction start to completed upsert",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )?;

    REGISTRY.register(Box::new(req_counter.clone()))?;
    REGISTRY.register(Box::new(emails_ingested.clone()))?;
    REGISTRY.register(Box::new(ingest_duration.clone()))?;

    let _ = REQ_COUNTER.set(req_counter);
    let _ = EMAILS_INGESTED.set(emails_ingested);
    let _ = INGEST_DURATION.set(ingest_duration);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

/// Records one successful ingestion and how long it took.
pub fn observe_ingest(duration_seconds: f64) {
    if let Some(counter) = EMAILS_INGESTED.get() {
        counter.inc();
    }
    if let Some(histogram) = INGEST_DURATION.get() {
        histogram.observe(duration_seconds);
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("failed to encode metrics: {}", e).into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        inc_request("webhook", "ok");
        observe_ingest(0.2);
        assert!(EMAILS_INGESTED.get().unwrap().get() >= 1);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        init_metrics().unwrap();
        inc_request("webhook", "ok");
        let response = get_metrics().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("requests_total"));
    }
}
