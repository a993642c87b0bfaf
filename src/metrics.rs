//! Prometheus metrics and the `/metrics` exposition endpoint.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::application::Disposition;

#[derive(Debug)]
struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    consumer_messages_total: IntCounterVec,
    consumer_dead_letters_total: IntCounterVec,
}

static METRICS: OnceLock<Option<Metrics>> = OnceLock::new();

/// Why a dead letter was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// Validation, missing product or insufficient stock.
    Rejected,
    /// Transient failures outlasted the delivery budget.
    Exhausted,
    Undecodable,
}

impl DeadLetterReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Exhausted => "exhausted",
            Self::Undecodable => "undecodable",
        }
    }
}

/// axum middleware counting every request by service, method and status.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().as_str().to_owned();
    let service = service_label(request.uri().path());
    let started = Instant::now();

    let response = next.run(request).await;
    observe_request(service, &method, response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

pub(crate) fn observe_request(service: &str, method: &str, status: u16, duration_seconds: f64) {
    let Some(metrics) = metrics() else {
        return;
    };
    let status = status.to_string();
    metrics.http_requests_total.with_label_values(&[service, method, status.as_str()]).inc();
    metrics.http_request_duration_seconds.with_label_values(&[service, method]).observe(duration_seconds);
}

pub(crate) fn observe_disposition(disposition: Disposition) {
    let label = match disposition {
        Disposition::Acked => "acked",
        Disposition::Retried => "retried",
        Disposition::Rejected => "rejected",
    };
    if let Some(metrics) = metrics() {
        metrics.consumer_messages_total.with_label_values(&[label]).inc();
    }
}

pub(crate) fn observe_dead_letter(reason: DeadLetterReason) {
    if let Some(metrics) = metrics() {
        metrics.consumer_dead_letters_total.with_label_values(&[reason.as_str()]).inc();
    }
}

pub async fn metrics_handler() -> Response {
    let Some(metrics) = metrics() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let encoder = TextEncoder::new();
    let mut encoded = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut encoded) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match HeaderValue::from_str(encoder.format_type()) {
        Ok(content_type) => ([(CONTENT_TYPE, content_type)], encoded).into_response(),
        Err(e) => {
            error!(error = %e, "Invalid metrics content type");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `/api/v1/<resource>/...` to the service that owns the resource.
fn service_label(path: &str) -> &'static str {
    match path.strip_prefix("/api/v1/").and_then(|rest| rest.split('/').next()) {
        Some("orders") => "orders",
        Some("products") => "inventory",
        Some("users") => "users",
        _ => "storefront",
    }
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get_or_init(build_metrics).as_ref()
}

fn build_metrics() -> Option<Metrics> {
    match try_build_metrics() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            error!(error = %e, "Failed to set up metrics");
            None
        }
    }
}

fn try_build_metrics() -> prometheus::Result<Metrics> {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["service", "method", "status"],
    )?;
    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["service", "method"],
    )?;
    let consumer_messages_total = IntCounterVec::new(
        Opts::new("stock_consumer_messages_total", "Order events settled by the stock consumer"),
        &["disposition"],
    )?;
    let consumer_dead_letters_total = IntCounterVec::new(
        Opts::new("stock_consumer_dead_letters_total", "Line items or messages sent to the dead-letter queue"),
        &["reason"],
    )?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration_seconds.clone()))?;
    registry.register(Box::new(consumer_messages_total.clone()))?;
    registry.register(Box::new(consumer_dead_letters_total.clone()))?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        consumer_messages_total,
        consumer_dead_letters_total,
    })
}
