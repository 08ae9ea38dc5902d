//! Metrics collection and exposition.
//!
//! # Metrics
//! - `imbi_service_init_total` (counter): initialize outcomes by service
//! - `imbi_service_init_duration_seconds` (histogram): initialize latency by service
//! - `imbi_service_close_total` (counter): close outcomes by service
//! - `imbi_http_requests_total` (counter): requests by method, status
//! - `imbi_http_request_duration_seconds` (histogram): request latency by method
//! - `imbi_rate_limited_total` (counter): rejected requests
//! - `imbi_emails_total` (counter): send attempts by audit status

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_service_init(service: &'static str, outcome: &'static str, started: Instant) {
    counter!("imbi_service_init_total", "service" => service, "outcome" => outcome).increment(1);
    histogram!("imbi_service_init_duration_seconds", "service" => service)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_service_close(service: &'static str, outcome: &'static str) {
    counter!("imbi_service_close_total", "service" => service, "outcome" => outcome).increment(1);
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    let method = method.to_string();
    counter!(
        "imbi_http_requests_total",
        "method" => method.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("imbi_http_request_duration_seconds", "method" => method)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("imbi_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_email(status: &'static str) {
    counter!("imbi_emails_total", "status" => status).increment(1);
}
