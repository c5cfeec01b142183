//! Prometheus metrics for the admission pipeline.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| format!("cannot install metrics exporter: {e}"))
}

/// One admitted connection.
pub fn record_accepted() {
    metrics::counter!("streamgate_connections_accepted_total").increment(1);
}

/// One rejected connection, tagged with the internal status.
pub fn record_rejected(status: &'static str) {
    metrics::counter!("streamgate_connections_rejected_total", "status" => status).increment(1);
}

/// One stale receiver evicted in favor of a newer connection.
pub fn record_eviction() {
    metrics::counter!("streamgate_receivers_evicted_total").increment(1);
}
