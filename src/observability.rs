use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total engine operations. Label: op.
pub const OPS_TOTAL: &str = "bookd_ops_total";

/// Counter: acceptances refused because the slot was full. Expected under
/// concurrency, tracked separately from errors.
pub const SLOT_FULL_TOTAL: &str = "bookd_slot_full_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of providers with a loaded book.
pub const PROVIDERS_ACTIVE: &str = "bookd_providers_active";

/// Counter: notification intents dispatched to the hub.
pub const NOTIFICATIONS_TOTAL: &str = "bookd_notifications_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
