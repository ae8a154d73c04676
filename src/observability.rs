use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total operations handled. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "appointd_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "appointd_operation_duration_seconds";

/// Counter: bookings refused because the interval was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "appointd_booking_conflicts_total";

/// Histogram: slots returned per availability lookup.
pub const SLOTS_GENERATED: &str = "appointd_slots_generated";

/// Counter: requests refused by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "appointd_rate_limited_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "appointd_tenants_active";

/// Counter: rejected credentials.
pub const AUTH_FAILURES_TOTAL: &str = "appointd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "appointd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "appointd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record one finished operation.
pub fn record_operation(operation: &'static str, status: &'static str, started: std::time::Instant) {
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
