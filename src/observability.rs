use std::net::SocketAddr;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: booking writes committed. Labels: op (create, update, delete).
pub const BOOKING_WRITES_TOTAL: &str = "shopfloor_booking_writes_total";

/// Counter: booking writes rejected because of an overlap.
pub const BOOKING_CONFLICTS_TOTAL: &str = "shopfloor_booking_conflicts_total";

// ── Status reconciliation ───────────────────────────────────────

/// Counter: machine status flips written.
pub const MACHINE_STATUS_CHANGES_TOTAL: &str = "shopfloor_machine_status_changes_total";

/// Counter: full reconcile passes run.
pub const RECONCILE_PASSES_TOTAL: &str = "shopfloor_reconcile_passes_total";

/// Counter: per-machine status writes that failed.
pub const RECONCILE_FAILURES_TOTAL: &str = "shopfloor_reconcile_failures_total";

/// Histogram: full reconcile pass duration in seconds.
pub const RECONCILE_DURATION_SECONDS: &str = "shopfloor_reconcile_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shopfloor_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shopfloor_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "shopfloor_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
