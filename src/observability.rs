use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total engine operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "labres_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "labres_operation_duration_seconds";

/// Counter: creates/updates rejected for overlap. Labels: operation.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "labres_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: reservations currently held across all devices.
pub const RESERVATIONS_ACTIVE: &str = "labres_reservations_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "labres_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "labres_wal_flush_batch_size";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Returns false if the host already installed one.
pub fn init_tracing() -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok()
}

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init_metrics(
    port: Option<u16>,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Get,
    List,
    CheckConflict,
    PurgeUser,
    PurgeTest,
    Compact,
}

impl Operation {
    /// Short label for metrics.
    pub fn label(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Get => "get",
            Operation::List => "list",
            Operation::CheckConflict => "check_conflict",
            Operation::PurgeUser => "purge_user",
            Operation::PurgeTest => "purge_test",
            Operation::Compact => "compact",
        }
    }
}

/// Map an operation outcome to the `status` label.
pub fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::InvalidDuration { .. }) => "invalid_duration",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::Validation(_)) => "validation",
        Err(EngineError::LimitExceeded(_)) => "limit_exceeded",
        Err(EngineError::Directory(_)) => "directory_error",
        Err(EngineError::WalError(_)) => "wal_error",
    }
}

/// Record count, latency and (for rejections) the conflict counter.
pub fn record_operation<T>(op: Operation, started: Instant, result: &Result<T, EngineError>) {
    let operation = op.label();
    let status = status_label(result);
    metrics::counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    if let Err(EngineError::Conflict(_)) = result {
        metrics::counter!(RESERVATION_CONFLICTS_TOTAL, "operation" => operation).increment(1);
    }
}
