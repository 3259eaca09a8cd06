use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomsync_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomsync_query_duration_seconds";

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "roomsync_bookings_total";

/// Counter: cancellation attempts. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "roomsync_cancellations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomsync_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomsync_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomsync_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomsync_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomsync_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomsync_wal_compactions_total";

// ── Live sync ───────────────────────────────────────────────────

/// Counter: domain events published on the bus.
pub const EVENTS_PUBLISHED_TOTAL: &str = "roomsync_events_published_total";

/// Counter: events the session fan-out missed because it lagged the bus.
pub const EVENTS_DROPPED_TOTAL: &str = "roomsync_events_dropped_total";

/// Gauge: registered live sessions.
pub const SESSIONS_ACTIVE: &str = "roomsync_sessions_active";

/// Counter: sessions torn down because their queue was full or closed.
pub const SESSIONS_DROPPED_TOTAL: &str = "roomsync_sessions_dropped_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}

/// Outcome label for booking and cancellation counters.
pub fn outcome_label(result: &Result<impl Sized, EngineError>) -> &'static str {
    match result {
        Ok(_) => "committed",
        Err(EngineError::Conflict { .. }) => "conflict",
        Err(EngineError::Forbidden(_)) => "forbidden",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::OutOfWindow { .. } | EngineError::InvalidDuration(_)) => "invalid",
        Err(EngineError::LimitExceeded(_)) => "limit",
        Err(EngineError::WalError(_)) => "wal_error",
    }
}
