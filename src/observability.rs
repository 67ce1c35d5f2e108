use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rosterd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rosterd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rosterd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rosterd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rosterd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "rosterd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rosterd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rosterd_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertEmployee { .. } => "insert_employee",
        Command::UpdateEmployee { .. } => "update_employee",
        Command::DeleteEmployee { .. } => "delete_employee",
        Command::InsertLocation { .. } => "insert_location",
        Command::UpdateLocation { .. } => "update_location",
        Command::DeleteLocation { .. } => "delete_location",
        Command::InsertCoverageRule { .. } => "insert_coverage_rule",
        Command::DeleteCoverageRule { .. } => "delete_coverage_rule",
        Command::InsertTask { .. } => "insert_task",
        Command::UpdateTask { .. } => "update_task",
        Command::DeleteTask { .. } => "delete_task",
        Command::InsertVacationRequest { .. } => "insert_vacation_request",
        Command::DecideVacationRequest { .. } => "decide_vacation_request",
        Command::DeleteVacationRequest { .. } => "delete_vacation_request",
        Command::SelectEmployees => "select_employees",
        Command::SelectLocations => "select_locations",
        Command::SelectCoverageRules { .. } => "select_coverage_rules",
        Command::SelectTasks { .. } => "select_tasks",
        Command::SelectVacationRequests { .. } => "select_vacation_requests",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectTimeConflict { .. } => "select_time_conflict",
        Command::SelectLocationConflict { .. } => "select_location_conflict",
        Command::SelectMissingCoverage { .. } => "select_missing_coverage",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
