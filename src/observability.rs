use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::model::Action;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings accepted. Labels: status.
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: bookings rejected by validation. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "roombook_bookings_rejected_total";

/// Counter: booking edits accepted.
pub const BOOKINGS_EDITED_TOTAL: &str = "roombook_bookings_edited_total";

/// Counter: lifecycle transitions. Labels: action, outcome.
pub const TRANSITIONS_TOTAL: &str = "roombook_transitions_total";

/// Counter: notifications the sink refused.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "roombook_notifications_failed_total";

/// Counter: reminders sent by the sweep.
pub const REMINDERS_SENT_TOTAL: &str = "roombook_reminders_sent_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: rooms currently registered.
pub const ROOMS_ACTIVE: &str = "roombook_rooms_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the fmt tracing subscriber and, if a port is given, the Prometheus
/// exporter. A subscriber installed earlier by the host is left in place.
pub fn init(metrics_port: Option<u16>) -> Result<(), BuildError> {
    let _ = tracing_subscriber::fmt().try_init();

    let Some(port) = metrics_port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for metrics.
pub fn action_label(action: Action) -> &'static str {
    match action {
        Action::Confirm => "confirm",
        Action::Refuse => "refuse",
        Action::Cancel => "cancel",
    }
}
