use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use roombook::config::Config;
use roombook::engine::Engine;
use roombook::maintenance;
use roombook::notify::NotifyHub;

const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Runs the booking engine's background duties (reminders, WAL compaction)
/// until SIGTERM or ctrl-c.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::from_config(&config, hub)?);

    info!("roombook started");
    info!("  wal: {}", config.wal_path().display());
    info!(
        "  durations: {}-{} min, changes close {} min before start",
        config.min_duration_minutes, config.max_duration_minutes, config.modification_lead_minutes
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reminders = tokio::spawn(maintenance::run_reminders(
        engine.clone(),
        config.reminder_period(),
        config.reminder_lead(),
    ));
    let compactor = tokio::spawn(maintenance::run_compactor(
        engine.clone(),
        COMPACT_CHECK_PERIOD,
        config.compact_threshold,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    reminders.abort();
    compactor.abort();

    engine.compact_wal().await?;
    info!("final compaction done, bye");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
