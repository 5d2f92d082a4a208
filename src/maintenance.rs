use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::info;

use crate::engine::Engine;

/// One reminder pass: notify every confirmed booking starting within `lead`.
/// Returns how many reminders went out.
pub async fn sweep_reminders(engine: &Engine, lead: TimeDelta) -> usize {
    let due = engine.due_reminders(engine.now(), lead).await;
    let mut sent = 0;
    for id in due {
        match engine.send_reminder(id).await {
            Ok(true) => sent += 1,
            Ok(false) => {}
            // Cancelled or deleted since the scan; nothing to do.
            Err(e) => tracing::debug!("reminder skip {id}: {e}"),
        }
    }
    if sent > 0 {
        info!("sent {sent} booking reminders");
    }
    sent
}

/// Background task that sends reminders every `period`.
pub async fn run_reminders(engine: Arc<Engine>, period: Duration, lead: TimeDelta) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        sweep_reminders(&engine, lead).await;
    }
}

/// Compact the WAL once at least `threshold` events were appended since the last compaction.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appended = engine.wal_appends_since_compact().await;
    if appended < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("WAL compaction failed after {appended} appends: {e}");
            false
        }
    }
}

pub async fn run_compactor(engine: Arc<Engine>, period: Duration, threshold: u64) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}
