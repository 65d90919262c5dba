//! Background maintenance: hourly rollup building and presence pruning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use linkboard_core::service::PRESENCE_WINDOW_MINUTES;
use linkboard_duckdb::rollup;

use crate::state::AppState;

/// One scheduler iteration: roll up the previous clock hour (no-op when it
/// is already built) and prune presence rows that fell out of the window.
/// Returns (rollup rows written, presence rows pruned).
pub async fn process_once(state: &Arc<AppState>) -> anyhow::Result<(usize, usize)> {
    let now = Utc::now();
    let previous_hour = rollup::hour_floor(now) - chrono::Duration::hours(1);
    let built = rollup::build_hourly(&state.db, previous_hour).await?;
    let cutoff = now - chrono::Duration::minutes(PRESENCE_WINDOW_MINUTES);
    let pruned = rollup::prune_presence(&state.db, cutoff).await?;
    Ok((built, pruned))
}

/// Run the maintenance loop until the process exits. A failed iteration is
/// logged and retried on the next tick; queries keep working off raw events
/// while rollups lag.
pub async fn run_scheduler_loop(state: Arc<AppState>) {
    let tick = state.config.scheduler_tick_seconds;
    info!(tick_seconds = tick, "Metrics scheduler started");
    let mut interval = tokio::time::interval(Duration::from_secs(tick));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = process_once(&state).await {
            error!(error = %err, "scheduler iteration failed");
        }
    }
}
