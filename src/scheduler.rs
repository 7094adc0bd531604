//! Periodic maintenance: instead of running sweeps inline, the scheduler
//! enqueues jobs so they share the queue's retry and backoff behavior and
//! never run twice concurrently.

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::queue::kind;
use crate::AppState;

const HOURLY: Duration = Duration::from_secs(60 * 60);
const DAILY: Duration = Duration::from_secs(24 * 60 * 60);

const MAINTENANCE_ATTEMPTS: i64 = 3;

pub fn spawn(state: AppState, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut hourly = interval(HOURLY);
        let mut daily = interval(DAILY);
        hourly.set_missed_tick_behavior(MissedTickBehavior::Skip);
        daily.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Both intervals fire immediately on start, which doubles as the
        // catch-up sweep after a restart.
        loop {
            tokio::select! {
                _ = hourly.tick() => {
                    enqueue(&state, kind::PURGE_SHARES).await;
                    enqueue(&state, kind::REAP_UPLOADS).await;
                }
                _ = daily.tick() => {
                    enqueue(&state, kind::RECONCILE_QUOTA).await;
                    enqueue(&state, kind::PURGE_TRASH).await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!("scheduler stopped");
                    return;
                }
            }
        }
    })
}

async fn enqueue(state: &AppState, kind: &str) {
    match state
        .queue
        .enqueue_unique(kind, &serde_json::json!({}), MAINTENANCE_ATTEMPTS)
        .await
    {
        Ok(Some(id)) => tracing::debug!(kind, job_id = %id, "maintenance job scheduled"),
        Ok(None) => tracing::debug!(kind, "maintenance job already queued, skipped"),
        Err(e) => tracing::error!(kind, "failed to schedule maintenance job: {}", e),
    }
}
