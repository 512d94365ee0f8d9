//! Background job: periodic sync run.
//!
//! The first run happens one full interval after startup. A tick that finds a
//! run still in progress is skipped, not queued.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::sync::{SyncRunner, Trigger};

/// Spawn the sync timer. Call this once at startup.
pub fn spawn(runner: SyncRunner, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match runner.run_exclusive(Trigger::Timer).await {
                Some(report) => tracing::debug!(run_id = %report.run_id, "scheduled sync run done"),
                None => tracing::info!("previous sync run still in progress, skipping tick"),
            }
        }
    })
}
