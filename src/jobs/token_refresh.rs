//! Background job: keep the publishing token alive.
//!
//! Checks once right away, then every `every` (daily by default).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::metrics::SyncMetrics;
use crate::social::TokenLifecycle;

pub fn spawn(
    lifecycle: Arc<TokenLifecycle>,
    metrics: Option<Arc<SyncMetrics>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let outcome = lifecycle.ensure_fresh().await;
            tracing::debug!(outcome = outcome.label(), "token check done");
            if let Some(metrics) = &metrics {
                metrics.record_token_check(outcome.label());
            }
        }
    })
}
