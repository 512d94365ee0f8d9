//! Prometheus metrics for sync runs and token checks.
//!
//! Each recorder owns its registry, so several instances (one per test) never
//! collide on metric names.

use std::time::Duration;

use prometheus::{
    histogram_opts, opts, proto::MetricFamily, CounterVec, HistogramVec, IntCounter, Registry,
    TextEncoder,
};

pub struct SyncMetrics {
    registry: Registry,
    runs_total: CounterVec,
    listings_total: CounterVec,
    token_checks_total: CounterVec,
    failed_pages_total: IntCounter,
    run_duration_seconds: HistogramVec,
}

impl SyncMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = CounterVec::new(
            opts!("showroom_sync_runs_total", "Completed sync runs"),
            &["trigger", "outcome"],
        )?;
        let listings_total = CounterVec::new(
            opts!(
                "showroom_listings_total",
                "Listings handled by sync runs, by outcome"
            ),
            &["outcome"],
        )?;
        let token_checks_total = CounterVec::new(
            opts!("showroom_token_checks_total", "Access token checks by outcome"),
            &["outcome"],
        )?;
        let failed_pages_total = IntCounter::with_opts(opts!(
            "showroom_search_pages_failed_total",
            "Search pages skipped after exhausting retries"
        ))?;
        let run_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "showroom_sync_run_duration_seconds",
                "Wall-clock duration of a sync run",
                // Pacing dominates: runs are seconds to tens of minutes.
                vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
            ),
            &["trigger"],
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(listings_total.clone()))?;
        registry.register(Box::new(token_checks_total.clone()))?;
        registry.register(Box::new(failed_pages_total.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            listings_total,
            token_checks_total,
            failed_pages_total,
            run_duration_seconds,
        })
    }

    pub fn record_run(&self, trigger: &str, outcome: &str, elapsed: Duration) {
        self.runs_total.with_label_values(&[trigger, outcome]).inc();
        self.run_duration_seconds
            .with_label_values(&[trigger])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_listings(&self, published: usize, skipped: usize, failed: usize) {
        for (outcome, n) in [("published", published), ("skipped", skipped), ("failed", failed)] {
            if n > 0 {
                self.listings_total
                    .with_label_values(&[outcome])
                    .inc_by(n as f64);
            }
        }
    }

    pub fn record_failed_pages(&self, pages: usize) {
        self.failed_pages_total.inc_by(pages as u64);
    }

    pub fn record_token_check(&self, outcome: &str) {
        self.token_checks_total.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of everything recorded so far. Empty if
    /// encoding fails; the error is logged.
    pub fn encode(&self) -> String {
        encode_families(&self.registry.gather()).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode metrics");
            String::new()
        })
    }
}

fn encode_families(families: &[MetricFamily]) -> Result<String, prometheus::Error> {
    TextEncoder::new().encode_to_string(families)
}
