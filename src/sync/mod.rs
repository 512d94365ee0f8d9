//! The sync run: fetch inventory, diff against the ledger, publish what is new.
//!
//! One run walks `Idle → FetchingInventory → Diffing → Publishing(i) → Idle`.
//! Listings are handled strictly one after another with a pacing delay in
//! between. A failure on one listing is logged and the loop moves on; the
//! listing stays out of the ledger and is picked up again by the next run.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::listings::{InventorySource, ListingDetailSource};
use crate::metrics::SyncMetrics;
use crate::retry::{retry, RetryPolicy};
use crate::social::publisher::MAX_CAROUSEL_ITEMS;
use crate::social::{CaptionComposer, CarouselPublisher, RefreshOutcome, TokenLifecycle};
use crate::store::PublishedLedger;

pub mod runner;

pub use runner::SyncRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    FetchingInventory,
    Diffing,
    /// `index` is 0-based into the new listings of this run.
    Publishing { index: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Timer,
    Http,
    Cli,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Timer => "timer",
            Trigger::Http => "http",
            Trigger::Cli => "cli",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// Every listing in the inventory is already in the ledger.
    NothingNew,
    /// The ledger could not be read; nothing was published.
    LedgerUnavailable,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::NothingNew => "nothing_new",
            RunOutcome::LedgerUnavailable => "ledger_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedListing {
    pub listing_id: String,
    pub reason: String,
}

/// What one run did. Kept in memory for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub inventory_size: usize,
    pub upstream_total: u64,
    pub failed_pages: Vec<u32>,
    pub new_listings: usize,
    pub published: Vec<String>,
    /// Recorded without posting: detail gone upstream or no usable image.
    pub skipped: Vec<String>,
    pub failed: Vec<FailedListing>,
    /// Ledger writes that still failed after retrying.
    pub unrecorded_writes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_check: Option<RefreshOutcome>,
}

impl RunReport {
    fn start(run_id: Uuid, trigger: Trigger) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            trigger,
            outcome: RunOutcome::Completed,
            started_at: now,
            finished_at: now,
            inventory_size: 0,
            upstream_total: 0,
            failed_pages: Vec::new(),
            new_listings: 0,
            published: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            unrecorded_writes: 0,
            token_check: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_pages: u32,
    /// Wait between two listings. Not applied after the last one.
    pub pacing: Duration,
    pub ledger_retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_pages: 5,
            pacing: Duration::from_secs(2),
            ledger_retry: RetryPolicy::default(),
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            pacing: config.pacing,
            ..Self::default()
        }
    }
}

enum ListingOutcome {
    Published,
    Skipped(&'static str),
    Failed(String),
}

pub struct SyncOrchestrator {
    inventory: Arc<dyn InventorySource>,
    details: Arc<dyn ListingDetailSource>,
    ledger: Arc<dyn PublishedLedger>,
    publisher: Arc<dyn CarouselPublisher>,
    composer: CaptionComposer,
    token: Option<Arc<TokenLifecycle>>,
    metrics: Option<Arc<SyncMetrics>>,
    settings: SyncSettings,
    phase: watch::Sender<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        details: Arc<dyn ListingDetailSource>,
        ledger: Arc<dyn PublishedLedger>,
        publisher: Arc<dyn CarouselPublisher>,
        composer: CaptionComposer,
        settings: SyncSettings,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            inventory,
            details,
            ledger,
            publisher,
            composer,
            token: None,
            metrics: None,
            settings,
            phase,
        }
    }

    /// Make sure the access token is fresh before the first publish of a run.
    pub fn with_token_lifecycle(mut self, token: Arc<TokenLifecycle>) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.send_replace(phase);
    }

    /// Execute one full run. Never fails: every problem ends up in the report
    /// and the log. Callers are responsible for not running two at once.
    #[instrument(skip_all, fields(run_id = %run_id, trigger = %trigger))]
    pub async fn run(&self, run_id: Uuid, trigger: Trigger) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::start(run_id, trigger);

        self.execute(&mut report).await;

        self.set_phase(SyncPhase::Idle);
        report.finished_at = Utc::now();

        info!(
            outcome = report.outcome.as_str(),
            inventory = report.inventory_size,
            new = report.new_listings,
            published = report.published.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            unrecorded = report.unrecorded_writes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync run finished"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_run(trigger.as_str(), report.outcome.as_str(), started.elapsed());
            metrics.record_listings(
                report.published.len(),
                report.skipped.len(),
                report.failed.len(),
            );
            metrics.record_failed_pages(report.failed_pages.len());
        }

        report
    }

    async fn execute(&self, report: &mut RunReport) {
        self.set_phase(SyncPhase::FetchingInventory);
        let inventory = self.inventory.fetch_all(self.settings.max_pages).await;
        report.inventory_size = inventory.listings.len();
        report.upstream_total = inventory.total_count;
        report.failed_pages = inventory.failed_pages;

        self.set_phase(SyncPhase::Diffing);
        let published = match self.ledger.all_published_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "cannot read ledger, ending run without publishing");
                report.outcome = RunOutcome::LedgerUnavailable;
                return;
            }
        };

        let new_ids: Vec<String> = inventory
            .listings
            .into_iter()
            .map(|l| l.id)
            .filter(|id| !published.contains(id))
            .collect();
        report.new_listings = new_ids.len();

        if new_ids.is_empty() {
            info!(known = published.len(), "no new listings");
            report.outcome = RunOutcome::NothingNew;
            return;
        }
        info!(count = new_ids.len(), "new listings to announce");

        if let Some(token) = &self.token {
            let outcome = token.ensure_fresh().await;
            if let Some(metrics) = &self.metrics {
                metrics.record_token_check(outcome.label());
            }
            report.token_check = Some(outcome);
        }

        let total = new_ids.len();
        for (index, listing_id) in new_ids.iter().enumerate() {
            self.set_phase(SyncPhase::Publishing { index, total });

            match self.process(listing_id, report).await {
                ListingOutcome::Published => report.published.push(listing_id.clone()),
                ListingOutcome::Skipped(reason) => {
                    info!(listing_id = %listing_id, reason, "recorded without publishing");
                    report.skipped.push(listing_id.clone());
                }
                ListingOutcome::Failed(reason) => {
                    warn!(listing_id = %listing_id, reason = %reason, "listing failed, will retry next run");
                    report.failed.push(FailedListing {
                        listing_id: listing_id.clone(),
                        reason,
                    });
                }
            }

            if index + 1 < total && !self.settings.pacing.is_zero() {
                tokio::time::sleep(self.settings.pacing).await;
            }
        }
    }

    async fn process(&self, listing_id: &str, report: &mut RunReport) -> ListingOutcome {
        let listing = match self.details.fetch_detail(listing_id).await {
            Ok(Some(listing)) => listing,
            Ok(None) => {
                self.record(listing_id, report).await;
                return ListingOutcome::Skipped("detail not found upstream");
            }
            Err(e) => return ListingOutcome::Failed(format!("detail fetch: {}", e)),
        };

        let images = listing.image_urls(MAX_CAROUSEL_ITEMS);
        if images.is_empty() {
            self.record(listing_id, report).await;
            return ListingOutcome::Skipped("no usable images");
        }

        let caption = self.composer.compose(&listing);
        match self.publisher.publish(&images, &caption).await {
            Ok(result) => {
                info!(
                    listing_id,
                    media_id = %result.media_id,
                    images = images.len(),
                    "listing published"
                );
                self.record(listing_id, report).await;
                ListingOutcome::Published
            }
            Err(e) => ListingOutcome::Failed(e.to_string()),
        }
    }

    /// Write `listing_id` to the ledger, retrying transient failures.
    async fn record(&self, listing_id: &str, report: &mut RunReport) {
        let result = retry(
            &self.settings.ledger_retry,
            "ledger_write",
            |_| true,
            |_| self.ledger.record_published(listing_id),
        )
        .await;

        match result {
            Ok(()) => debug!(listing_id, "recorded in ledger"),
            Err(e) => {
                error!(listing_id, error = %e, "ledger write failed, listing may be announced again");
                report.unrecorded_writes += 1;
            }
        }
    }
}
