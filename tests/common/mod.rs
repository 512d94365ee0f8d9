//! In-process fakes for the pipeline's external collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use showroom::errors::{PersistenceError, UpstreamError};
use showroom::listings::{Inventory, InventorySource, ListingDetailSource};
use showroom::models::{ImageVariants, Listing};
use showroom::retry::RetryPolicy;
use showroom::social::publisher::PublishStep;
use showroom::social::{CaptionComposer, CarouselPublisher, PublishError, PublishResult};
use showroom::store::{PublishedLedger, SqliteStore};
use showroom::sync::{SyncOrchestrator, SyncSettings};
use tokio::sync::Notify;

pub fn listing(id: &str, images: usize) -> Listing {
    Listing {
        id: id.to_string(),
        make: Some("Mercedes-Benz".into()),
        model: Some(format!("C {}", id)),
        images: (1..=images)
            .map(|i| {
                ImageVariants(
                    [(
                        "XXL".to_string(),
                        serde_json::Value::String(format!("https://img.example.com/{}/{}.jpg", id, i)),
                    )]
                    .into_iter()
                    .collect(),
                )
            })
            .collect(),
        ..Default::default()
    }
}

/// Upstream with a fixed inventory and detail records.
#[derive(Default)]
pub struct FakeUpstream {
    pub inventory: Mutex<Vec<Listing>>,
    pub details: Mutex<HashMap<String, Option<Listing>>>,
    pub broken_details: Mutex<HashSet<String>>,
    pub detail_calls: AtomicU32,
}

impl FakeUpstream {
    /// Every listing is in the inventory and has a matching detail record.
    pub fn with(listings: Vec<Listing>) -> Arc<Self> {
        let upstream = Self::default();
        for l in &listings {
            upstream
                .details
                .lock()
                .unwrap()
                .insert(l.id.clone(), Some(l.clone()));
        }
        *upstream.inventory.lock().unwrap() = listings;
        Arc::new(upstream)
    }

    pub fn remove_detail(&self, id: &str) {
        self.details.lock().unwrap().insert(id.to_string(), None);
    }

    pub fn break_detail(&self, id: &str) {
        self.broken_details.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl InventorySource for FakeUpstream {
    async fn fetch_all(&self, _max_pages: u32) -> Inventory {
        let listings = self.inventory.lock().unwrap().clone();
        Inventory {
            total_count: listings.len() as u64,
            listings,
            failed_pages: Vec::new(),
        }
    }
}

#[async_trait]
impl ListingDetailSource for FakeUpstream {
    async fn fetch_detail(&self, listing_id: &str) -> Result<Option<Listing>, UpstreamError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_details.lock().unwrap().contains(listing_id) {
            return Err(UpstreamError::Status {
                status: 503,
                body: "maintenance".into(),
            });
        }
        Ok(self.details.lock().unwrap().get(listing_id).cloned().flatten())
    }
}

/// Records every publish. Fails for listings whose image URLs contain one of
/// `fail_for`; blocks on `gate` when one is set.
#[derive(Default)]
pub struct FakePublisher {
    pub calls: Mutex<Vec<(Vec<String>, String)>>,
    pub fail_for: Mutex<HashSet<String>>,
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub entered: Notify,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, id: &str) {
        self.fail_for.lock().unwrap().insert(id.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(urls, _)| {
                urls.first()
                    .and_then(|u| u.split('/').nth(3))
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl CarouselPublisher for FakePublisher {
    async fn publish(&self, image_urls: &[String], caption: &str) -> Result<PublishResult, PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push((image_urls.to_vec(), caption.to_string()));
        self.entered.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failing = self
            .fail_for
            .lock()
            .unwrap()
            .iter()
            .any(|id| image_urls.iter().any(|u| u.contains(&format!("/{}/", id))));
        if failing {
            return Err(PublishError::Step {
                step: PublishStep::CreateContainer,
                message: "HTTP 400: Invalid parameter".into(),
            });
        }

        Ok(PublishResult {
            media_id: format!("media-{}", self.call_count()),
            container_id: "container".into(),
            child_ids: vec!["child".into(); image_urls.len()],
        })
    }
}

/// Wraps the SQLite ledger and fails the first `fail_writes` writes, or every
/// read when `fail_reads` is set.
pub struct FlakyLedger {
    pub inner: SqliteStore,
    pub fail_writes: AtomicU32,
    pub fail_reads: bool,
    pub write_attempts: AtomicU32,
}

impl FlakyLedger {
    pub fn new(inner: SqliteStore, fail_writes: u32, fail_reads: bool) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_writes: AtomicU32::new(fail_writes),
            fail_reads,
            write_attempts: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl PublishedLedger for FlakyLedger {
    async fn is_published(&self, listing_id: &str) -> Result<bool, PersistenceError> {
        self.inner.is_published(listing_id).await
    }

    async fn record_published(&self, listing_id: &str) -> Result<(), PersistenceError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.record_published(listing_id).await
    }

    async fn all_published_ids(&self) -> Result<HashSet<String>, PersistenceError> {
        if self.fail_reads {
            return Err(PersistenceError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.all_published_ids().await
    }

    async fn published_count(&self) -> Result<u64, PersistenceError> {
        self.inner.published_count().await
    }
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        max_pages: 5,
        pacing: Duration::ZERO,
        ledger_retry: RetryPolicy::immediate(3),
    }
}

pub fn orchestrator(
    upstream: Arc<FakeUpstream>,
    ledger: Arc<dyn PublishedLedger>,
    publisher: Arc<FakePublisher>,
) -> SyncOrchestrator {
    SyncOrchestrator::new(
        upstream.clone(),
        upstream,
        ledger,
        publisher,
        CaptionComposer::default(),
        settings(),
    )
}
