//! Sync runs end to end over fakes and an in-memory ledger.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{listing, orchestrator, FakePublisher, FakeUpstream, FlakyLedger};
use showroom::errors::AppError;
use showroom::models::Credential;
use showroom::social::token::{ExchangeError, ExchangedToken};
use showroom::social::{RefreshOutcome, TokenExchanger, TokenLifecycle};
use showroom::store::{CredentialStore, PublishedLedger, SqliteStore};
use showroom::sync::{RunOutcome, SyncPhase, SyncRunner, Trigger};
use tokio::sync::Notify;
use uuid::Uuid;

async fn ledger_with(ids: &[&str]) -> SqliteStore {
    let store = SqliteStore::in_memory().await.unwrap();
    for id in ids {
        store.record_published(id).await.unwrap();
    }
    store
}

async fn ledger_ids(store: &SqliteStore) -> Vec<String> {
    store
        .list_published()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.listing_id)
        .collect()
}

#[tokio::test]
async fn test_only_new_listing_is_published() {
    let upstream = FakeUpstream::with(vec![listing("A", 2), listing("B", 2), listing("C", 3)]);
    let store = ledger_with(&["A", "B"]).await;
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream.clone(), Arc::new(store.clone()), publisher.clone());

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(publisher.call_count(), 1);
    assert_eq!(publisher.published_ids(), vec!["C"]);
    let (urls, caption) = publisher.calls.lock().unwrap()[0].clone();
    assert_eq!(urls.len(), 3);
    assert!(caption.starts_with("🚗 Mercedes-Benz C C"));

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.inventory_size, 3);
    assert_eq!(report.new_listings, 1);
    assert_eq!(report.published, vec!["C"]);
    assert_eq!(ledger_ids(&store).await, vec!["A", "B", "C"]);

    // Nothing left to do on the next run.
    let again = sync.run(Uuid::new_v4(), Trigger::Timer).await;
    assert_eq!(again.outcome, RunOutcome::NothingNew);
    assert_eq!(publisher.call_count(), 1);
    assert_eq!(upstream.detail_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_imageless_listing_is_recorded_and_next_one_published() {
    let upstream = FakeUpstream::with(vec![listing("A", 2), listing("B", 0), listing("C", 3)]);
    let store = ledger_with(&["A"]).await;
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream, Arc::new(store.clone()), publisher.clone());

    let report = sync.run(Uuid::new_v4(), Trigger::Timer).await;

    assert_eq!(publisher.call_count(), 1);
    assert_eq!(publisher.published_ids(), vec!["C"]);
    assert_eq!(publisher.calls.lock().unwrap()[0].0.len(), 3);
    assert_eq!(report.new_listings, 2);
    assert_eq!(report.skipped, vec!["B"]);
    assert_eq!(report.published, vec!["C"]);
    assert_eq!(ledger_ids(&store).await, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_failed_listing_does_not_stop_the_run() {
    let upstream = FakeUpstream::with(vec![listing("X", 1), listing("Y", 2), listing("Z", 2)]);
    let store = ledger_with(&[]).await;
    let publisher = FakePublisher::new();
    publisher.fail_for("Y");
    let sync = orchestrator(upstream, Arc::new(store.clone()), publisher.clone());

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(publisher.published_ids(), vec!["X", "Y", "Z"]);
    assert_eq!(report.published, vec!["X", "Z"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].listing_id, "Y");
    assert!(report.failed[0].reason.contains("create_container"));
    assert_eq!(ledger_ids(&store).await, vec!["X", "Z"]);

    // Y is retried by the next run, and only Y.
    publisher.fail_for.lock().unwrap().clear();
    let retry = sync.run(Uuid::new_v4(), Trigger::Timer).await;
    assert_eq!(retry.published, vec!["Y"]);
    assert_eq!(ledger_ids(&store).await, vec!["X", "Z", "Y"]);
}

#[tokio::test]
async fn test_unpublishable_listings_are_recorded_without_posting() {
    let upstream = FakeUpstream::with(vec![listing("gone", 2), listing("bare", 0), listing("ok", 1)]);
    upstream.remove_detail("gone");
    let store = ledger_with(&[]).await;
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream, Arc::new(store.clone()), publisher.clone());

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(publisher.published_ids(), vec!["ok"]);
    assert_eq!(report.skipped, vec!["gone", "bare"]);
    assert_eq!(report.published, vec!["ok"]);
    assert_eq!(ledger_ids(&store).await, vec!["gone", "bare", "ok"]);
}

#[tokio::test]
async fn test_detail_outage_leaves_listing_for_next_run() {
    let upstream = FakeUpstream::with(vec![listing("A", 1), listing("B", 1)]);
    upstream.break_detail("A");
    let store = ledger_with(&[]).await;
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream, Arc::new(store.clone()), publisher.clone());

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].listing_id, "A");
    assert_eq!(report.published, vec!["B"]);
    assert!(!store.is_published("A").await.unwrap());
}

#[tokio::test]
async fn test_unreadable_ledger_ends_run_without_publishing() {
    let upstream = FakeUpstream::with(vec![listing("A", 1)]);
    let ledger = FlakyLedger::new(ledger_with(&[]).await, 0, true);
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream, ledger, publisher.clone());

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(report.outcome, RunOutcome::LedgerUnavailable);
    assert_eq!(publisher.call_count(), 0);
}

#[tokio::test]
async fn test_ledger_write_is_retried() {
    let upstream = FakeUpstream::with(vec![listing("A", 1)]);
    let store = ledger_with(&[]).await;
    let ledger = FlakyLedger::new(store.clone(), 2, false);
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream, ledger.clone(), publisher);

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(ledger.write_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(report.unrecorded_writes, 0);
    assert_eq!(ledger_ids(&store).await, vec!["A"]);
}

#[tokio::test]
async fn test_ledger_write_failure_is_reported() {
    let upstream = FakeUpstream::with(vec![listing("A", 1)]);
    let ledger = FlakyLedger::new(ledger_with(&[]).await, 10, false);
    let publisher = FakePublisher::new();
    let sync = orchestrator(upstream, ledger.clone(), publisher);

    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert_eq!(ledger.write_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(report.published, vec!["A"]);
    assert_eq!(report.unrecorded_writes, 1);
}

struct CountingExchanger(AtomicU32);

#[async_trait]
impl TokenExchanger for CountingExchanger {
    async fn exchange(&self, _current: &str) -> Result<ExchangedToken, ExchangeError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(ExchangedToken {
            access_token: "renewed".into(),
            expires_in: Some(60 * 86_400),
        })
    }
}

#[tokio::test]
async fn test_token_is_checked_before_publishing() {
    let store = ledger_with(&["A"]).await;
    store
        .save(&Credential::new("expiring", Utc::now() + chrono::Duration::days(1)))
        .await
        .unwrap();
    let exchanger = Arc::new(CountingExchanger(AtomicU32::new(0)));
    let lifecycle = Arc::new(TokenLifecycle::new(Arc::new(store.clone()), exchanger.clone(), 5.0));

    // Nothing new: no token check.
    let upstream = FakeUpstream::with(vec![listing("A", 1)]);
    let sync = orchestrator(upstream, Arc::new(store.clone()), FakePublisher::new())
        .with_token_lifecycle(lifecycle.clone());
    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;
    assert!(report.token_check.is_none());
    assert_eq!(exchanger.0.load(Ordering::SeqCst), 0);

    let upstream = FakeUpstream::with(vec![listing("A", 1), listing("B", 1)]);
    let sync = orchestrator(upstream, Arc::new(store.clone()), FakePublisher::new())
        .with_token_lifecycle(lifecycle);
    let report = sync.run(Uuid::new_v4(), Trigger::Cli).await;

    assert!(matches!(report.token_check, Some(RefreshOutcome::Refreshed { .. })));
    assert_eq!(exchanger.0.load(Ordering::SeqCst), 1);
    assert_eq!(store.load().await.unwrap().unwrap().access_token, "renewed");
}

#[tokio::test]
async fn test_runner_rejects_overlapping_runs() {
    let upstream = FakeUpstream::with(vec![listing("A", 1)]);
    let store = ledger_with(&[]).await;
    let publisher = FakePublisher::new();
    let gate = Arc::new(Notify::new());
    *publisher.gate.lock().unwrap() = Some(gate.clone());

    let sync = orchestrator(upstream, Arc::new(store.clone()), publisher.clone());
    let mut phases = sync.subscribe();
    let runner = SyncRunner::new(Arc::new(sync));

    let first = runner.spawn(Trigger::Http).unwrap();
    publisher.entered.notified().await;

    assert!(runner.is_running());
    assert_eq!(
        *phases.borrow_and_update(),
        SyncPhase::Publishing { index: 0, total: 1 }
    );
    assert!(matches!(runner.spawn(Trigger::Http), Err(AppError::RunInProgress)));
    assert!(runner.run_exclusive(Trigger::Timer).await.is_none());
    assert_eq!(runner.generation(), 1);

    gate.notify_one();
    let report = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(report) = runner.last_report().await {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(report.run_id, first);
    assert_eq!(report.published, vec!["A"]);
    assert_eq!(runner.orchestrator().phase(), SyncPhase::Idle);

    // Lease released: the next trigger is accepted.
    let second = runner.run_exclusive(Trigger::Cli).await.unwrap();
    assert_ne!(second.run_id, first);
    assert_eq!(second.outcome, RunOutcome::NothingNew);
    assert_eq!(runner.generation(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_polling_never_blocks_a_trigger() {
    let upstream = FakeUpstream::with(vec![]);
    let store = ledger_with(&[]).await;
    let sync = orchestrator(upstream, Arc::new(store), FakePublisher::new());
    let runner = SyncRunner::new(Arc::new(sync));

    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let poller = {
        let runner = runner.clone();
        let done = done.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let _ = runner.is_running();
                let _ = runner.status().await;
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..200 {
        let report = runner.run_exclusive(Trigger::Timer).await;
        assert!(report.is_some());
        assert!(!runner.is_running());
    }

    done.store(true, Ordering::SeqCst);
    poller.await.unwrap();
    assert_eq!(runner.generation(), 200);
}
