//! Showroom: keeps a dealer's Instagram account in step with their vehicle
//! inventory.
//!
//! Library crate shared by the binary and the integration tests in `tests/`.

use std::sync::Arc;

use anyhow::Context;

pub mod api;
pub mod config;
pub mod errors;
pub mod http;
pub mod jobs;
pub mod listings;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod social;
pub mod store;
pub mod sync;

use listings::SearchClient;
use metrics::SyncMetrics;
use social::{CaptionComposer, GraphPublisher, GraphTokenExchanger, TokenLifecycle};
use store::{CredentialStore, PublishedLedger, SqliteStore};
use sync::{SyncOrchestrator, SyncRunner, SyncSettings};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub runner: SyncRunner,
    pub ledger: Arc<dyn PublishedLedger>,
    /// `None` when the app id or secret is missing; the token is then never renewed.
    pub token: Option<Arc<TokenLifecycle>>,
    pub metrics: Arc<SyncMetrics>,
    pub trigger_secret: Option<String>,
}

/// Token lifecycle for `cfg`, if the app credentials needed for the exchange are set.
pub fn token_lifecycle(
    cfg: &config::Config,
    credentials: Arc<dyn CredentialStore>,
) -> anyhow::Result<Option<Arc<TokenLifecycle>>> {
    let (Some(app_id), Some(app_secret)) = (&cfg.social.app_id, &cfg.social.app_secret) else {
        tracing::warn!("FB_APP_ID / FB_APP_SECRET not set, access token will not be renewed");
        return Ok(None);
    };

    let exchanger = GraphTokenExchanger::new(&cfg.social.graph_base_url, app_id, app_secret)?;
    Ok(Some(Arc::new(TokenLifecycle::new(
        credentials,
        Arc::new(exchanger),
        cfg.social.refresh_threshold_days,
    ))))
}

/// Wire the production pipeline: search API client, Graph API publisher and
/// the SQLite-backed ledger and credential store.
pub fn build_state(cfg: &config::Config, store: SqliteStore) -> anyhow::Result<Arc<AppState>> {
    let account_id = cfg
        .social
        .account_id
        .clone()
        .context("INSTAGRAM_ACCOUNT_ID is not set")?;

    let search = Arc::new(SearchClient::new(&cfg.search)?);
    let store = Arc::new(store);
    let publisher = GraphPublisher::new(&cfg.social.graph_base_url, account_id, store.clone())?;
    let metrics = Arc::new(SyncMetrics::new()?);
    let token = token_lifecycle(cfg, store.clone())?;

    let mut orchestrator = SyncOrchestrator::new(
        search.clone(),
        search,
        store.clone(),
        Arc::new(publisher),
        CaptionComposer::new(cfg.caption_footer.clone()),
        SyncSettings::from(&cfg.sync),
    )
    .with_metrics(metrics.clone());
    if let Some(token) = &token {
        orchestrator = orchestrator.with_token_lifecycle(token.clone());
    }

    Ok(Arc::new(AppState {
        runner: SyncRunner::new(Arc::new(orchestrator)),
        ledger: store,
        token,
        metrics,
        trigger_secret: cfg.trigger_secret.clone(),
    }))
}
