//! Long-lived access token renewal.
//!
//! The stored credential is either VALID (at least `threshold_days` left) or
//! NEEDS_REFRESH. A refresh exchanges the current token at the identity
//! provider and writes the new token and expiry back in one statement. A failed
//! exchange leaves the stored credential untouched; the next check retries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::http;
use crate::models::Credential;
use crate::store::CredentialStore;

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_DAYS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangedToken {
    pub access_token: String,
    /// Seconds until the new token expires.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid exchange response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, current_token: &str) -> Result<ExchangedToken, ExchangeError>;
}

/// `fb_exchange_token` grant against the Graph API.
pub struct GraphTokenExchanger {
    client: reqwest::Client,
    base_url: Url,
    app_id: String,
    app_secret: String,
}

impl GraphTokenExchanger {
    pub fn new(
        graph_base_url: &str,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http::build_client(http::REQUEST_TIMEOUT)?,
            base_url: http::parse_base_url(graph_base_url)?,
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        })
    }
}

#[async_trait]
impl TokenExchanger for GraphTokenExchanger {
    async fn exchange(&self, current_token: &str) -> Result<ExchangedToken, ExchangeError> {
        let resp = self
            .client
            .get(http::join(&self.base_url, &["oauth", "access_token"]))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("fb_exchange_token", current_token),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                message: http::error_body(resp).await,
            });
        }

        let body = resp.text().await?;
        let token: ExchangedToken =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))?;
        if token.access_token.trim().is_empty() {
            return Err(ExchangeError::Decode("empty access_token".into()));
        }
        Ok(token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    Valid,
    NeedsRefresh,
}

/// `Valid` iff at least `threshold_days` remain.
pub fn token_state(credential: &Credential, now: DateTime<Utc>, threshold_days: f64) -> TokenState {
    if credential.days_until_expiry(now) >= threshold_days {
        TokenState::Valid
    } else {
        TokenState::NeedsRefresh
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Nothing to do.
    Valid { days_left: f64 },
    Refreshed { expires_at: DateTime<Utc> },
    /// Exchange or write-back failed; the stored credential is unchanged.
    Failed { reason: String },
    /// No credential stored yet.
    Missing,
}

impl RefreshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Valid { .. } => "valid",
            RefreshOutcome::Refreshed { .. } => "refreshed",
            RefreshOutcome::Failed { .. } => "failed",
            RefreshOutcome::Missing => "missing",
        }
    }
}

pub struct TokenLifecycle {
    store: Arc<dyn CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
    threshold_days: f64,
    /// Serializes checks so the startup check, the daily job and a sync run
    /// never exchange the same token twice.
    lock: Mutex<()>,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        exchanger: Arc<dyn TokenExchanger>,
        threshold_days: f64,
    ) -> Self {
        Self {
            store,
            exchanger,
            threshold_days,
            lock: Mutex::new(()),
        }
    }

    pub async fn ensure_fresh(&self) -> RefreshOutcome {
        self.ensure_fresh_at(Utc::now()).await
    }

    /// Same as [`ensure_fresh`](Self::ensure_fresh) with an explicit clock.
    pub async fn ensure_fresh_at(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let _guard = self.lock.lock().await;

        let credential = match self.store.load().await {
            Ok(Some(c)) => c,
            Ok(None) => {
                warn!("no publishing credential stored, skipping token check");
                return RefreshOutcome::Missing;
            }
            Err(e) => {
                error!(error = %e, "failed to load credential");
                return RefreshOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let days_left = credential.days_until_expiry(now);
        if token_state(&credential, now, self.threshold_days) == TokenState::Valid {
            debug!(days_left, "access token still valid");
            return RefreshOutcome::Valid { days_left };
        }

        info!(
            days_left,
            threshold_days = self.threshold_days,
            token = %credential.masked_token(),
            "access token due for refresh"
        );

        let exchanged = match self.exchanger.exchange(&credential.access_token).await {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "token exchange failed, keeping current token");
                return RefreshOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let lifetime = exchanged
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
            .unwrap_or_else(|| Duration::days(DEFAULT_TOKEN_LIFETIME_DAYS));
        let refreshed = Credential::new(exchanged.access_token, now + lifetime);

        if let Err(e) = self.store.save(&refreshed).await {
            error!(error = %e, "refreshed token could not be stored");
            return RefreshOutcome::Failed {
                reason: e.to_string(),
            };
        }

        info!(expires_at = %refreshed.expires_at, "access token refreshed");
        RefreshOutcome::Refreshed {
            expires_at: refreshed.expires_at,
        }
    }

    /// Current state without refreshing, for status output.
    pub async fn inspect(&self) -> Option<(Credential, TokenState)> {
        let credential = self.store.load().await.ok().flatten()?;
        let state = token_state(&credential, Utc::now(), self.threshold_days);
        Some((credential, state))
    }
}
