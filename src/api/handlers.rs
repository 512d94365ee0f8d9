use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::social::TokenState;
use crate::sync::runner::RunnerStatus;
use crate::sync::Trigger;
use crate::AppState;

// ── Response DTOs ────────────────────────────────────────────

#[derive(Serialize)]
pub struct TriggerResponse {
    pub status: &'static str,
    pub run_id: Uuid,
}

#[derive(Serialize)]
pub struct TokenSummary {
    pub state: TokenState,
    pub expires_at: DateTime<Utc>,
    pub days_left: f64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub runner: RunnerStatus,
    pub ledger_size: u64,
    pub token: Option<TokenSummary>,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/sync: start a run in the background
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let run_id = state.runner.spawn(Trigger::Http).map_err(|e| {
        tracing::info!("sync trigger rejected: {}", e);
        e
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            status: "accepted",
            run_id,
        }),
    ))
}

/// GET /api/v1/sync/status
pub async fn sync_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, AppError> {
    let ledger_size = state.ledger.published_count().await?;

    let token = match &state.token {
        Some(lifecycle) => lifecycle.inspect().await.map(|(credential, token_state)| TokenSummary {
            state: token_state,
            expires_at: credential.expires_at,
            days_left: credential.days_until_expiry(Utc::now()),
        }),
        None => None,
    };

    Ok(Json(StatusResponse {
        runner: state.runner.status().await,
        ledger_size,
        token,
    }))
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics: Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
