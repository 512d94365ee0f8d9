use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::models::Credential;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub search: SearchConfig,
    pub sync: SyncConfig,
    pub social: SocialConfig,
    /// Shared secret expected as `Authorization: Bearer <secret>` on the trigger endpoint.
    pub trigger_secret: Option<String>,
    /// Appended to every caption after a blank line.
    pub caption_footer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub customer_number: Option<String>,
    pub page_size: u32,
    /// Stop paginating once this many listings are collected. `None` = no cap.
    pub item_cap: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub max_pages: u32,
    /// `None` disables the timer; runs then only start via trigger or CLI.
    pub interval: Option<Duration>,
    pub pacing: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialConfig {
    pub graph_base_url: String,
    pub account_id: Option<String>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    /// Initial credential written to the store when it is empty.
    pub seed_token: Option<String>,
    pub seed_expires_at: Option<DateTime<Utc>>,
    pub token_check_interval: Duration,
    pub refresh_threshold_days: f64,
}

impl SocialConfig {
    pub fn seed_credential(&self) -> Option<Credential> {
        match (&self.seed_token, self.seed_expires_at) {
            (Some(token), Some(expires_at)) => Some(Credential::new(token.clone(), expires_at)),
            _ => None,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let trigger_secret = env_opt("SYNC_TRIGGER_SECRET");
    if trigger_secret.is_none() {
        let env_mode = std::env::var("SHOWROOM_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "SYNC_TRIGGER_SECRET is not set. \
                 Set a long random secret before running in production."
            );
        }
        tracing::warn!("SYNC_TRIGGER_SECRET is not set, the trigger endpoint will reject every request");
    }

    let seed_expires_at = env_opt("FB_TOKEN_EXPIRES_AT")
        .map(|raw| parse_timestamp(&raw).context("FB_TOKEN_EXPIRES_AT"))
        .transpose()?;

    Ok(Config {
        port: env_parse("SHOWROOM_PORT", 8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://showroom.db?mode=rwc".into()),
        search: SearchConfig {
            base_url: std::env::var("SEARCH_API_URL")
                .unwrap_or_else(|_| "https://services.mobile.de/search-api".into()),
            username: env_opt("SEARCH_API_USER"),
            password: env_opt("SEARCH_API_PASSWORD"),
            customer_number: env_opt("SEARCH_CUSTOMER_NUMBER"),
            page_size: env_parse("SEARCH_PAGE_SIZE", 20),
            item_cap: match env_parse::<usize>("SEARCH_ITEM_CAP", 100) {
                0 => None,
                cap => Some(cap),
            },
        },
        sync: SyncConfig {
            max_pages: env_parse("SYNC_MAX_PAGES", 5),
            interval: match env_parse::<u64>("SYNC_INTERVAL_SECS", 3600) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            pacing: Duration::from_millis(env_parse("SYNC_PACING_MS", 2000)),
        },
        social: SocialConfig {
            graph_base_url: std::env::var("GRAPH_API_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".into()),
            account_id: env_opt("INSTAGRAM_ACCOUNT_ID"),
            app_id: env_opt("FB_APP_ID"),
            app_secret: env_opt("FB_APP_SECRET"),
            seed_token: env_opt("FB_ACCESS_TOKEN"),
            seed_expires_at,
            token_check_interval: Duration::from_secs(
                env_parse("TOKEN_CHECK_INTERVAL_SECS", 86_400).max(60),
            ),
            refresh_threshold_days: env_parse("TOKEN_REFRESH_THRESHOLD_DAYS", 5.0),
        },
        trigger_secret,
        caption_footer: env_opt("CAPTION_FOOTER"),
    })
}

/// Unset and blank variables are both treated as absent.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Unix seconds or RFC 3339.
pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("timestamp out of range: {}", raw));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("expected unix seconds or RFC 3339, got '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_accepts_unix_seconds() {
        let ts = parse_timestamp("1700000000").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_timestamp_accepts_rfc3339() {
        let ts = parse_timestamp("2026-01-02T03:04:05+01:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-02T02:04:05+00:00");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("next tuesday").is_err());
    }
}
