use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use showroom::listings::{InventorySource, SearchClient};
use showroom::store::{CredentialStore, PublishedLedger, SqliteStore};
use showroom::sync::Trigger;
use showroom::{api, config, jobs, social};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        None => run_server(cfg, None).await,
        Some(cli::Commands::Sync) => run_once(cfg).await,
        Some(cli::Commands::Token { command }) => handle_token_command(cfg, command).await,
        Some(cli::Commands::Ledger { command }) => handle_ledger_command(cfg, command).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// fmt (or JSON) logs filtered by `RUST_LOG`, plus an OTLP exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "showroom"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("SHOWROOM_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let (fmt_plain, fmt_json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "showroom=debug,tower_http=info".into()),
        ))
        .with(fmt_plain)
        .with(fmt_json)
        .with(telemetry_layer)
        .init();
    Ok(())
}

/// Open the database, apply migrations and seed the credential from the
/// environment if none is stored yet.
async fn open_store(cfg: &config::Config) -> anyhow::Result<SqliteStore> {
    tracing::info!("Connecting to database...");
    let store = SqliteStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("failed to open {}", cfg.database_url))?;

    tracing::info!("Running migrations...");
    store.migrate().await.context("migrations failed")?;

    if let Some(seed) = cfg.social.seed_credential() {
        if store.seed(&seed).await? {
            tracing::info!(expires_at = %seed.expires_at, "seeded access token from environment");
        }
    }
    Ok(store)
}

async fn run_server(cfg: config::Config, port: Option<u16>) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let state = showroom::build_state(&cfg, store)?;

    if let Some(lifecycle) = &state.token {
        jobs::token_refresh::spawn(
            lifecycle.clone(),
            Some(state.metrics.clone()),
            cfg.social.token_check_interval,
        );
        tracing::info!(
            every_secs = cfg.social.token_check_interval.as_secs(),
            "token refresh job started"
        );
    }

    match cfg.sync.interval {
        Some(every) => {
            jobs::sync::spawn(state.runner.clone(), every);
            tracing::info!(every_secs = every.as_secs(), "sync job started");
        }
        None => tracing::info!("SYNC_INTERVAL_SECS=0, runs only start via trigger or CLI"),
    }

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("showroom listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn run_once(cfg: config::Config) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let state = showroom::build_state(&cfg, store)?;

    let report = state
        .runner
        .run_exclusive(Trigger::Cli)
        .await
        .context("a sync run is already in progress")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn handle_token_command(
    cfg: config::Config,
    command: cli::TokenCommands,
) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&cfg).await?);

    match command {
        cli::TokenCommands::Status => {
            let Some(credential) = store.load().await? else {
                println!("No access token stored. Set FB_ACCESS_TOKEN and FB_TOKEN_EXPIRES_AT.");
                return Ok(());
            };
            let state = social::token::token_state(
                &credential,
                chrono::Utc::now(),
                cfg.social.refresh_threshold_days,
            );
            println!("Token:      {}", credential.masked_token());
            println!("Expires at: {}", credential.expires_at.to_rfc3339());
            println!(
                "Days left:  {:.2}",
                credential.days_until_expiry(chrono::Utc::now())
            );
            println!("State:      {}", serde_json::to_string(&state)?.trim_matches('"'));
        }
        cli::TokenCommands::Refresh => {
            let lifecycle = showroom::token_lifecycle(&cfg, store)?
                .context("FB_APP_ID and FB_APP_SECRET are required to refresh the token")?;
            let outcome = lifecycle.ensure_fresh().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let social::RefreshOutcome::Failed { reason } = outcome {
                anyhow::bail!("token refresh failed: {}", reason);
            }
        }
    }

    Ok(())
}

async fn handle_ledger_command(
    cfg: config::Config,
    command: cli::LedgerCommands,
) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;

    match command {
        cli::LedgerCommands::List => {
            let records = store.list_published().await?;
            if records.is_empty() {
                println!("Ledger is empty.");
            } else {
                println!("{:<8} LISTING ID", "ROW");
                for r in &records {
                    println!("{:<8} {}", r.id, r.listing_id);
                }
            }
        }
        cli::LedgerCommands::Mark { ids } => {
            for id in &ids {
                store.record_published(id).await?;
            }
            println!("Recorded {} listing(s).", ids.len());
        }
        cli::LedgerCommands::Seed => {
            let client = SearchClient::new(&cfg.search)?;
            let inventory = client.fetch_all(cfg.sync.max_pages).await;
            if !inventory.failed_pages.is_empty() {
                anyhow::bail!(
                    "pages {:?} could not be fetched; refusing to seed a partial inventory",
                    inventory.failed_pages
                );
            }

            let before = store.published_count().await?;
            for listing in &inventory.listings {
                store.record_published(&listing.id).await?;
            }
            let added = store.published_count().await?.saturating_sub(before);
            println!(
                "Seeded {} listing(s) ({} already recorded).",
                added,
                (inventory.listings.len() as u64).saturating_sub(added)
            );
        }
    }

    Ok(())
}
