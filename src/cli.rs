use clap::{Parser, Subcommand};

/// Showroom: announces new vehicle listings on Instagram
#[derive(Parser)]
#[command(name = "showroom", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the background jobs (default)
    Serve {
        /// Port to bind; defaults to SHOWROOM_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one sync in the foreground and print the report as JSON
    Sync,

    /// Inspect or renew the publishing access token
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect or edit the published ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Show expiry and refresh state of the stored token
    Status,
    /// Renew the token now if it is within the refresh threshold
    Refresh,
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// List every recorded listing id
    List,
    /// Record listing ids as published without posting them
    Mark {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Record the whole current inventory as published (first deployment)
    Seed,
}
