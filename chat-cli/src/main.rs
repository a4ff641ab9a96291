//! # parley
//!
//! CLI tool for exercising Parley conversations against a server.
//!
//! ## Commands
//!
//! - `listen`: Print events for one conversation until interrupted
//! - `send`: Send a text message and wait for the server to confirm it
//! - `history`: Print stored history for a conversation
//!
//! ## Example
//!
//! ```bash
//! export CHAT_TOKEN=eyJhbGciOi...
//!
//! # Follow a conversation
//! parley --user alice listen --peer bob
//!
//! # Send a message
//! parley --user alice send --to bob "hello"
//!
//! # Print the last three pages
//! parley --user alice history --peer bob --pages 3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_chat_client::ClientConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{history, listen, send};

/// CLI tool for exercising Parley conversations.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Client configuration file (TOML). Built-in defaults when omitted
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Bearer credential for the server
    #[arg(long, env = "CHAT_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Id of the signed-in user
    #[arg(long, short, env = "CHAT_USER", global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print events for one conversation until interrupted
    Listen {
        /// The other participant
        #[arg(long, short)]
        peer: String,
    },

    /// Send a text message
    Send {
        /// Recipient
        #[arg(long, short)]
        to: String,

        /// Message text
        message: String,

        /// Seconds to wait for the server's confirmation
        #[arg(long, default_value = "10")]
        wait: u64,
    },

    /// Print stored history for a conversation
    History {
        /// The other participant
        #[arg(long, short)]
        peer: String,

        /// Number of pages to load, newest first
        #[arg(long, default_value = "1")]
        pages: usize,
    },
}

/// Credentials shared by every command.
#[derive(Debug)]
pub struct Identity {
    /// Signed-in user id.
    pub user: String,
    /// Bearer token.
    pub token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    let identity = Identity {
        user: cli
            .user
            .context("No user id. Pass --user or set CHAT_USER.")?,
        token: cli
            .token
            .context("No credential. Pass --token or set CHAT_TOKEN.")?,
    };

    match cli.command {
        Commands::Listen { peer } => {
            listen::run(config, &identity, &peer).await?;
        }
        Commands::Send { to, message, wait } => {
            send::run(config, &identity, &to, &message, wait).await?;
        }
        Commands::History { peer, pages } => {
            if pages == 0 {
                anyhow::bail!("--pages must be at least 1");
            }
            history::run(config, &identity, &peer, pages).await?;
        }
    }

    Ok(())
}
