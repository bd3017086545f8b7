//! channel-relay CLI entry point.
//!
//! Provides `start`, `check`, and `resolve` subcommands for running the
//! relay, verifying the session and both channels, or looking up a single
//! channel identifier.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use channel_relay::config::Config;
use channel_relay::logging;
use channel_relay::platform::telegram::TelegramPlatform;
use channel_relay::platform::Platform;
use channel_relay::relay::resolver::{ChannelIdentifier, EntityResolver};
use channel_relay::relay::Relay;

/// Copies every new post from one channel into another.
#[derive(Parser)]
#[command(name = "channel-relay", version, about)]
struct Cli {
    /// TOML config file (overrides `$RELAY_CONFIG_PATH` and `./relay.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the relay until the connection closes.
    Start,
    /// Verify the session token and both channels, then exit.
    Check,
    /// Show how a channel identifier is classified and what it resolves to.
    Resolve {
        /// `@handle`, numeric id, or any other channel string.
        identifier: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Start => handle_start(config_path).await,
        Command::Check => handle_check(config_path).await,
        Command::Resolve { identifier } => handle_resolve(config_path, identifier).await,
    }
}

/// Run the relay with file + console logging.
async fn handle_start(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;

    let _logging_guard = logging::init_production(&config.logging)?;
    info!(
        api_id = config.telegram.api_id,
        log_dir = %config.logging.dir.display(),
        log_file = %config.logging.file,
        "running channel relay"
    );

    let platform = Arc::new(
        TelegramPlatform::new(&config.telegram).context("failed to set up Telegram client")?,
    );
    let summary = Relay::new(platform, &config.relay)
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "relay terminated"))?;

    info!(
        source = %summary.source.label(),
        forwarded = summary.stats.handled,
        "relay finished"
    );
    Ok(())
}

/// Connect once, print who the session belongs to, and resolve both channels.
async fn handle_check(config_path: Option<&Path>) -> anyhow::Result<()> {
    logging::init_cli();
    let config = Config::load(config_path).context("failed to load configuration")?;

    let platform = Arc::new(
        TelegramPlatform::new(&config.telegram).context("failed to set up Telegram client")?,
    );
    let identity = platform
        .connect()
        .await
        .context("session token was rejected")?;
    println!("Logged in as: {identity}");

    let resolver = EntityResolver::new(Arc::clone(&platform));
    for (role, raw) in [
        ("source", &config.relay.source),
        ("destination", &config.relay.destination),
    ] {
        let channel = resolver
            .resolve(&ChannelIdentifier::new(raw.clone()))
            .await
            .with_context(|| format!("{role} channel {raw:?} is not reachable"))?;
        println!("{role}: {raw} -> {} (id {})", channel.label(), channel.id);
    }

    Ok(())
}

/// Classify and resolve a single identifier.
async fn handle_resolve(config_path: Option<&Path>, identifier: String) -> anyhow::Result<()> {
    logging::init_cli();
    let identifier = ChannelIdentifier::new(identifier);
    let query = identifier.classify()?;
    println!("{identifier}: lookup by {query}");

    let config = Config::load(config_path).context("failed to load configuration")?;
    let platform = Arc::new(
        TelegramPlatform::new(&config.telegram).context("failed to set up Telegram client")?,
    );
    let channel = EntityResolver::new(platform).resolve(&identifier).await?;
    println!("{identifier} -> {} (id {})", channel.label(), channel.id);
    Ok(())
}
