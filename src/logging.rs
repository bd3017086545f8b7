//! Log output for the relay.
//!
//! `start` writes JSON lines to a daily-rotated file under the configured
//! directory and mirrors them to stderr; the one-shot subcommands log to
//! stderr only. `RUST_LOG` wins over the configured level.

use anyhow::Context;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Keeps the background file writer alive. Dropping it flushes what is
/// still buffered.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Build the file + stderr subscriber without installing it.
///
/// Creates `config.dir` if needed. Lines go to
/// `{dir}/{file}.YYYY-MM-DD` as JSON, and to stderr with the emitting
/// module as source tag.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the level
/// directive does not parse.
pub fn production_subscriber(
    config: &LoggingConfig,
) -> anyhow::Result<(impl Subscriber + Send + Sync + 'static, LoggingGuard)> {
    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("failed to create log directory {}", config.dir.display()))?;
    let filter = filter(&config.level)?;

    let appender = tracing_appender::rolling::daily(&config.dir, &config.file);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        );

    Ok((subscriber, LoggingGuard { _guard: guard }))
}

/// Install [`production_subscriber`] as the global subscriber.
///
/// # Errors
///
/// Same as [`production_subscriber`], or if a global subscriber is already
/// installed.
pub fn init_production(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let (subscriber, guard) = production_subscriber(config)?;
    subscriber
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(guard)
}

/// Stderr-only logging at `info` (or `RUST_LOG`). Later calls are no-ops.
pub fn init_cli() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level directive {level:?}")),
    }
}
