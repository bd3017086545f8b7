//! Configuration loading and validation.
//!
//! Settings come from four layers, lowest precedence first:
//! built-in defaults, an optional `relay.toml`, a `.env` file in the working
//! directory, and the process environment.
//!
//! Every required value must be present once the layers are merged;
//! otherwise loading fails with a [`ConfigError`] before anything touches
//! the network.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Environment variable holding the API identity id.
pub const ENV_API_ID: &str = "TELEGRAM_API_ID";
/// Environment variable holding the API identity hash.
pub const ENV_API_HASH: &str = "TELEGRAM_API_HASH";
/// Environment variable holding the pre-authenticated session token.
pub const ENV_SESSION: &str = "TELEGRAM_SESSION_STRING";
/// Environment variable naming the channel to listen on.
pub const ENV_SOURCE: &str = "SOURCE_CHANNEL";
/// Environment variable naming the channel to relay into.
pub const ENV_DESTINATION: &str = "DESTINATION_CHANNEL";
/// Environment variable overriding the Bot API server URL.
pub const ENV_API_URL: &str = "TELEGRAM_API_URL";
/// Environment variable overriding the log directory.
pub const ENV_LOG_DIR: &str = "RELAY_LOG_DIR";
/// Environment variable overriding the log file name prefix.
pub const ENV_LOG_FILE: &str = "RELAY_LOG_FILE";
/// Environment variable overriding the default log filter.
pub const ENV_LOG_LEVEL: &str = "RELAY_LOG_LEVEL";
/// Environment variable overriding the long-poll timeout.
pub const ENV_POLL_TIMEOUT: &str = "RELAY_POLL_TIMEOUT_SECS";
/// Environment variable pointing at a TOML config file.
pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent or blank.
    #[error("missing required setting {0}")]
    Missing(&'static str),

    /// A setting is present but cannot be used.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Setting name (environment variable spelling).
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The config file could not be read.
    #[error("failed to read config at {path}: {source}")]
    Read {
        /// Path that was tried.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

// ── File layer ──────────────────────────────────────────────────

/// Raw contents of `relay.toml`. Every field is optional; the merged result
/// is validated by [`Config::from_parts`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// `[telegram]` table.
    pub telegram: FileTelegram,
    /// `[relay]` table.
    pub relay: FileRelay,
    /// `[logging]` table.
    pub logging: FileLogging,
}

/// `[telegram]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileTelegram {
    /// API identity id.
    pub api_id: Option<i64>,
    /// API identity hash.
    pub api_hash: Option<String>,
    /// Session token.
    pub session: Option<String>,
    /// Alternative Bot API server.
    pub api_url: Option<String>,
    /// Long-poll timeout in seconds.
    pub poll_timeout_secs: Option<u32>,
}

/// `[relay]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileRelay {
    /// Source channel identifier.
    pub source: Option<String>,
    /// Destination channel identifier.
    pub destination: Option<String>,
}

/// `[logging]` table of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLogging {
    /// Directory receiving the rolling log file.
    pub dir: Option<PathBuf>,
    /// Log file name prefix; the date is appended on rotation.
    pub file: Option<String>,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

impl FileConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns the TOML error when the document does not match the schema.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Validated config ────────────────────────────────────────────

/// Fully validated relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform credentials and connection settings.
    pub telegram: TelegramConfig,
    /// Which channels to relay between.
    pub relay: RelayConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Platform credentials and connection settings.
///
/// The relay talks to the Bot API, which authenticates with `session` (the
/// bot token) alone. `api_id` and `api_hash` are the application
/// credentials a self-hosted Bot API server (`api_url`) is launched with;
/// they are validated here and reported at startup but never sent.
#[derive(Clone)]
pub struct TelegramConfig {
    /// API identity id.
    pub api_id: i32,
    /// API identity hash.
    pub api_hash: String,
    /// Pre-authenticated session token.
    pub session: String,
    /// Alternative Bot API server, if any.
    pub api_url: Option<Url>,
    /// Long-poll timeout in seconds.
    pub poll_timeout_secs: u32,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &"[REDACTED]")
            .field("session", &"[REDACTED]")
            .field("api_url", &self.api_url.as_ref().map(Url::as_str))
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Source and destination channel identifiers, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Channel to listen on.
    pub source: String,
    /// Channel to relay into.
    pub destination: String,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Directory receiving the rolling log file.
    pub dir: PathBuf,
    /// Log file name prefix, e.g. `channel-relay.log` for
    /// `channel-relay.log.2024-01-31`.
    pub file: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file() -> String {
    "channel-relay.log".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_poll_timeout_secs() -> u32 {
    30
}

impl Config {
    /// Load configuration from all layers.
    ///
    /// `path` is an explicit config file (from `--config`); it must exist.
    /// Without it, `$RELAY_CONFIG_PATH` is tried (must exist), then
    /// `./relay.toml` (optional). A `.env` file in the working directory
    /// is loaded into the environment without overriding variables that are
    /// already set.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a file is unreadable or a required
    /// setting is missing or invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_path) = dotenvy::dotenv() {
            tracing::debug!(path = %env_path.display(), "loaded .env file");
        }
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => FileConfig::read(p)?,
            None => match env(ENV_CONFIG_PATH) {
                Some(p) => FileConfig::read(Path::new(&p))?,
                None => read_optional(Path::new(DEFAULT_CONFIG_FILE))?,
            },
        };
        Self::from_parts(file, env)
    }

    /// Build configuration from the environment alone.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a required setting is missing or invalid.
    pub fn from_env_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Self::from_parts(FileConfig::default(), env)
    }

    /// Merge a parsed file with environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a required setting is missing or invalid.
    pub fn from_parts(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Blank env values count as unset.
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_id = match env(ENV_API_ID) {
            Some(raw) => raw.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
                key: ENV_API_ID,
                reason: format!("{raw:?} is not an integer: {e}"),
            })?,
            None => file.telegram.api_id.ok_or(ConfigError::Missing(ENV_API_ID))?,
        };
        let api_id = i32::try_from(api_id).map_err(|_| ConfigError::Invalid {
            key: ENV_API_ID,
            reason: format!("{api_id} is out of range"),
        })?;

        let api_hash = required(env(ENV_API_HASH), file.telegram.api_hash, ENV_API_HASH)?;
        let session = required(env(ENV_SESSION), file.telegram.session, ENV_SESSION)?;
        let source = required(env(ENV_SOURCE), file.relay.source, ENV_SOURCE)?;
        let destination = required(
            env(ENV_DESTINATION),
            file.relay.destination,
            ENV_DESTINATION,
        )?;

        let api_url = env(ENV_API_URL)
            .or(file.telegram.api_url)
            .map(|raw| {
                Url::parse(raw.trim()).map_err(|e| ConfigError::Invalid {
                    key: ENV_API_URL,
                    reason: format!("{raw:?}: {e}"),
                })
            })
            .transpose()?;

        let poll_timeout_secs = match env(ENV_POLL_TIMEOUT) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
                key: ENV_POLL_TIMEOUT,
                reason: format!("{raw:?}: {e}"),
            })?,
            None => file
                .telegram
                .poll_timeout_secs
                .unwrap_or_else(default_poll_timeout_secs),
        };

        let dir = env(ENV_LOG_DIR)
            .map(PathBuf::from)
            .or(file.logging.dir)
            .unwrap_or_else(default_log_dir);
        let log_file = env(ENV_LOG_FILE)
            .or(file.logging.file)
            .map(|v| v.trim().to_owned())
            .unwrap_or_else(default_log_file);
        if log_file.is_empty() || log_file.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                key: ENV_LOG_FILE,
                reason: format!("{log_file:?} must be a plain file name"),
            });
        }
        let level = env(ENV_LOG_LEVEL)
            .or(file.logging.level.filter(|v| !v.trim().is_empty()))
            .map(|v| v.trim().to_owned())
            .unwrap_or_else(default_log_level);

        Ok(Self {
            telegram: TelegramConfig {
                api_id,
                api_hash,
                session,
                api_url,
                poll_timeout_secs,
            },
            relay: RelayConfig {
                source,
                destination,
            },
            logging: LoggingConfig {
                dir,
                file: log_file,
                level,
            },
        })
    }
}

fn required(
    from_env: Option<String>,
    from_file: Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    from_env
        .or(from_file.filter(|v| !v.trim().is_empty()))
        .map(|v| v.trim().to_owned())
        .ok_or(ConfigError::Missing(key))
}

fn read_optional(path: &Path) -> Result<FileConfig, ConfigError> {
    match FileConfig::read(path) {
        Ok(file) => {
            tracing::info!(path = %path.display(), "loaded config file");
            Ok(file)
        }
        Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Ok(FileConfig::default())
        }
        Err(e) => Err(e),
    }
}
