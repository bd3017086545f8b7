//! Telegram Bot API backend -- in-process long polling.
//!
//! The session token is the bot token. The bot must be an administrator of
//! both channels: it reads the source through `channel_post` updates and
//! posts into the destination with `copyMessage`, which keeps text, media
//! and formatting exactly as published.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, Chat, MessageId, Recipient, UpdateKind};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use super::{
    ChannelRef, EventSender, Identity, InboundMessage, LookupQuery, MessagePayload, Platform,
    PlatformError,
};
use crate::config::TelegramConfig;

/// Extra seconds the HTTP client waits beyond the long-poll timeout, so the
/// socket stays open while Telegram holds a `getUpdates` request.
pub const POLL_TIMEOUT_MARGIN_SECS: u64 = 10;

/// How the update stream reacts to transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    /// Consecutive failures tolerated before the stream is declared lost.
    pub max_retries: u32,
    /// First delay after a failure, doubled on each further failure.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// [`Platform`] implementation over `teloxide`.
pub struct TelegramPlatform {
    bot: Bot,
    poll_timeout_secs: u32,
    backoff: PollBackoff,
}

impl TelegramPlatform {
    /// Build a backend from validated settings. No network traffic happens
    /// until [`Platform::connect`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &TelegramConfig) -> Result<Self, PlatformError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(http_timeout(config.poll_timeout_secs))
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {e}")))?;

        let mut bot = Bot::with_client(&config.session, client);
        if let Some(url) = &config.api_url {
            bot = bot.set_api_url(url.clone());
        }
        Ok(Self {
            bot,
            poll_timeout_secs: config.poll_timeout_secs,
            backoff: PollBackoff::default(),
        })
    }

    /// Replace the transport-failure policy of the update stream.
    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// HTTP timeout for every request: the long-poll timeout plus
/// [`POLL_TIMEOUT_MARGIN_SECS`].
pub fn http_timeout(poll_timeout_secs: u32) -> Duration {
    Duration::from_secs(u64::from(poll_timeout_secs).saturating_add(POLL_TIMEOUT_MARGIN_SECS))
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn connect(&self) -> Result<Identity, PlatformError> {
        let me = self.bot.get_me().await.map_err(map_request_error)?;
        Ok(Identity {
            id: i64::try_from(me.user.id.0).unwrap_or(i64::MAX),
            name: me.user.full_name(),
            handle: me.user.username.clone(),
        })
    }

    async fn lookup(&self, query: &LookupQuery) -> Result<ChannelRef, PlatformError> {
        let chat = self
            .bot
            .get_chat(recipient_for(query))
            .await
            .map_err(map_request_error)?;
        Ok(channel_ref(&chat))
    }

    async fn send_message(
        &self,
        destination: &ChannelRef,
        message: &InboundMessage,
    ) -> Result<(), PlatformError> {
        self.bot
            .copy_message(
                ChatId(destination.id),
                ChatId(message.origin.id),
                MessageId(message.message_id),
            )
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn run_until_disconnected(&self, events: EventSender) -> Result<(), PlatformError> {
        // Updates queued before startup are skipped: fetch the newest one
        // and start right after it.
        let mut offset = match self.bot.get_updates().offset(-1).timeout(0).send().await {
            Ok(pending) => pending.last().map_or(0, |u| u.id.as_offset()),
            Err(e) => return Err(map_request_error(e)),
        };
        info!(offset, "update stream connected");

        let mut failures: u32 = 0;
        let mut delay = self.backoff.initial;

        loop {
            let batch = tokio::select! {
                batch = self
                    .bot
                    .get_updates()
                    .offset(offset)
                    .timeout(self.poll_timeout_secs)
                    .allowed_updates(vec![AllowedUpdate::ChannelPost, AllowedUpdate::Message])
                    .send() => batch,
                () = events.closed() => {
                    info!("event receiver dropped, closing update stream");
                    return Ok(());
                }
            };

            match batch {
                Ok(updates) => {
                    failures = 0;
                    delay = self.backoff.initial;
                    for update in updates {
                        offset = update.id.as_offset();
                        let message = match update.kind {
                            UpdateKind::ChannelPost(msg) | UpdateKind::Message(msg) => msg,
                            _ => {
                                debug!(offset, "skipping non-message update");
                                continue;
                            }
                        };
                        if events.send(inbound_message(&message)).is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(RequestError::RetryAfter(secs)) => {
                    warn!(wait_secs = secs.seconds(), "update polling rate limited");
                    tokio::time::sleep(secs.duration()).await;
                }
                Err(RequestError::Network(e)) => {
                    failures = failures.saturating_add(1);
                    if failures > self.backoff.max_retries {
                        return Err(PlatformError::Disconnected(format!(
                            "giving up after {} network failures: {e}",
                            self.backoff.max_retries
                        )));
                    }
                    warn!(
                        error = %e,
                        failures,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "update polling failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.backoff.max);
                }
                Err(e) => return Err(map_request_error(e)),
            }
        }
    }
}

/// Translate a lookup query into a Bot API chat recipient.
///
/// Free-form names that are `t.me` links are reduced to their handle;
/// anything else is passed through for the server to judge.
pub fn recipient_for(query: &LookupQuery) -> Recipient {
    match query {
        LookupQuery::Handle(handle) => Recipient::ChannelUsername(handle.clone()),
        LookupQuery::Id(id) => Recipient::Id(ChatId(*id)),
        LookupQuery::Name(name) => {
            let link = name
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .strip_prefix("t.me/");
            match link {
                Some(path) if !path.is_empty() => {
                    let handle = path.split(['/', '?']).next().unwrap_or(path);
                    Recipient::ChannelUsername(format!("@{handle}"))
                }
                _ => Recipient::ChannelUsername(name.clone()),
            }
        }
    }
}

/// Map a teloxide request error onto the platform error taxonomy.
pub fn map_request_error(err: RequestError) -> PlatformError {
    match err {
        RequestError::RetryAfter(secs) => PlatformError::RateLimited {
            wait: secs.duration(),
        },
        RequestError::Api(ApiError::ChatNotFound) => {
            PlatformError::NotFound(ApiError::ChatNotFound.to_string())
        }
        RequestError::Api(ApiError::InvalidToken) => {
            PlatformError::Unauthorized(ApiError::InvalidToken.to_string())
        }
        RequestError::Api(
            e @ (ApiError::BotKicked | ApiError::BotKickedFromSupergroup | ApiError::BotBlocked),
        ) => PlatformError::Forbidden(e.to_string()),
        RequestError::Api(ApiError::Unknown(msg)) if msg.starts_with("Forbidden") => {
            PlatformError::Forbidden(msg)
        }
        RequestError::Network(e) => PlatformError::Network(e.to_string()),
        other => PlatformError::Api(other.to_string()),
    }
}

fn channel_ref(chat: &Chat) -> ChannelRef {
    ChannelRef {
        id: chat.id.0,
        title: chat.title().map(str::to_owned),
        handle: chat.username().map(str::to_owned),
    }
}

fn inbound_message(msg: &Message) -> InboundMessage {
    let has_media = msg.photo().is_some()
        || msg.video().is_some()
        || msg.document().is_some()
        || msg.audio().is_some()
        || msg.voice().is_some()
        || msg.animation().is_some()
        || msg.sticker().is_some()
        || msg.video_note().is_some();

    InboundMessage {
        origin: channel_ref(&msg.chat),
        message_id: msg.id.0,
        payload: MessagePayload {
            text: msg.text().or_else(|| msg.caption()).map(str::to_owned),
            has_media,
        },
        received_at: msg.date,
    }
}
