//! Messaging platform abstraction.
//!
//! The relay core talks to the platform only through the [`Platform`]
//! trait: connect, look a channel up, send a message, and stream new
//! messages until the connection ends. [`telegram`] is the production
//! backend; tests script their own.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod telegram;

/// Sending half of the new-message stream fed by [`Platform::run_until_disconnected`].
pub type EventSender = mpsc::UnboundedSender<InboundMessage>;

/// Receiving half of the new-message stream.
pub type EventReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Errors reported by a platform backend.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// Backpressure: the caller must wait before retrying.
    #[error("rate limited, retry after {}s", wait.as_secs())]
    RateLimited {
        /// How long the platform asked us to wait.
        wait: Duration,
    },

    /// The chat or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The session may not read from or post to the chat.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The session token was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transport failure talking to the platform.
    #[error("network error: {0}")]
    Network(String),

    /// Any other error returned by the platform API.
    #[error("API error: {0}")]
    Api(String),

    /// The update stream ended unexpectedly.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

/// Normalised form of a channel identifier, ready for lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupQuery {
    /// Public handle, including the leading `@`.
    Handle(String),
    /// Numeric chat id (channels and supergroups are negative).
    Id(i64),
    /// Any other string, passed to the platform as-is.
    Name(String),
}

impl fmt::Display for LookupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(handle) => write!(f, "handle {handle}"),
            Self::Id(id) => write!(f, "id {id}"),
            Self::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Resolved, platform-specific reference to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    /// Platform chat id.
    pub id: i64,
    /// Channel title, if the platform reported one.
    pub title: Option<String>,
    /// Public handle without the `@`, if any.
    pub handle: Option<String>,
}

impl ChannelRef {
    /// Reference carrying only an id.
    pub fn from_id(id: i64) -> Self {
        Self {
            id,
            title: None,
            handle: None,
        }
    }

    /// Human-readable label: title, then `@handle`, then the id.
    pub fn label(&self) -> String {
        match (&self.title, &self.handle) {
            (Some(title), _) => title.clone(),
            (None, Some(handle)) => format!("@{handle}"),
            (None, None) => self.id.to_string(),
        }
    }
}

/// Content of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePayload {
    /// Message text, or the media caption.
    pub text: Option<String>,
    /// Whether the message carries media (photo, video, document, ...).
    pub has_media: bool,
}

impl MessagePayload {
    /// Plain text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            has_media: false,
        }
    }
}

/// A new message delivered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel the message was posted in.
    pub origin: ChannelRef,
    /// Platform message id within `origin`.
    pub message_id: i32,
    /// Message content.
    pub payload: MessagePayload,
    /// When the platform says the message was posted.
    pub received_at: DateTime<Utc>,
}

/// The account a session is logged in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Platform user id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Public handle without the `@`, if any.
    pub handle: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handle {
            Some(handle) => write!(f, "{} (@{handle})", self.name),
            None => write!(f, "{} (id {})", self.name, self.id),
        }
    }
}

/// Connection to a messaging platform.
///
/// One instance is shared by every relay component. Implementations must
/// tolerate concurrent calls.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Authenticate the session and report who it belongs to.
    async fn connect(&self) -> Result<Identity, PlatformError>;

    /// Look a channel up.
    async fn lookup(&self, query: &LookupQuery) -> Result<ChannelRef, PlatformError>;

    /// Post `message`'s content, unchanged, into `destination`.
    async fn send_message(
        &self,
        destination: &ChannelRef,
        message: &InboundMessage,
    ) -> Result<(), PlatformError>;

    /// Push every new message the session sees into `events` until the
    /// connection ends.
    ///
    /// Returns `Ok(())` when the remote side closes the stream or the
    /// receiver is dropped, `Err` on an unrecoverable transport failure.
    async fn run_until_disconnected(&self, events: EventSender) -> Result<(), PlatformError>;
}
