//! Relays one inbound message into the destination channel.
//!
//! Rate-limit signals are waited out and the whole attempt (destination
//! lookup included) is repeated, with no cap on the number of attempts.
//! Any other failure abandons the message.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::resolver::{ChannelIdentifier, EntityResolver, ResolutionError};
use crate::platform::{InboundMessage, Platform, PlatformError};

/// Characters of message text shown in log previews.
pub const PREVIEW_CHARS: usize = 50;

/// Progress of a single relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardAttempt {
    /// Send attempts made so far.
    pub attempts: u32,
    /// Total time spent waiting on rate limits.
    pub waited: Duration,
}

/// Why a relay was given up.
#[derive(Debug)]
pub enum AbandonReason {
    /// The destination could not be resolved.
    Resolution(ResolutionError),
    /// The platform rejected the send with a non-rate-limit error.
    Send(PlatformError),
}

/// Final state of a relay.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// The message was posted in the destination.
    Delivered(ForwardAttempt),
    /// The message was dropped.
    Abandoned {
        /// Progress made before giving up.
        attempt: ForwardAttempt,
        /// What went wrong.
        reason: AbandonReason,
    },
}

impl ForwardOutcome {
    /// Whether the message reached the destination.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Progress counters, regardless of outcome.
    pub fn attempt(&self) -> ForwardAttempt {
        match self {
            Self::Delivered(attempt) | Self::Abandoned { attempt, .. } => *attempt,
        }
    }
}

/// Relays messages to one configured destination.
pub struct Forwarder<P: ?Sized> {
    platform: Arc<P>,
    resolver: EntityResolver<P>,
    destination: ChannelIdentifier,
}

impl<P: Platform + ?Sized> Forwarder<P> {
    /// Create a forwarder targeting `destination`.
    pub fn new(platform: Arc<P>, destination: ChannelIdentifier) -> Self {
        Self {
            resolver: EntityResolver::new(Arc::clone(&platform)),
            platform,
            destination,
        }
    }

    /// Relay `event` to the destination.
    ///
    /// The destination is resolved afresh on every attempt. On a rate-limit
    /// signal the call sleeps for the requested duration and starts over;
    /// this repeats until the send succeeds or fails for another reason.
    /// Failures are logged here and reported in the outcome, never raised.
    pub async fn forward(&self, event: &InboundMessage) -> ForwardOutcome {
        let mut attempt = ForwardAttempt::default();

        loop {
            attempt.attempts = attempt.attempts.saturating_add(1);

            let destination = match self.resolver.resolve(&self.destination).await {
                Ok(destination) => destination,
                Err(e) => {
                    error!(
                        message_id = event.message_id,
                        destination = %self.destination,
                        attempts = attempt.attempts,
                        error = %e,
                        "forward abandoned: destination unavailable"
                    );
                    return ForwardOutcome::Abandoned {
                        attempt,
                        reason: AbandonReason::Resolution(e),
                    };
                }
            };

            match self.platform.send_message(&destination, event).await {
                Ok(()) => {
                    info!(
                        message_id = event.message_id,
                        destination = %self.destination,
                        attempts = attempt.attempts,
                        waited_secs = attempt.waited.as_secs(),
                        "message forwarded"
                    );
                    return ForwardOutcome::Delivered(attempt);
                }
                Err(PlatformError::RateLimited { wait }) => {
                    warn!(
                        message_id = event.message_id,
                        wait_secs = wait.as_secs(),
                        attempts = attempt.attempts,
                        "rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                    attempt.waited = attempt.waited.saturating_add(wait);
                }
                Err(e) => {
                    error!(
                        message_id = event.message_id,
                        destination = %self.destination,
                        attempts = attempt.attempts,
                        error = %e,
                        "failed to forward message"
                    );
                    return ForwardOutcome::Abandoned {
                        attempt,
                        reason: AbandonReason::Send(e),
                    };
                }
            }
        }
    }
}

/// Log preview of a message: the first [`PREVIEW_CHARS`] characters
/// followed by `...`.
pub fn preview(event: &InboundMessage) -> String {
    match event.payload.text.as_deref() {
        Some(text) => {
            let head: String = text.chars().take(PREVIEW_CHARS).collect();
            format!("{head}...")
        }
        None if event.payload.has_media => "<media>".to_owned(),
        None => "<empty>".to_owned(),
    }
}
