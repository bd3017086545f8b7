//! The relay loop: connect, subscribe to the source channel, forward every
//! new message to the destination, until the platform disconnects.
//!
//! Only startup failures (connect, source resolution) and a lost connection
//! end the run. Everything that goes wrong while relaying a single message
//! stays with that message.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

use crate::config::RelayConfig;
use crate::platform::{ChannelRef, Identity, InboundMessage, Platform, PlatformError};

pub mod forwarder;
pub mod resolver;
pub mod subscriber;

use forwarder::{preview, Forwarder};
use resolver::{ChannelIdentifier, EntityResolver, ResolutionError};
use subscriber::{MessageHandler, SubscriptionStats};

/// Errors that end the relay loop.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The session could not be established.
    #[error("failed to connect: {0}")]
    Connect(#[source] PlatformError),

    /// The source channel could not be resolved, so nothing was subscribed.
    #[error("failed to set up message handler: {0}")]
    Subscribe(#[from] ResolutionError),

    /// The connection failed while the relay was running.
    #[error("connection lost: {0}")]
    Connection(#[source] PlatformError),
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Account the session was logged in as.
    pub identity: Identity,
    /// The subscribed source channel.
    pub source: ChannelRef,
    /// Event counters at shutdown.
    pub stats: SubscriptionStats,
}

/// Relays one source channel into one destination channel.
pub struct Relay<P: ?Sized> {
    platform: Arc<P>,
    source: ChannelIdentifier,
    destination: ChannelIdentifier,
}

impl<P: Platform + ?Sized + 'static> Relay<P> {
    /// Create a relay over a shared platform handle.
    pub fn new(platform: Arc<P>, channels: &RelayConfig) -> Self {
        Self {
            platform,
            source: ChannelIdentifier::new(channels.source.clone()),
            destination: ChannelIdentifier::new(channels.destination.clone()),
        }
    }

    /// Connect, subscribe, and relay until the platform disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connect`] when the session is rejected,
    /// [`RelayError::Subscribe`] when the source cannot be resolved, and
    /// [`RelayError::Connection`] when the event stream fails. Per-message
    /// failures are logged and never returned.
    #[instrument(
        name = "relay",
        skip(self),
        fields(source = %self.source, destination = %self.destination)
    )]
    pub async fn run(&self) -> Result<RunSummary, RelayError> {
        info!("starting channel relay");

        let identity = self.platform.connect().await.map_err(|e| {
            error!(error = %e, "failed to connect");
            RelayError::Connect(e)
        })?;
        info!(user_id = identity.id, identity = %identity, "connected");

        let source = EntityResolver::new(Arc::clone(&self.platform))
            .resolve(&self.source)
            .await
            .inspect_err(|e| error!(error = %e, "failed to set up message handler"))?;
        info!(channel = %source.label(), "listening for messages");

        let forwarder = Arc::new(Forwarder::new(
            Arc::clone(&self.platform),
            self.destination.clone(),
        ));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = subscriber::subscribe(events_rx, source.clone(), forwarder);

        let disconnected = self.platform.run_until_disconnected(events_tx).await;
        let stats = subscription.finish().await;

        match disconnected {
            Ok(()) => {
                info!(
                    matched = stats.matched,
                    ignored = stats.ignored,
                    handled = stats.handled,
                    "connection closed, relay stopped"
                );
                Ok(RunSummary {
                    identity,
                    source,
                    stats,
                })
            }
            Err(e) => {
                error!(
                    error = %e,
                    matched = stats.matched,
                    handled = stats.handled,
                    "connection lost, relay stopped"
                );
                Err(RelayError::Connection(e))
            }
        }
    }
}

#[async_trait]
impl<P: Platform + ?Sized + 'static> MessageHandler for Forwarder<P> {
    async fn on_message(&self, event: &InboundMessage) {
        info!(
            message_id = event.message_id,
            preview = %preview(event),
            "new message received"
        );
        // Outcome is logged inside `forward`.
        let _ = self.forward(event).await;
    }
}
