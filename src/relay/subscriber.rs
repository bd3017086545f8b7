//! New-message subscription scoped to one source channel.
//!
//! Two tasks cooperate:
//! 1. **Intake** -- drains the platform event stream, drops events from
//!    other chats, queues the rest. It never waits on a handler, so events
//!    keep flowing while a forward is suspended on a rate limit.
//! 2. **Worker** -- runs the handler once per queued event, strictly in
//!    arrival order, one at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, Instrument};

use crate::platform::{ChannelRef, EventReceiver, InboundMessage};

/// Callback invoked for every new message in the subscribed channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Errors are the handler's to log.
    async fn on_message(&self, event: &InboundMessage);
}

/// Event counters of a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Events from the source channel.
    pub matched: u64,
    /// Events from any other chat.
    pub ignored: u64,
    /// Matched events whose handler has returned.
    pub handled: u64,
}

#[derive(Default)]
struct Counters {
    matched: AtomicU64,
    ignored: AtomicU64,
    handled: AtomicU64,
}

/// A live subscription. Ends when the platform event stream closes.
pub struct Subscription {
    counters: Arc<Counters>,
    intake: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Attach `handler` to new messages from `source`.
///
/// Must be spawned from within a Tokio runtime.
pub fn subscribe(
    mut events: EventReceiver,
    source: ChannelRef,
    handler: Arc<dyn MessageHandler>,
) -> Subscription {
    let counters = Arc::new(Counters::default());
    let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<InboundMessage>();

    let intake_counters = Arc::clone(&counters);
    let source_id = source.id;
    let intake = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if event.origin.id != source_id {
                intake_counters.ignored.fetch_add(1, Ordering::Relaxed);
                debug!(chat_id = event.origin.id, "ignoring message from other chat");
                continue;
            }
            intake_counters.matched.fetch_add(1, Ordering::Relaxed);
            if queue_tx.send(event).is_err() {
                error!("forward queue closed, stopping intake");
                break;
            }
        }
        debug!("event stream closed");
    }
    .in_current_span());

    let worker_counters = Arc::clone(&counters);
    let worker = tokio::spawn(async move {
        while let Some(event) = queue_rx.recv().await {
            handler.on_message(&event).await;
            worker_counters.handled.fetch_add(1, Ordering::Relaxed);
        }
    }
    .in_current_span());

    info!(channel_id = source.id, channel = %source.label(), "subscribed to new messages");

    Subscription {
        counters,
        intake,
        worker,
    }
}

impl Subscription {
    /// Counters as of now.
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            matched: self.counters.matched.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            handled: self.counters.handled.load(Ordering::Relaxed),
        }
    }

    /// Wait for the event stream to close and every queued message to be
    /// handled, then return the final counters.
    pub async fn finish(mut self) -> SubscriptionStats {
        if let Err(e) = (&mut self.intake).await {
            error!(error = %e, "subscription intake task failed");
        }
        if let Err(e) = (&mut self.worker).await {
            error!(error = %e, "subscription worker task failed");
        }
        self.stats()
    }
}
