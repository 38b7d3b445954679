//! Topic-based handler registry.
//!
//! Handlers subscribe to a topic (see [`ChannelEvent::topic`]) or to
//! [`TOPIC_ANY`]. Routing snapshots the matching handlers under the lock and
//! calls them outside it, so a handler may subscribe or unsubscribe from
//! inside a callback. A handler that errors or panics is logged and counted;
//! the remaining handlers still run.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::error::Result;
use crate::identifiers::SubscriptionId;
use crate::protocol::{ChannelEvent, TOPIC_ANY};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for each routed event.
pub type EventHandler = Arc<dyn Fn(&ChannelEvent) -> Result<()> + Send + Sync>;

type Subscribers = Vec<(SubscriptionId, EventHandler)>;

/// Outcome of routing one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Handlers invoked.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Registry of handlers keyed by topic.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<FxHashMap<String, Subscribers>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl Dispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `topic`.
    pub fn on<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        let topic = topic.into();
        trace!(%id, %topic, "Handler subscribed");
        self.handlers
            .lock()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription.
    ///
    /// Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let mut removed = false;

        handlers.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|(sub, _)| *sub != id);
            removed |= subscribers.len() != before;
            !subscribers.is_empty()
        });

        removed
    }

    /// Total number of subscriptions.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }

    /// Returns `true` if a handler is registered for exactly `topic`.
    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.handlers.lock().contains_key(topic)
    }

    /// Invokes every handler for the event's topic, then the wildcard ones.
    pub fn route(&self, event: &ChannelEvent) -> RouteOutcome {
        let topic = event.topic();
        let targets: Vec<EventHandler> = {
            let handlers = self.handlers.lock();
            let exact = handlers.get(topic).into_iter().flatten();
            let any = if topic == TOPIC_ANY {
                None
            } else {
                handlers.get(TOPIC_ANY)
            };
            exact
                .chain(any.into_iter().flatten())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        let mut outcome = RouteOutcome::default();
        for handler in targets {
            outcome.delivered += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    warn!(%topic, error = %e, "Handler failed");
                }
                Err(_) => {
                    outcome.failed += 1;
                    warn!(%topic, "Handler panicked");
                }
            }
        }

        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
