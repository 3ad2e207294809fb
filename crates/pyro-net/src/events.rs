//! Lifecycle events and listener registries
//!
//! Listeners are invoked synchronously on the task that raised the event,
//! so they should be fast. Subscribing returns a [`Subscription`] that the
//! caller later hands back to [`Listeners::unsubscribe`]; dropping it does
//! nothing.

use crate::client::ConnectionId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "keep the subscription to unsubscribe later"]
pub struct Subscription(u64);

/// Registry of callbacks for one event
pub struct Listeners<E> {
    handlers: Mutex<Vec<(Subscription, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let subscription = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subscription, Arc::new(handler)));
        debug!("Registered listener {:?}", subscription);
        subscription
    }

    /// Remove a callback; returns false when it was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription);
        handlers.len() != before
    }

    /// Invoke every callback in subscription order
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe.
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A script received by the server, raised after the reply is sent
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub client: ConnectionId,
    pub text: String,
}

/// A response received on an outbound connection
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub client: ConnectionId,
    pub text: String,
}
