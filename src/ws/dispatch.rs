//! Fan-out of connection events to registered handlers.
//!
//! Handlers are grouped by [`EventKind`] and invoked synchronously, in
//! registration order, on the task that publishes the event. Each publish
//! iterates over a snapshot of the registry, so handlers may subscribe or
//! unsubscribe (themselves or others) while being invoked: the change takes
//! effect from the next publish on.
//!
//! A panicking handler is not caught; the panic propagates to the publisher.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::types::response::{CloseEvent, ErrorEvent, InboundMessage};

/// Something that happened on the connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The transport is open and ready to send
    Opened,
    /// A decoded inbound frame
    Message(InboundMessage),
    /// The transport reported an error
    Errored(ErrorEvent),
    /// The transport closed
    Closed(CloseEvent),
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Opened => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Errored(_) => EventKind::Error,
            Self::Closed(_) => EventKind::Close,
        }
    }
}

/// Handler categories.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Error,
    Open,
    Close,
}

impl EventKind {
    pub const ALL: [Self; 4] = [Self::Message, Self::Error, Self::Open, Self::Close];
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: u64,
    handler: Handler,
}

struct Registry {
    next_id: AtomicU64,
    handlers: DashMap<EventKind, Vec<Entry>>,
}

impl Registry {
    fn remove(&self, kind: EventKind, id: u64) -> bool {
        let Some(mut entries) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }
}

/// Registry of event handlers. Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        let handlers = DashMap::new();
        for kind in EventKind::ALL {
            handlers.insert(kind, Vec::new());
        }

        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers,
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    ///
    /// Registering the same closure twice yields two independent entries.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.entry(kind).or_default().push(Entry {
            id,
            handler: Arc::new(handler),
        });

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every handler registered for the event's kind.
    pub fn publish(&self, event: &Event) {
        // Clone the entries so the shard lock is released before any handler runs.
        let snapshot: Vec<Entry> = self
            .registry
            .handlers
            .get(&event.kind())
            .map(|entries| entries.value().clone())
            .unwrap_or_default();

        for entry in &snapshot {
            (entry.handler)(event);
        }
    }

    /// Number of handlers currently registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.registry
            .handlers
            .get(&kind)
            .map_or(0, |entries| entries.len())
    }

    /// Number of handlers across all kinds.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        EventKind::ALL.iter().map(|kind| self.count(*kind)).sum()
    }
}

/// Token returned by [`EventDispatcher::subscribe`].
///
/// Dropping the token keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription leaves the handler registered with no way to remove it"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Registry>,
}

impl Subscription {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler. Returns `false` if it was already gone.
    #[expect(
        clippy::must_use_candidate,
        reason = "Unsubscribing is usually done for its side effect only"
    )]
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.kind, self.id))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}
