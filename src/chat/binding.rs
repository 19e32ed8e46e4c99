//! Observable view of the chat connection for a presentation layer.
//!
//! A [`ChatBinding`] registers one handler per event category when mounted and
//! removes all of them when unmounted or dropped, so mounting and unmounting
//! repeatedly never accumulates handlers.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::watch;

use super::client::Client;
use crate::ws::connection::ConnectionState;
use crate::ws::dispatch::{Event, EventKind, Subscription};
use crate::ws::types::response::InboundMessage;

/// Field added to [`ReceivedMessage::to_value`].
pub const TIMESTAMP_FIELD: &str = "_timestamp";

/// The most recent inbound message, stamped on receipt.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message: InboundMessage,
    /// Milliseconds since the Unix epoch. Strictly increasing per binding, so
    /// two identical messages never compare equal.
    pub received_at: i64,
}

impl ReceivedMessage {
    /// Normalized payload with the receipt time under `_timestamp`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.message
            .annotated(TIMESTAMP_FIELD, json!(self.received_at))
    }
}

/// Hands out strictly increasing millisecond timestamps.
#[derive(Debug, Default)]
struct ReceiptClock {
    last: AtomicI64,
}

impl ReceiptClock {
    fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
    }
}

/// Connection status and latest message exposed as watchable values.
#[derive(Debug)]
pub struct ChatBinding {
    client: Client,
    connected: watch::Receiver<bool>,
    state: watch::Receiver<ConnectionState>,
    last_message: watch::Receiver<Option<ReceivedMessage>>,
    subscriptions: Vec<Subscription>,
}

impl ChatBinding {
    /// Subscribe to all four event categories of `client`.
    #[must_use]
    pub fn mount(client: &Client) -> Self {
        let (connected_tx, connected) = watch::channel(client.is_ready());
        let (state_tx, state) = watch::channel(client.state());
        let (message_tx, last_message) = watch::channel(None);
        let clock = ReceiptClock::default();

        let mut subscriptions = Vec::with_capacity(EventKind::ALL.len());

        let (open_connected, open_state) = (connected_tx.clone(), state_tx.clone());
        let current = client.state_receiver();
        subscriptions.push(client.subscribe(EventKind::Open, move |_event| {
            open_connected.send_replace(true);
            open_state.send_replace(*current.borrow());
        }));

        let current = client.state_receiver();
        subscriptions.push(client.subscribe(EventKind::Close, move |_event| {
            connected_tx.send_replace(false);
            state_tx.send_replace(*current.borrow());
        }));

        subscriptions.push(client.subscribe(EventKind::Message, move |event| {
            if let Event::Message(message) = event {
                message_tx.send_replace(Some(ReceivedMessage {
                    message: message.clone(),
                    received_at: clock.next(),
                }));
            }
        }));

        subscriptions.push(client.subscribe(EventKind::Error, log_error));

        Self {
            client: client.clone(),
            connected,
            state,
            last_message,
            subscriptions,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// State as of the last open or close event.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn last_message(&self) -> Option<ReceivedMessage> {
        self.last_message.borrow().clone()
    }

    #[must_use]
    pub fn connected_receiver(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn last_message_receiver(&self) -> watch::Receiver<Option<ReceivedMessage>> {
        self.last_message.clone()
    }

    pub fn send_message(&self, text: &str) -> bool {
        self.client.send_message(text)
    }

    pub fn reconnect(&self) {
        self.client.reconnect();
    }

    /// Remove every handler registered by [`ChatBinding::mount`].
    pub fn unmount(mut self) {
        self.release();
    }

    fn release(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            _ = subscription.unsubscribe();
        }
    }
}

#[cfg(feature = "tracing")]
fn log_error(event: &Event) {
    if let Event::Errored(error) = event {
        tracing::error!(%error, "Chat connection error");
    }
}

#[cfg(not(feature = "tracing"))]
fn log_error(_event: &Event) {}

impl Drop for ChatBinding {
    fn drop(&mut self) {
        self.release();
    }
}
