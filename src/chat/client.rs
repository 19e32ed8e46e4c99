use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::Result;
use crate::ws::config::Config;
use crate::ws::connection::{ConnectionManager, ConnectionState};
use crate::ws::dispatch::{Event, EventDispatcher, EventKind, Subscription};
use crate::ws::error::WsError;
use crate::ws::types::request::OutboundMessage;
use crate::ws::types::response::{CloseEvent, ErrorEvent, InboundMessage};

/// Messages buffered per [`Client::messages`] stream before it starts lagging.
const MESSAGE_STREAM_CAPACITY: usize = 1024;

/// Close reason used by [`Client::close`].
pub const CLIENT_CLOSE_REASON: &str = "Client closed connection";

/// LexAI chat connection client.
///
/// One long-lived instance is meant to be created by the application and
/// shared by cloning; clones refer to the same connection and handler registry.
/// Creating the client starts connecting right away, and the connection is
/// kept alive (and re-established after abnormal closes) until [`Client::close`]
/// is called or every clone has been dropped.
///
/// # Examples
///
/// ```rust, no_run
/// use lexai_realtime::chat::Client;
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::default();
///
///     let _subscription = client.on_message(|message| {
///         println!("{}", message.display_text());
///     });
///
///     if !client.send_message("Kira sözleşmesini nasıl feshederim?") {
///         eprintln!("not connected yet");
///     }
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    /// Configuration the client was created with
    config: Config,
    /// Connection manager for the WebSocket
    connection: ConnectionManager,
    /// Handler registry shared with the connection task
    dispatcher: EventDispatcher,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Client {
    /// Create a client and start connecting to the endpoint resolved from `config`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let endpoint = config.resolve_endpoint();
        let dispatcher = EventDispatcher::new();
        let connection = ConnectionManager::new(endpoint, &config, dispatcher.clone());

        Self {
            inner: Arc::new(ClientInner {
                config,
                connection,
                dispatcher,
            }),
        }
    }

    /// Create a client configured from `LEXAI_WS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The endpoint resolved at construction.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.inner.connection.endpoint()
    }

    #[cfg(test)]
    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Serialize `payload` as JSON and send it.
    ///
    /// Returns `false`, without queuing anything, unless the connection is
    /// [`ConnectionState::Open`]. Serialization failures also yield `false`.
    pub fn send<P: Serialize + ?Sized>(&self, payload: &P) -> bool {
        if !self.is_ready() {
            self.warn_not_ready();
            return false;
        }

        match serde_json::to_string(payload) {
            Ok(text) => self.inner.connection.write(text),
            Err(e) => {
                let error = WsError::Serialize(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "Failed to send message");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                false
            }
        }
    }

    /// Send a text frame as-is. Same readiness rules as [`Client::send`].
    pub fn send_text(&self, text: &str) -> bool {
        if !self.is_ready() {
            self.warn_not_ready();
            return false;
        }

        self.inner.connection.write(text.to_owned())
    }

    /// Send a chat message as `{"type": "message", "content": text}`.
    pub fn send_message<S: Into<String>>(&self, text: S) -> bool {
        self.send(&OutboundMessage::message(text))
    }

    fn warn_not_ready(&self) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            state = %self.state(),
            "WebSocket is not connected, message not sent"
        );
    }

    /// Register a handler for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, handler)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Message, move |event| {
            if let Event::Message(message) = event {
                handler(message);
            }
        })
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Error, move |event| {
            if let Event::Errored(error) = event {
                handler(error);
            }
        })
    }

    pub fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Open, move |_event| handler())
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Close, move |event| {
            if let Event::Closed(close) = event {
                handler(close);
            }
        })
    }

    /// Stream of inbound messages received from now on.
    ///
    /// Each stream buffers up to 1024 messages. A stream that falls further
    /// behind ends with a [`WsError::Lagged`] item; call `messages()` again to
    /// resume. The underlying handler is removed when the stream is dropped,
    /// and the stream ends once the client and all of its clones are gone.
    pub fn messages(&self) -> impl Stream<Item = Result<InboundMessage>> + use<> {
        let (tx, mut rx) = broadcast::channel(MESSAGE_STREAM_CAPACITY);
        let subscription = self.on_message(move |message| {
            _ = tx.send(message.clone());
        });
        let guard = Unsubscribe(Some(subscription));

        try_stream! {
            let _guard = guard;
            loop {
                match rx.recv().await {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Message stream lagged, missed {count} messages");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// `true` iff the connection is currently open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.connection.is_ready()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    /// Consecutive reconnection attempts since the connection was last open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.connection.reconnect_attempts()
    }

    /// Close with code 1000 and stop reconnecting.
    pub fn close(&self) {
        self.close_with(CloseEvent::NORMAL, CLIENT_CLOSE_REASON);
    }

    /// Close with a custom code and reason and stop reconnecting.
    pub fn close_with(&self, code: u16, reason: &str) {
        self.inner.connection.close(code, reason);
    }

    /// Drop the current connection (closing with 1000 `"Reconnecting"`) and
    /// connect again with a fresh retry budget.
    pub fn reconnect(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint(), "Manual reconnect requested");
        self.inner.connection.reconnect();
    }
}

/// Removes a subscription when dropped.
struct Unsubscribe(Option<Subscription>);

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(subscription) = self.0.take() {
            _ = subscription.unsubscribe();
        }
    }
}
