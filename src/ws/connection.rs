#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::config::Config;
use super::dispatch::{Event, EventDispatcher};
use super::error::WsError;
use super::lifecycle::{Lifecycle, Retry};
use super::types::request::OutboundMessage;
use super::types::response::{CloseEvent, ErrorEvent, InboundMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Close reason used when the client is being dropped.
const DROPPED_REASON: &str = "Client dropped";
/// Close reason used by [`ConnectionManager::reconnect`].
pub const RECONNECT_REASON: &str = "Reconnecting";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in flight
    Connecting,
    /// Connected and ready to send
    Open,
    /// A local close is in progress
    Closing,
    /// No transport: closed, waiting to retry, or given up
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently usable.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
enum Command {
    Send(String),
    Close(CloseEvent),
    Reconnect,
}

/// Manages the WebSocket connection lifecycle and reconnection.
///
/// Construction spawns a background task which owns the transport, the retry
/// counter and the timers. Transport events, timer expiries and commands from
/// this handle are processed one at a time by that task, and every event is
/// published on the [`EventDispatcher`] from it, in the order the transport
/// delivered them.
///
/// Abnormal closes are retried with linear backoff (see
/// [`LinearBackoff`](super::config::LinearBackoff)) until the attempt budget is
/// spent, after which the connection stays [`ConnectionState::Closed`] until
/// [`ConnectionManager::reconnect`] is called. Nothing here returns an error:
/// failures surface only as [`Event::Errored`] and [`Event::Closed`].
///
/// The task exits once every clone of the manager has been dropped.
///
/// # Panics
///
/// [`ConnectionManager::new`] must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    endpoint: Arc<str>,
    /// Command channel into the connection task
    commands: mpsc::UnboundedSender<Command>,
    /// Watch channel sender for state changes, also used to mark local closes
    state_tx: watch::Sender<ConnectionState>,
    /// Watch channel receiver for state changes (for use in checking the current state)
    state_rx: watch::Receiver<ConnectionState>,
    /// Retry counter mirror, written only by the connection task
    attempts: Arc<AtomicU32>,
    dispatcher: EventDispatcher,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a new connection manager and start connecting immediately.
    #[must_use]
    pub fn new(endpoint: String, config: &Config, dispatcher: EventDispatcher) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let attempts = Arc::new(AtomicU32::new(0));

        let task = ConnectionTask {
            endpoint: endpoint.clone(),
            commands: command_rx,
            state_tx: state_tx.clone(),
            attempts: Arc::clone(&attempts),
            dispatcher: dispatcher.clone(),
            lifecycle: Lifecycle::new(config.reconnect),
            heartbeat_interval: config.heartbeat_interval,
        };
        tokio::spawn(task.run());

        Self {
            endpoint: endpoint.into(),
            commands,
            state_tx,
            state_rx,
            attempts,
            dispatcher,
        }
    }

    /// The endpoint resolved at construction.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// `true` iff the connection is exactly [`ConnectionState::Open`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_open()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Consecutive reconnection attempts since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Hand an already encoded frame to the connection task.
    ///
    /// Returns `false` if the task is gone. Frames reaching the task while the
    /// connection is not open are dropped, never buffered.
    pub(crate) fn write(&self, text: String) -> bool {
        self.commands.send(Command::Send(text)).is_ok()
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Cancels any pending retry and heartbeat. Calling it again, or while
    /// already closed, does nothing.
    pub fn close(&self, code: u16, reason: &str) {
        self.state_tx.send_if_modified(|state| {
            if matches!(state, ConnectionState::Open | ConnectionState::Connecting) {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });

        // A closed channel means the task is gone and there is nothing to close.
        _ = self.commands.send(Command::Close(CloseEvent::new(code, reason)));
    }

    /// Close the current connection, if any, and connect again with a fresh
    /// retry budget.
    pub fn reconnect(&self) {
        _ = self.commands.send(Command::Reconnect);
    }
}

/// What the connection task does next.
#[derive(Debug)]
enum Step {
    Connect,
    Wait(Duration),
    Idle,
    Shutdown,
}

struct ConnectionTask {
    endpoint: String,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Arc<AtomicU32>,
    dispatcher: EventDispatcher,
    lifecycle: Lifecycle,
    heartbeat_interval: Duration,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut step = Step::Connect;

        loop {
            step = match step {
                Step::Connect => self.connect().await,
                Step::Wait(delay) => self.wait(delay).await,
                Step::Idle => self.idle().await,
                Step::Shutdown => break,
            };
        }

        self.set_state(ConnectionState::Closed);
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "Connection task stopped");
    }

    async fn connect(&mut self) -> Step {
        self.set_state(ConnectionState::Connecting);
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, "Connecting");

        let connecting = connect_async(self.endpoint.clone());
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok((stream, _response)) => self.serve(stream).await,
                        Err(e) => self.connect_failed(WsError::from(e)),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.discard(&text),
                    Some(Command::Close(event)) => {
                        self.abandon_attempt(event);
                        return Step::Idle;
                    }
                    Some(Command::Reconnect) => {
                        self.abandon_attempt(CloseEvent::new(CloseEvent::NORMAL, RECONNECT_REASON));
                        self.restart();
                        return Step::Connect;
                    }
                    None => return Step::Shutdown,
                }
            }
        }
    }

    /// A local close arrived while the handshake was still in flight.
    fn abandon_attempt(&mut self, event: CloseEvent) {
        let _newly_closed: bool = self.lifecycle.close();
        self.set_state(ConnectionState::Closed);
        self.dispatcher.publish(&Event::Closed(event));
    }

    fn connect_failed(&mut self, error: WsError) -> Step {
        #[cfg(feature = "tracing")]
        tracing::warn!(endpoint = %self.endpoint, %error, "Connection failed");

        let detail = error.to_string();
        self.dispatcher
            .publish(&Event::Errored(ErrorEvent::new(detail.clone())));
        self.set_state(ConnectionState::Closed);

        // An endpoint that cannot be dialed never produced a transport to close.
        if !matches!(error, WsError::InvalidEndpoint(_)) {
            self.dispatcher
                .publish(&Event::Closed(CloseEvent::abnormal(detail)));
        }

        let decision = self.lifecycle.schedule();
        self.follow(decision)
    }

    async fn serve(&mut self, stream: WsStream) -> Step {
        let (mut write, mut read) = stream.split();

        if *self.state_tx.borrow() == ConnectionState::Closing {
            return self.close_before_open(&mut write).await;
        }

        let mut heartbeat = Heartbeat::new(self.heartbeat_interval);

        self.lifecycle.opened();
        self.sync_attempts();
        self.set_state(ConnectionState::Open);
        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "Connected");
        self.dispatcher.publish(&Event::Opened);

        let closed = loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        let message = InboundMessage::from_text(text.as_str());
                        self.dispatcher.publish(&Event::Message(message));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let message = InboundMessage::from_binary(&bytes);
                        self.dispatcher.publish(&Event::Message(message));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let event = CloseEvent::from(frame);
                        // Flushes the close reply tungstenite queued while reading the frame.
                        if let Err(e) = write.close().await {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(error = %e, "Close reply could not be sent");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                        break event;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong frames are answered by tungstenite itself.
                    }
                    Some(Err(e)) => {
                        let error = WsError::from(e);
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%error, "WebSocket transport error");
                        self.dispatcher
                            .publish(&Event::Errored(ErrorEvent::new(error.to_string())));
                        break CloseEvent::abnormal(error.to_string());
                    }
                    None => break CloseEvent::abnormal(WsError::ConnectionClosed.to_string()),
                },

                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            // The read half reports the broken transport next.
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %e, "Failed to write WebSocket message");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                        }
                    }
                    Some(Command::Close(event)) => {
                        self.close_transport(&mut write, event).await;
                        return Step::Idle;
                    }
                    Some(Command::Reconnect) => {
                        let event = CloseEvent::new(CloseEvent::NORMAL, RECONNECT_REASON);
                        self.close_transport(&mut write, event).await;
                        self.restart();
                        return Step::Connect;
                    }
                    None => {
                        let event = CloseEvent::new(CloseEvent::NORMAL, DROPPED_REASON);
                        self.close_transport(&mut write, event).await;
                        return Step::Shutdown;
                    }
                },

                () = heartbeat.tick() => {
                    if let Ok(ping) = serde_json::to_string(&OutboundMessage::Ping) {
                        _ = write.send(Message::Text(ping.into())).await;
                    }
                }
            }
        };

        self.set_state(ConnectionState::Closed);
        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, %closed, "Connection closed");
        self.dispatcher.publish(&Event::Closed(closed));

        match self.lifecycle.closed() {
            Some(decision) => self.follow(decision),
            None => Step::Idle,
        }
    }

    /// `close()` was called while the handshake was completing: the transport
    /// is torn down without ever reporting it open.
    async fn close_before_open(&mut self, write: &mut WsSink) -> Step {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(text)) => self.discard(&text),
                Some(Command::Close(event)) => {
                    self.close_transport(write, event).await;
                    return Step::Idle;
                }
                Some(Command::Reconnect) => {
                    let event = CloseEvent::new(CloseEvent::NORMAL, RECONNECT_REASON);
                    self.close_transport(write, event).await;
                    self.restart();
                    return Step::Connect;
                }
                None => {
                    let event = CloseEvent::new(CloseEvent::NORMAL, DROPPED_REASON);
                    self.close_transport(write, event).await;
                    return Step::Shutdown;
                }
            }
        }
    }

    /// Locally initiated close of an open transport.
    async fn close_transport(&mut self, write: &mut WsSink, event: CloseEvent) {
        let _newly_closed: bool = self.lifecycle.close();
        self.set_state(ConnectionState::Closing);
        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, %event, "Closing connection");

        let frame = CloseFrame {
            code: CloseCode::from(event.code),
            reason: event.reason.clone().into(),
        };
        if let Err(e) = write.send(Message::Close(Some(frame))).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Close frame could not be sent");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }

        self.set_state(ConnectionState::Closed);
        self.dispatcher.publish(&Event::Closed(event));
    }

    async fn wait(&mut self, delay: Duration) -> Step {
        self.set_state(ConnectionState::Closed);
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return Step::Connect,
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.discard(&text),
                    Some(Command::Close(_)) => {
                        let _newly_closed: bool = self.lifecycle.close();
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Pending reconnect cancelled");
                        return Step::Idle;
                    }
                    Some(Command::Reconnect) => {
                        self.restart();
                        return Step::Connect;
                    }
                    None => return Step::Shutdown,
                }
            }
        }
    }

    async fn idle(&mut self) -> Step {
        self.set_state(ConnectionState::Closed);

        loop {
            match self.commands.recv().await {
                Some(Command::Send(text)) => self.discard(&text),
                Some(Command::Close(_)) => {
                    let _newly_closed: bool = self.lifecycle.close();
                }
                Some(Command::Reconnect) => {
                    self.restart();
                    return Step::Connect;
                }
                None => return Step::Shutdown,
            }
        }
    }

    fn follow(&mut self, decision: Retry) -> Step {
        self.sync_attempts();

        match decision {
            Retry::After { attempt, delay } => {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    ?delay,
                    attempt,
                    endpoint = %self.endpoint,
                    "Reconnecting after delay"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = attempt;
                Step::Wait(delay)
            }
            Retry::Exhausted { max_attempts } => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    max_attempts,
                    endpoint = %self.endpoint,
                    "Max reconnection attempts reached, giving up"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = max_attempts;
                Step::Idle
            }
        }
    }

    fn restart(&mut self) {
        self.lifecycle.restart();
        self.sync_attempts();
    }

    fn discard(&self, text: &str) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            state = %*self.state_tx.borrow(),
            len = text.len(),
            "Dropping outbound message, connection not open"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (self, text);
    }

    fn sync_attempts(&self) {
        self.attempts
            .store(self.lifecycle.attempts(), Ordering::Relaxed);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Keepalive timer. Never fires unless the `heartbeats` feature is enabled.
struct Heartbeat {
    interval: Option<Interval>,
}

impl Heartbeat {
    #[cfg(feature = "heartbeats")]
    fn new(period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        Self {
            interval: Some(tokio::time::interval_at(start, period)),
        }
    }

    #[cfg(not(feature = "heartbeats"))]
    fn new(period: Duration) -> Self {
        let _ = period;
        Self { interval: None }
    }

    async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::net::TcpListener;

    use super::*;
    use crate::ws::config::ReconnectConfig;
    use crate::ws::dispatch::EventKind;

    fn recorded(dispatcher: &EventDispatcher) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = Arc::clone(&events);
            let _sub = dispatcher.subscribe(kind, move |event| {
                events.lock().unwrap().push(event.clone());
            });
        }
        events
    }

    #[tokio::test]
    async fn close_during_handshake_never_reports_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        let (stream, _response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        let dispatcher = EventDispatcher::new();
        let events = recorded(&dispatcher);
        let (commands, command_rx) = mpsc::unbounded_channel();
        // The handle marks the state before queuing the command.
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closing);
        commands
            .send(Command::Close(CloseEvent::new(4000, "logout")))
            .unwrap();

        let mut task = ConnectionTask {
            endpoint: format!("ws://{addr}/ws"),
            commands: command_rx,
            state_tx,
            attempts: Arc::new(AtomicU32::new(0)),
            dispatcher,
            lifecycle: Lifecycle::new(ReconnectConfig::default()),
            heartbeat_interval: Duration::from_secs(30),
        };

        let step = task.serve(stream).await;

        assert!(matches!(step, Step::Idle), "got {step:?}");
        assert_eq!(*state_rx.borrow(), ConnectionState::Closed);
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::Closed(CloseEvent::new(4000, "logout"))]
        );
        server.abort();
    }

    #[test]
    fn state_strings() {
        assert_eq!(ConnectionState::Connecting.to_string(), "CONNECTING");
        assert_eq!(ConnectionState::Open.as_str(), "OPEN");
        assert_eq!(ConnectionState::Closing.as_str(), "CLOSING");
        assert_eq!(ConnectionState::Closed.as_str(), "CLOSED");
    }

    #[test]
    fn only_open_is_ready() {
        assert!(ConnectionState::Open.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(!ConnectionState::Closing.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }

    #[tokio::test]
    async fn invalid_endpoint_retries_without_close_event() {
        let dispatcher = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = dispatcher.subscribe(EventKind::Error, move |event| {
            _ = tx.send(event.clone());
        });
        let closes = Arc::new(AtomicU32::new(0));
        let closes_clone = Arc::clone(&closes);
        let _close = dispatcher.subscribe(EventKind::Close, move |_| {
            closes_clone.fetch_add(1, Ordering::Relaxed);
        });

        let config = Config::builder()
            .reconnect(ReconnectConfig::new(
                Duration::from_secs(60),
                3,
            ))
            .build();
        let manager = ConnectionManager::new("not a url".to_owned(), &config, dispatcher);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::Errored(_)));

        let mut state = manager.state_receiver();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Closed),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(manager.reconnect_attempts(), 1);
        assert_eq!(closes.load(Ordering::Relaxed), 0);
        assert!(!manager.is_ready());
    }
}
