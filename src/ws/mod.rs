//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`endpoint`]: Resolves the address to dial from an override or the hosting page
//! - [`ConnectionManager`]: Owns the transport, reconnects with linear backoff
//! - [`EventDispatcher`]: Fans connection events out to registered handlers
//! - [`types`]: Inbound normalization and outbound envelopes
//!
//! The manager never returns errors to callers. Every failure is published as
//! an [`Event`] instead.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
mod lifecycle;
pub mod types;

pub use config::{Config, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::{Event, EventDispatcher, EventKind, Subscription};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use types::request::OutboundMessage;
pub use types::response::{CloseEvent, ErrorEvent, InboundMessage};
