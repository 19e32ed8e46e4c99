#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! Chat client for the LexAI assistant backend.
//!
//! [`Client`] keeps a single WebSocket connection to the backend alive,
//! reconnecting after abnormal closes, and fans inbound messages out to
//! handlers. [`ChatBinding`] turns those events into watchable values for a
//! presentation layer.
//!
//! # Example
//!
//! ```rust, no_run
//! use futures::StreamExt as _;
//! use lexai_realtime::chat::Client;
//!
//! #[tokio::main]
//! async fn main() -> lexai_realtime::Result<()> {
//!     let client = Client::from_env()?;
//!     let messages = client.messages();
//!     let mut messages = Box::pin(messages);
//!
//!     while let Some(message) = messages.next().await {
//!         println!("{}", message?.display_text());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod binding;
pub mod client;

pub use binding::{ChatBinding, ReceivedMessage};
pub use client::Client;
