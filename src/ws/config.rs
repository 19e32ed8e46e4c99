#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::env;
use std::str::FromStr;
use std::time::Duration;

use backoff::backoff::Backoff;
use bon::Builder;

use super::endpoint::{self, HostContext};
use crate::Result;
use crate::error::Error;

const DEFAULT_RECONNECT_BASE_DELAY_DURATION: Duration = Duration::from_millis(3000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_millis(30_000);
/// Linear backoff stops growing after this many base delays.
const MAX_BACKOFF_MULTIPLIER: u32 = 5;

/// Overrides the derived endpoint when set to a non-empty value.
pub const WS_URL_VAR: &str = "LEXAI_WS_URL";
pub const RECONNECT_INTERVAL_VAR: &str = "LEXAI_WS_RECONNECT_INTERVAL_MS";
pub const MAX_RECONNECT_ATTEMPTS_VAR: &str = "LEXAI_WS_MAX_RECONNECT_ATTEMPTS";
pub const HEARTBEAT_INTERVAL_VAR: &str = "LEXAI_WS_HEARTBEAT_INTERVAL_MS";

/// Configuration for the chat connection.
///
/// The endpoint is resolved once, when the client is constructed, from
/// `endpoint` and `host` (see [`endpoint::resolve`]).
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Explicit endpoint override, e.g. `wss://chat.lexai.app/ws`
    #[builder(into)]
    pub endpoint: Option<String>,
    /// Hosting page used to derive the endpoint when no override is set
    pub host: Option<HostContext>,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Interval between keepalive pings. Only used with the `heartbeats` feature.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Build a configuration from `LEXAI_WS_*` environment variables.
    ///
    /// Missing variables fall back to defaults; present but unparseable ones are
    /// reported as [`Kind::Validation`](crate::error::Kind::Validation) errors.
    pub fn from_env() -> Result<Self> {
        let endpoint = env::var(WS_URL_VAR).ok().filter(|url| !url.trim().is_empty());

        let base_delay = parse_var::<u64>(RECONNECT_INTERVAL_VAR)?
            .map_or(DEFAULT_RECONNECT_BASE_DELAY_DURATION, Duration::from_millis);
        let max_attempts =
            parse_var::<u32>(MAX_RECONNECT_ATTEMPTS_VAR)?.unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);
        let heartbeat_interval = parse_var::<u64>(HEARTBEAT_INTERVAL_VAR)?
            .map_or(DEFAULT_HEARTBEAT_INTERVAL_DURATION, Duration::from_millis);

        Ok(Self {
            endpoint,
            host: None,
            reconnect: ReconnectConfig::new(base_delay, max_attempts),
            heartbeat_interval,
        })
    }

    /// Use `host` to derive the endpoint when no override is configured.
    #[must_use]
    pub fn with_host(mut self, host: HostContext) -> Self {
        self.host = Some(host);
        self
    }

    /// The endpoint this configuration connects to.
    #[must_use]
    pub fn resolve_endpoint(&self) -> String {
        endpoint::resolve(self.endpoint.as_deref(), self.host.as_ref())
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_e| Error::invalid_env_var(name, value)),
        Err(_) => Ok(None),
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry; later retries wait a multiple of it
    pub base_delay: Duration,
    /// Consecutive failed attempts allowed before giving up
    pub max_attempts: u32,
}

impl ReconnectConfig {
    #[must_use]
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_BASE_DELAY_DURATION,
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )
    }
}

/// Linear backoff capped at five times the base delay.
///
/// The n-th consecutive retry waits `base * min(n, 5)`. Once `max_attempts`
/// retries have been handed out [`Backoff::next_backoff`] returns `None` until
/// [`Backoff::reset`] is called.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl LinearBackoff {
    #[must_use]
    pub const fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Number of retries handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay used for the given 1-based retry attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(attempt.min(MAX_BACKOFF_MULTIPLIER))
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }
}

impl From<ReconnectConfig> for LinearBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self::new(config.base_delay, config.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_contract() {
        let config = Config::default();

        assert_eq!(config.endpoint, None);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(3000));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn builder_defaults_match_default() {
        let built = Config::builder().build();
        let default = Config::default();

        assert_eq!(built.reconnect, default.reconnect);
        assert_eq!(built.heartbeat_interval, default.heartbeat_interval);
        assert_eq!(built.resolve_endpoint(), "ws://localhost:8080/ws");
    }

    #[test]
    fn builder_override_wins() {
        let config = Config::builder()
            .endpoint("wss://chat.lexai.app/ws")
            .reconnect(ReconnectConfig::new(Duration::from_millis(10), 2))
            .build();

        assert_eq!(config.resolve_endpoint(), "wss://chat.lexai.app/ws");
        assert_eq!(config.reconnect.max_attempts, 2);
    }

    #[test]
    fn backoff_sequence() {
        let mut backoff = LinearBackoff::new(Duration::from_millis(3000), 10);

        let delays: Vec<u128> = (0..8)
            .map(|_| backoff.next_backoff().unwrap().as_millis())
            .collect();

        assert_eq!(
            delays,
            vec![3000, 6000, 9000, 12000, 15000, 15000, 15000, 15000]
        );
    }

    #[test]
    fn backoff_exhausts_after_max_attempts() {
        let mut backoff = LinearBackoff::new(Duration::from_millis(1000), 3);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(2000)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(3000)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.next_backoff(), None, "exhaustion is sticky");
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn backoff_reset_restores_full_budget() {
        let mut backoff = LinearBackoff::new(Duration::from_millis(1000), 2);
        let _first = backoff.next_backoff();
        let _second = backoff.next_backoff();
        assert!(backoff.is_exhausted());

        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn zero_attempts_never_retries() {
        let mut backoff: LinearBackoff = ReconnectConfig::new(Duration::from_secs(1), 0).into();

        assert_eq!(backoff.next_backoff(), None);
    }
}
