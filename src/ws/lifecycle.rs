//! Retry bookkeeping driven by the connection task.
//!
//! Holds no I/O: the task reports what happened on the transport and acts on the
//! returned [`Retry`] decision.

use std::time::Duration;

use backoff::backoff::Backoff as _;

use super::config::{LinearBackoff, ReconnectConfig};

/// What to do after a failed or abnormal connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Connect again once `delay` has elapsed
    After { attempt: u32, delay: Duration },
    /// The attempt budget is spent; stay closed until an explicit reconnect
    Exhausted { max_attempts: u32 },
}

#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    backoff: LinearBackoff,
    intentionally_closed: bool,
}

impl Lifecycle {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self {
            backoff: config.into(),
            intentionally_closed: false,
        }
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    #[cfg(test)]
    pub(crate) const fn is_intentionally_closed(&self) -> bool {
        self.intentionally_closed
    }

    /// The transport opened: the full retry budget is available again.
    pub(crate) fn opened(&mut self) {
        self.backoff.reset();
        self.intentionally_closed = false;
    }

    /// The transport closed. Returns `None` when the close was requested locally.
    pub(crate) fn closed(&mut self) -> Option<Retry> {
        if self.intentionally_closed {
            None
        } else {
            Some(self.schedule())
        }
    }

    /// Count one more retry, or report exhaustion.
    pub(crate) fn schedule(&mut self) -> Retry {
        match self.backoff.next_backoff() {
            Some(delay) => Retry::After {
                attempt: self.backoff.attempts(),
                delay,
            },
            None => Retry::Exhausted {
                max_attempts: self.backoff.max_attempts(),
            },
        }
    }

    /// Mark the connection as intentionally closed. Returns `false` if it already was.
    pub(crate) fn close(&mut self) -> bool {
        !std::mem::replace(&mut self.intentionally_closed, true)
    }

    /// Start over for an explicit reconnect.
    pub(crate) fn restart(&mut self) {
        self.backoff.reset();
        self.intentionally_closed = false;
    }
}
