//! Per-direction deadlines for blocking stream operations
//!
//! A [`DeadlineGuard`] lives inside the locked stream state, one for reads and
//! one for writes, and only holds the configured timeout. Every blocking
//! operation calls `enter` to get its own [`Deadline`], waits on the stream
//! condition with [`Deadline::expires_at`] as the wake-up bound, and checks
//! `is_expired` after every wake-up. Concurrent waiters on the same direction
//! never share or clear each other's deadline.
//!
//! Neither type touches the connection. When a deadline passes, the caller
//! releases the stream lock and then turns the expiry into a local cancel of
//! the stream plus a degraded-liveness hint to the connection.

use std::time::{Duration, Instant};

/// Timeout configuration for one direction of a stream
#[derive(Debug, Clone, Default)]
pub struct DeadlineGuard {
    timeout: Option<Duration>,
}

impl DeadlineGuard {
    /// Create a guard; `None` waits forever
    pub fn new(timeout: Option<Duration>) -> Self {
        DeadlineGuard { timeout }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Change the timeout used by the next `enter`
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Start timing one blocking operation
    pub fn enter(&self) -> Deadline {
        Deadline {
            expires_at: self.timeout.map(|t| Instant::now() + t),
        }
    }
}

/// Expiry instant of a single blocking operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never passes
    pub fn unbounded() -> Self {
        Deadline { expires_at: None }
    }

    /// Instant at which a waiter must wake up, if bounded
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }
}
