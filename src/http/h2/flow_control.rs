//! HTTP/2 flow control
//!
//! This module implements the byte accounting behind flow control as defined
//! in RFC 9113 Section 5.2.
//!
//! Both directions of a stream, and the connection-level receive window, are
//! tracked with the same counter pair: a running `total` of bytes moved and a
//! `maximum` that only ever grows.
//!
//! - On the write side `total` counts bytes framed and handed to the
//!   connection, and `maximum` is the credit ceiling granted by the peer.
//! - On the read side `total` counts bytes delivered to the consumer, and
//!   `maximum` trails it, marking how much of that has been acknowledged to
//!   the peer with WINDOW_UPDATE frames.

/// Delivered/maximum counter pair
///
/// Neither counter ever decreases. `advance` moves `total`, `extend` moves
/// `maximum`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteWindow {
    total: u64,
    maximum: u64,
}

impl ByteWindow {
    /// Create a window with nothing delivered yet
    pub fn new(maximum: u64) -> Self {
        ByteWindow { total: 0, maximum }
    }

    /// Bytes delivered so far
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Current ceiling
    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    /// Bytes that may still be delivered before hitting the ceiling
    pub fn available(&self) -> u64 {
        self.maximum.saturating_sub(self.total)
    }

    /// Check if the ceiling has been reached
    pub fn is_exhausted(&self) -> bool {
        self.total >= self.maximum
    }

    /// Bytes delivered beyond the ceiling
    ///
    /// On the read side this is the count of bytes consumed but not yet
    /// acknowledged to the peer.
    pub fn pending(&self) -> u64 {
        self.total.saturating_sub(self.maximum)
    }

    /// Record delivered bytes
    pub fn advance(&mut self, amount: u64) {
        self.total = self.total.saturating_add(amount);
    }

    /// Raise the ceiling (WINDOW_UPDATE credit)
    pub fn extend(&mut self, delta: u64) {
        self.maximum = self.maximum.saturating_add(delta);
    }

    /// Raise the ceiling to meet `total`, returning how much was added
    pub fn settle(&mut self) -> u64 {
        let pending = self.pending();
        self.extend(pending);
        pending
    }
}

/// Running acknowledgement state for a receive window
///
/// Wraps a [`ByteWindow`] whose ceiling marks acknowledged bytes, and decides
/// when enough consumed bytes have piled up to be worth a WINDOW_UPDATE.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveCredit {
    window: ByteWindow,
    threshold: u64,
}

impl ReceiveCredit {
    /// Acknowledge once `window_size / divisor` bytes are unacknowledged
    pub fn new(window_size: u64, divisor: u32) -> Self {
        ReceiveCredit {
            window: ByteWindow::new(0),
            threshold: (window_size / u64::from(divisor.max(1))).max(1),
        }
    }

    pub fn window(&self) -> &ByteWindow {
        &self.window
    }

    /// Bytes consumed but not yet acknowledged
    pub fn unacknowledged(&self) -> u64 {
        self.window.pending()
    }

    /// Record consumed bytes
    pub fn consume(&mut self, amount: u64) {
        self.window.advance(amount);
    }

    /// Take the increment for a WINDOW_UPDATE if the threshold was reached
    pub fn take_update(&mut self) -> Option<u64> {
        if self.window.pending() >= self.threshold {
            Some(self.window.settle())
        } else {
            None
        }
    }
}
