//! Stream tuning parameters
//!
//! These are local knobs, not values negotiated with the peer: how long
//! blocking reads and writes may wait, how many buffered bytes trigger an
//! eager DATA frame, and how eagerly consumed bytes are acknowledged.

use super::error::{Error, Result};
use super::{EMIT_BUFFER_SIZE, MAX_FRAME_SIZE_LIMIT};
use std::time::Duration;

/// Default fraction of the local window (1/2) consumed before a WINDOW_UPDATE
pub const DEFAULT_WINDOW_UPDATE_DIVISOR: u32 = 2;

/// Per-stream settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Read timeout (default: none)
    pub read_timeout: Option<Duration>,

    /// Write timeout (default: none)
    pub write_timeout: Option<Duration>,

    /// Buffered bytes that trigger an eager DATA frame (default: 16384)
    pub emit_buffer_size: usize,

    /// Acknowledge consumed bytes once they reach `window / divisor`
    /// (default: 2)
    pub window_update_divisor: u32,
}

impl StreamSettings {
    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if self.emit_buffer_size == 0 || self.emit_buffer_size > MAX_FRAME_SIZE_LIMIT as usize {
            return Err(Error::InvalidSettings(format!(
                "Emit buffer size {} outside valid range (1-{})",
                self.emit_buffer_size, MAX_FRAME_SIZE_LIMIT
            )));
        }

        if self.window_update_divisor == 0 {
            return Err(Error::InvalidSettings(
                "Window update divisor must be non-zero".to_string(),
            ));
        }

        if self.read_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidSettings(
                "Read timeout must be non-zero".to_string(),
            ));
        }
        if self.write_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidSettings(
                "Write timeout must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            read_timeout: None,
            write_timeout: None,
            emit_buffer_size: EMIT_BUFFER_SIZE,
            window_update_divisor: DEFAULT_WINDOW_UPDATE_DIVISOR,
        }
    }
}

/// Builder for stream settings
pub struct StreamSettingsBuilder {
    settings: StreamSettings,
}

impl StreamSettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        StreamSettingsBuilder {
            settings: StreamSettings::default(),
        }
    }

    /// Set read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.settings.read_timeout = Some(timeout);
        self
    }

    /// Set write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.settings.write_timeout = Some(timeout);
        self
    }

    /// Set the eager emission threshold
    pub fn emit_buffer_size(mut self, size: usize) -> Self {
        self.settings.emit_buffer_size = size;
        self
    }

    /// Set the window update divisor
    pub fn window_update_divisor(mut self, divisor: u32) -> Self {
        self.settings.window_update_divisor = divisor;
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<StreamSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

impl Default for StreamSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
