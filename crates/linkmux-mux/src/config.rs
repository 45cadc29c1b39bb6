use linkmux_packet::{DEFAULT_MAX_BODY, DEFAULT_POOL_CAPACITY};

use crate::error::{MuxError, Result};

/// Default largest `Data` body in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024;
/// Default largest single application write in bytes.
pub const DEFAULT_MAX_WRITE_SIZE: usize = 64 * 1024;
/// Default per-channel send and receive window in bytes.
pub const DEFAULT_WINDOW: usize = 8 * 1024;
/// Lowest protocol version this implementation speaks.
pub const DEFAULT_MIN_VERSION: i16 = 1;
/// Highest protocol version this implementation speaks.
pub const DEFAULT_MAX_VERSION: i16 = 2;

/// Session-wide multiplexer settings.
///
/// Built once when the link comes up and handed to [`crate::Mux::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct MuxConfig {
    /// Packet slots shared by every channel. Default: 256.
    pub pool_capacity: usize,
    /// Largest `Data` body; longer writes are fragmented. Default: 1 KiB.
    pub max_body_size: usize,
    /// Largest payload accepted by a single `send`. Default: 64 KiB.
    pub max_write_size: usize,
    /// Lowest protocol version accepted during negotiation. Default: 1.
    pub min_version: i16,
    /// Highest protocol version offered during negotiation. Default: 2.
    pub max_version: i16,
    /// Send window for channels registered without explicit windows. Default: 8 KiB.
    pub default_send_window: usize,
    /// Receive window for channels registered without explicit windows. Default: 8 KiB.
    pub default_receive_window: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            min_version: DEFAULT_MIN_VERSION,
            max_version: DEFAULT_MAX_VERSION,
            default_send_window: DEFAULT_WINDOW,
            default_receive_window: DEFAULT_WINDOW,
        }
    }
}

impl MuxConfig {
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_max_write_size(mut self, size: usize) -> Self {
        self.max_write_size = size;
        self
    }

    /// Set the accepted version range (inclusive).
    pub fn with_versions(mut self, min: i16, max: i16) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    pub fn with_default_windows(mut self, send: usize, receive: usize) -> Self {
        self.default_send_window = send;
        self.default_receive_window = receive;
        self
    }

    /// Check that the settings can produce a working multiplexer.
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(invalid("pool_capacity must be at least 1"));
        }
        if self.max_body_size == 0 || self.max_body_size > DEFAULT_MAX_BODY {
            return Err(invalid(format!(
                "max_body_size must be between 1 and {DEFAULT_MAX_BODY}"
            )));
        }
        if self.max_write_size == 0 || self.max_write_size > u32::MAX as usize {
            return Err(invalid("max_write_size must be between 1 and u32::MAX"));
        }
        if self.min_version < 1 || self.min_version > self.max_version {
            return Err(invalid(format!(
                "version range {}..={} is empty or below 1",
                self.min_version, self.max_version
            )));
        }
        check_window("default_send_window", self.default_send_window, self.max_body_size)?;
        check_window("default_receive_window", self.default_receive_window, 1)?;
        Ok(())
    }
}

fn check_window(name: &str, window: usize, min: usize) -> Result<()> {
    if window < min || window > u32::MAX as usize {
        return Err(invalid(format!(
            "{name} must be between {min} and u32::MAX (got {window})"
        )));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> MuxError {
    MuxError::InvalidConfig(reason.into())
}
