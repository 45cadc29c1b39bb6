//! Well-known channel ids.
//!
//! Channels 0-255 are reserved for runtime services.
//! Channels 256 and above are available for application-defined use.

use crate::codec::ChannelId;

/// Host file system access.
pub const FILE_TRANSFER: ChannelId = 1;

/// Target log forwarding.
pub const LOG: ChannelId = 2;

/// Debug commands.
pub const DEBUG: ChannelId = 3;

/// Metrics and health signals.
pub const TELEMETRY: ChannelId = 4;

/// First user-defined channel id.
pub const USER_CHANNEL_START: ChannelId = 256;

/// Returns a human-readable name for a channel id.
pub fn channel_name(id: ChannelId) -> &'static str {
    match id {
        FILE_TRANSFER => "FILE_TRANSFER",
        LOG => "LOG",
        DEBUG => "DEBUG",
        TELEMETRY => "TELEMETRY",
        0 | 5..=255 => "RESERVED",
        _ => "USER",
    }
}

/// Returns true if the channel id is in the reserved range.
pub fn is_reserved(id: ChannelId) -> bool {
    id < USER_CHANNEL_START
}

/// Returns true if the channel id names a built-in service.
pub fn is_builtin(id: ChannelId) -> bool {
    (FILE_TRANSFER..=TELEMETRY).contains(&id)
}
