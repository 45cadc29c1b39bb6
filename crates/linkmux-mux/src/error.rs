use std::fmt;

use linkmux_packet::{ChannelId, PacketError, PooledPacket};
use linkmux_transport::TransportError;

use crate::channel::ChannelState;

/// Buffer bookkeeping errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
    /// The version can only change while the buffer is empty.
    #[error("cannot change version with {buffered} packets buffered")]
    VersionLocked { buffered: usize },
}

/// An enqueue refused because the packet would overflow the window.
///
/// The packet is handed back so the caller keeps ownership and can retry.
#[derive(thiserror::Error)]
#[error("enqueue would exceed window ({body_size} bytes, {remaining} remaining)")]
pub struct Rejected {
    pub packet: PooledPacket,
    pub body_size: usize,
    pub remaining: usize,
}

impl Rejected {
    pub fn into_packet(self) -> PooledPacket {
        self.packet
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("body_size", &self.body_size)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// Errors returned to applications by [`crate::Channel`] operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The send window, the staged remainder or the packet pool is full.
    /// Retry after the mux has drained.
    #[error("channel would block")]
    WouldBlock,

    /// The channel is not connected.
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),

    /// The channel hit a protocol error and must be reset.
    #[error("channel {0} is faulted")]
    Faulted(ChannelId),

    /// The operation is not legal in the channel's current state.
    #[error("cannot {operation} channel {channel} while {state}")]
    InvalidState {
        channel: ChannelId,
        state: ChannelState,
        operation: &'static str,
    },

    /// A single write exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors raised by the multiplexer itself.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MuxError {
    #[error("channel {0} is already registered")]
    DuplicateChannel(ChannelId),

    #[error("channel {0} is not registered")]
    UnknownChannel(ChannelId),

    #[error("invalid window for channel {channel}: {reason}")]
    InvalidWindow {
        channel: ChannelId,
        reason: &'static str,
    },

    #[error("invalid mux configuration: {0}")]
    InvalidConfig(String),

    /// The packet pool is exhausted; retry the same inbound packet later.
    #[error("packet pool exhausted")]
    Busy,
}

/// Session-fatal errors. The mux has already been reset when these surface.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("undecodable packet: {0}")]
    Packet(#[from] PacketError),

    #[error("mux error: {0}")]
    Mux(#[from] MuxError),
}

pub type Result<T> = std::result::Result<T, MuxError>;
