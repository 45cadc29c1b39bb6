use crate::codec::PacketType;

/// Errors that can occur while encoding, decoding or allocating packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x484C \"HL\")")]
    InvalidMagic,

    /// The packet type code is not one this implementation understands.
    #[error("unknown packet type code {0}")]
    UnknownPacketType(u8),

    /// Reserved flag bits were set.
    #[error("unsupported packet flags 0x{0:02x}")]
    InvalidFlags(u8),

    /// The body exceeds the configured maximum size.
    #[error("packet body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// Fewer bytes than the header requires.
    #[error("packet truncated (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// The buffer holds more or fewer bytes than the header declares.
    #[error("packet length mismatch (declared {declared} bytes, got {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// A control packet body could not be parsed.
    #[error("malformed {packet_type} body ({len} bytes)")]
    MalformedBody { packet_type: PacketType, len: usize },

    /// Every slot of the packet pool is in use.
    #[error("packet pool exhausted ({capacity} slots in use)")]
    PoolExhausted { capacity: usize },

    /// An I/O error occurred while reading or writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, PacketError>;
