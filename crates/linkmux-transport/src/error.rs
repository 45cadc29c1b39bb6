use linkmux_packet::PacketError;

/// Errors reported by a packet driver.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the underlying link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link delivered bytes that do not form a valid packet.
    #[error("transport framing error: {0}")]
    Packet(#[source] PacketError),

    /// The remote end went away.
    #[error("link disconnected")]
    Disconnected,

    /// The driver has been closed locally.
    #[error("transport shut down")]
    Shutdown,
}

impl From<PacketError> for TransportError {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::ConnectionClosed => Self::Disconnected,
            PacketError::Io(io) => Self::Io(io),
            other => Self::Packet(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
