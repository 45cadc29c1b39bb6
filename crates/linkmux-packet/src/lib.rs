//! Packet layer of linkmux.
//!
//! Every packet on the shared link carries a fixed 16-byte header:
//! - A 2-byte magic number ("HL") for stream synchronization
//! - Packet type, fragment flags and the protocol version it was formatted for
//! - A 4-byte little-endian channel id and a 4-byte little-endian body size
//!
//! Outgoing and buffered packets live in a bounded [`PacketFactory`] so that a
//! session never holds more packets than the pool was sized for.

pub mod channel;
pub mod codec;
pub mod error;
pub mod pool;
pub mod reader;
pub mod writer;

pub use channel::{DEBUG, FILE_TRANSFER, LOG, TELEMETRY, USER_CHANNEL_START};
pub use codec::{
    check_packet, decode_packet, encode_packet, split_packet, ChannelId, ConnectBody,
    ConnectResponseBody, ErrorBody, MaxDataBody, Packet, PacketConfig, PacketHeader, PacketType,
    DEFAULT_MAX_BODY, FLAG_MORE_FRAGMENTS, HEADER_SIZE,
};
pub use error::{PacketError, Result};
pub use pool::{PacketFactory, PooledPacket, DEFAULT_POOL_CAPACITY};
pub use reader::PacketReader;
pub use writer::PacketWriter;
