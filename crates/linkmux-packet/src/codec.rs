use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PacketError, Result};

/// Identifies one logical channel on the link.
pub type ChannelId = u32;

/// Header: magic (2) + type (1) + flags (1) + version (2) + reserved (2)
/// + channel (4) + body size (4) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Magic bytes: "HL" (0x48 0x4C).
pub const MAGIC: [u8; 2] = [0x48, 0x4C];

/// Set on every `Data` fragment of a write except the last one.
pub const FLAG_MORE_FRAGMENTS: u8 = 0x01;

const KNOWN_FLAGS: u8 = FLAG_MORE_FRAGMENTS;

/// Default maximum body size accepted off the wire: 64 KiB.
pub const DEFAULT_MAX_BODY: usize = 64 * 1024;

/// Packet kinds exchanged by the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Opaque application payload.
    Data = 0,
    /// Channel open request carrying the proposer's versions and window.
    Connect = 1,
    /// Channel open acceptance carrying the negotiated version.
    ConnectResponse = 2,
    /// Channel close.
    Disconnect = 3,
    /// Receive credit advertisement.
    MaxData = 4,
    /// Channel-level protocol failure notification.
    Error = 5,
}

impl PacketType {
    /// Parse a wire code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Data),
            1 => Ok(Self::Connect),
            2 => Ok(Self::ConnectResponse),
            3 => Ok(Self::Disconnect),
            4 => Ok(Self::MaxData),
            5 => Ok(Self::Error),
            other => Err(PacketError::UnknownPacketType(other)),
        }
    }

    /// The wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "Data",
            Self::Connect => "Connect",
            Self::ConnectResponse => "ConnectResponse",
            Self::Disconnect => "Disconnect",
            Self::MaxData => "MaxData",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub version: i16,
    pub channel_id: ChannelId,
    pub body_size: u32,
}

impl PacketHeader {
    /// Parse the header at the front of `src`.
    ///
    /// Only the header is validated; the body may not have arrived yet.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                needed: HEADER_SIZE,
                available: src.len(),
            });
        }
        if src[0..2] != MAGIC {
            return Err(PacketError::InvalidMagic);
        }

        let mut cursor = &src[2..HEADER_SIZE];
        let packet_type = PacketType::from_code(cursor.get_u8())?;
        let flags = cursor.get_u8();
        if flags & !KNOWN_FLAGS != 0 {
            return Err(PacketError::InvalidFlags(flags));
        }
        let version = cursor.get_i16_le();
        let _reserved = cursor.get_u16_le();
        let channel_id = cursor.get_u32_le();
        let body_size = cursor.get_u32_le();

        Ok(Self {
            packet_type,
            flags,
            version,
            channel_id,
            body_size,
        })
    }

    /// Append the wire form of this header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&MAGIC);
        dst.put_u8(self.packet_type.code());
        dst.put_u8(self.flags);
        dst.put_i16_le(self.version);
        dst.put_u16_le(0);
        dst.put_u32_le(self.channel_id);
        dst.put_u32_le(self.body_size);
    }

    /// Header plus body length.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body_size as usize
    }
}

/// A single unit of transfer on the link.
///
/// Immutable once built; the payload is a cheap reference-counted slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
}

impl Packet {
    /// Build a packet with no flags set.
    ///
    /// Payloads above `u32::MAX` bytes cannot be represented and are rejected.
    pub fn new(
        packet_type: PacketType,
        channel_id: ChannelId,
        version: i16,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        Self::with_flags(packet_type, channel_id, version, 0, payload)
    }

    /// Build a packet with explicit flags.
    pub fn with_flags(
        packet_type: PacketType,
        channel_id: ChannelId,
        version: i16,
        flags: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > u32::MAX as usize {
            return Err(PacketError::BodyTooLarge {
                size: payload.len(),
                max: u32::MAX as usize,
            });
        }
        if flags & !KNOWN_FLAGS != 0 {
            return Err(PacketError::InvalidFlags(flags));
        }

        Ok(Self {
            header: PacketHeader {
                packet_type,
                flags,
                version,
                channel_id,
                body_size: payload.len() as u32,
            },
            payload,
        })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn channel_id(&self) -> ChannelId {
        self.header.channel_id
    }

    pub fn version(&self) -> i16 {
        self.header.version
    }

    pub fn flags(&self) -> u8 {
        self.header.flags
    }

    /// True when further `Data` fragments of the same write follow.
    pub fn has_more_fragments(&self) -> bool {
        self.header.flags & FLAG_MORE_FRAGMENTS != 0
    }

    pub fn body_size(&self) -> usize {
        self.header.body_size as usize
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The total wire size of this packet (header + body).
    pub fn wire_size(&self) -> usize {
        self.header.wire_size()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────┬───────┬─────────┬──────────┬──────────┬───────────┬──────────────┐
/// │ Magic (2) │ Type │ Flags │ Version │ Reserved │ Channel  │ Body size │ Body         │
/// │ "HL"      │ (1)  │ (1)   │ (2B LE) │ (2B)     │ (4B LE)  │ (4B LE)   │ (body bytes) │
/// └───────────┴──────┴───────┴─────────┴──────────┴──────────┴───────────┴──────────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) {
    dst.reserve(packet.wire_size());
    packet.header.encode(dst);
    dst.put_slice(&packet.payload);
}

/// Split one complete packet off the front of a receive buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, the packet bytes (header included) are removed from `src`.
pub fn split_packet(src: &mut BytesMut, max_body: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let header = PacketHeader::decode(&src[..HEADER_SIZE])?;
    let body_size = header.body_size as usize;
    if body_size > max_body {
        return Err(PacketError::BodyTooLarge {
            size: body_size,
            max: max_body,
        });
    }

    let total = HEADER_SIZE + body_size;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    Ok(Some(src.split_to(total).freeze()))
}

/// Validate that `src` holds exactly one packet and return its header.
pub fn check_packet(src: &[u8]) -> Result<PacketHeader> {
    let header = PacketHeader::decode(src)?;
    let total = header.wire_size();
    if src.len() < total {
        return Err(PacketError::Truncated {
            needed: total,
            available: src.len(),
        });
    }
    if src.len() > total {
        return Err(PacketError::LengthMismatch {
            declared: total,
            actual: src.len(),
        });
    }
    Ok(header)
}

/// Decode exactly one packet from its wire bytes.
///
/// The returned payload shares storage with `src`.
pub fn decode_packet(src: &Bytes) -> Result<Packet> {
    let header = check_packet(src)?;
    Ok(Packet {
        header,
        payload: src.slice(HEADER_SIZE..header.wire_size()),
    })
}

/// Body of a `Connect` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectBody {
    /// Highest protocol version the proposer speaks.
    pub max_version: i16,
    /// Lowest protocol version the proposer accepts.
    pub min_version: i16,
    /// Bytes the proposer can buffer for this channel.
    pub receive_window: u32,
}

impl ConnectBody {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_i16_le(self.max_version);
        buf.put_i16_le(self.min_version);
        buf.put_u32_le(self.receive_window);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = exact_body(PacketType::Connect, payload, Self::SIZE)?;
        Ok(Self {
            max_version: cursor.get_i16_le(),
            min_version: cursor.get_i16_le(),
            receive_window: cursor.get_u32_le(),
        })
    }
}

/// Body of a `ConnectResponse` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponseBody {
    /// Version both ends will use for the channel's lifetime.
    pub version: i16,
    /// Bytes the responder can buffer for this channel.
    pub receive_window: u32,
}

impl ConnectResponseBody {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_i16_le(self.version);
        buf.put_u16_le(0);
        buf.put_u32_le(self.receive_window);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = exact_body(PacketType::ConnectResponse, payload, Self::SIZE)?;
        let version = cursor.get_i16_le();
        let _reserved = cursor.get_u16_le();
        Ok(Self {
            version,
            receive_window: cursor.get_u32_le(),
        })
    }
}

/// Body of a `MaxData` packet: the cumulative byte limit the peer may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxDataBody {
    pub max_data: u64,
}

impl MaxDataBody {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.max_data.to_le_bytes())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = exact_body(PacketType::MaxData, payload, Self::SIZE)?;
        Ok(Self {
            max_data: cursor.get_u64_le(),
        })
    }
}

/// Body of an `Error` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: u32,
}

impl ErrorBody {
    pub const SIZE: usize = 4;

    /// No version both ends support.
    pub const VERSION_MISMATCH: u32 = 1;
    /// A packet was illegal for the receiver's channel state.
    pub const PROTOCOL_VIOLATION: u32 = 2;
    /// The sender exceeded the credit it was granted.
    pub const WINDOW_EXCEEDED: u32 = 3;

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.code.to_le_bytes())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = exact_body(PacketType::Error, payload, Self::SIZE)?;
        Ok(Self {
            code: cursor.get_u32_le(),
        })
    }
}

fn exact_body(packet_type: PacketType, payload: &[u8], size: usize) -> Result<&[u8]> {
    if payload.len() != size {
        return Err(PacketError::MalformedBody {
            packet_type,
            len: payload.len(),
        });
    }
    Ok(payload)
}

/// Configuration for the packet reader and writer.
#[derive(Debug, Clone)]
pub struct PacketConfig {
    /// Maximum body size in bytes. Default: 64 KiB.
    pub max_body_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
