use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_packet, split_packet, Packet, PacketConfig};
use crate::error::{PacketError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Partial reads are buffered internally; callers always get whole packets.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    config: PacketConfig,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, PacketConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: PacketConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the wire bytes of the next complete packet (blocking).
    ///
    /// Returns `Err(PacketError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Bytes> {
        loop {
            if let Some(packet) = split_packet(&mut self.buf, self.config.max_body_size)? {
                return Ok(packet);
            }
            self.fill()?;
        }
    }

    /// Read the next packet if one can be assembled without blocking.
    ///
    /// A `WouldBlock` or `TimedOut` from the stream ends the attempt with
    /// `Ok(None)`; bytes read so far stay buffered for the next call.
    pub fn try_read_packet(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(packet) = split_packet(&mut self.buf, self.config.max_body_size)? {
                return Ok(Some(packet));
            }
            match self.fill() {
                Ok(()) => continue,
                Err(PacketError::Io(err))
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read and decode the next packet (blocking).
    pub fn read_decoded(&mut self) -> Result<Packet> {
        decode_packet(&self.read_packet()?)
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(PacketError::ConnectionClosed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(PacketError::Io(err)),
            }
        }
    }

    /// Number of bytes read from the stream but not yet returned as packets.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current packet reader configuration.
    pub fn config(&self) -> &PacketConfig {
        &self.config
    }
}
