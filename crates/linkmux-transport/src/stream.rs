use std::io::{Read, Write};
use std::time::Duration;

use bytes::Bytes;
use linkmux_packet::{PacketConfig, PacketReader, PacketWriter};
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{Closeable, PacketDriver};

/// Read timeout applied to sockets when [`PacketConfig::read_timeout`] is unset.
///
/// A receive poll on an idle link returns `None` after at most this long.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Packet driver over a byte stream.
///
/// Reads and writes go through separate handles to the same link (see
/// [`StreamDriver::unix`] and [`StreamDriver::tcp`]). Reads that would block
/// or time out are reported as "no packet yet"; partially received packets
/// stay buffered until the rest arrives.
pub struct StreamDriver<T> {
    reader: PacketReader<T>,
    writer: PacketWriter<T>,
    closed: bool,
}

impl<T: Read + Write + Closeable> StreamDriver<T> {
    /// Build a driver from a read half and a write half.
    pub fn new(read_half: T, write_half: T) -> Self {
        Self::with_config(read_half, write_half, PacketConfig::default())
    }

    pub fn with_config(read_half: T, write_half: T, config: PacketConfig) -> Self {
        Self {
            reader: PacketReader::with_config(read_half, config.clone()),
            writer: PacketWriter::with_config(write_half, config),
            closed: false,
        }
    }

    /// Bytes received but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.reader.buffered()
    }

    pub fn config(&self) -> &PacketConfig {
        self.reader.config()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }
}

impl<T: Read + Write + Closeable> PacketDriver for StreamDriver<T> {
    fn transmit_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.writer.write_encoded(packet)?;
        trace!(bytes = packet.len(), "packet transmitted");
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let packet = self.reader.try_read_packet()?;
        if let Some(bytes) = &packet {
            trace!(bytes = bytes.len(), "packet received");
        }
        Ok(packet)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        Closeable::close(self.writer.get_mut())?;
        Closeable::close(self.reader.get_mut())?;
        debug!("stream driver closed");
        Ok(())
    }

    fn driver_name(&self) -> &'static str {
        "stream"
    }
}

fn poll_timeout(config: &PacketConfig) -> Option<Duration> {
    // A zero timeout is rejected by the socket API.
    Some(
        config
            .read_timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_POLL_TIMEOUT),
    )
}

#[cfg(unix)]
impl StreamDriver<std::os::unix::net::UnixStream> {
    /// Wrap a connected Unix stream, applying timeouts from `config`.
    pub fn unix(stream: std::os::unix::net::UnixStream, config: PacketConfig) -> Result<Self> {
        stream.set_read_timeout(poll_timeout(&config))?;
        stream.set_write_timeout(config.write_timeout)?;
        let write_half = stream.try_clone()?;
        debug!("stream driver attached to unix socket");
        Ok(Self::with_config(stream, write_half, config))
    }
}

impl StreamDriver<std::net::TcpStream> {
    /// Wrap a connected TCP stream, applying timeouts from `config`.
    pub fn tcp(stream: std::net::TcpStream, config: PacketConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(poll_timeout(&config))?;
        stream.set_write_timeout(config.write_timeout)?;
        let write_half = stream.try_clone()?;
        debug!(peer = ?stream.peer_addr().ok(), "stream driver attached to tcp socket");
        Ok(Self::with_config(stream, write_half, config))
    }
}
