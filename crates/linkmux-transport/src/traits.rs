use std::io;

use bytes::Bytes;

use crate::error::Result;

/// The link as seen by the multiplexer: whole packets in, whole packets out.
///
/// Drivers own framing. `transmit_packet` receives exactly one encoded packet
/// and `receive_packet` yields exactly one or `None` when nothing has arrived
/// yet. Neither call may block indefinitely on an idle link.
pub trait PacketDriver {
    /// Send one encoded packet.
    fn transmit_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Poll for the next encoded packet.
    fn receive_packet(&mut self) -> Result<Option<Bytes>>;

    /// Release the link. Called once when the session shuts down.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Driver name for diagnostics.
    fn driver_name(&self) -> &'static str {
        "driver"
    }
}

impl<D: PacketDriver + ?Sized> PacketDriver for Box<D> {
    fn transmit_packet(&mut self, packet: &[u8]) -> Result<()> {
        (**self).transmit_packet(packet)
    }

    fn receive_packet(&mut self) -> Result<Option<Bytes>> {
        (**self).receive_packet()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn driver_name(&self) -> &'static str {
        (**self).driver_name()
    }
}

/// Native handle teardown.
///
/// Implementations shut the handle down in both directions. Closing a handle
/// the peer already closed is not an error.
pub trait Closeable {
    fn close(&mut self) -> io::Result<()>;
}

fn shutdown_result(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

#[cfg(unix)]
impl Closeable for std::os::unix::net::UnixStream {
    fn close(&mut self) -> io::Result<()> {
        shutdown_result(self.shutdown(std::net::Shutdown::Both))
    }
}

impl Closeable for std::net::TcpStream {
    fn close(&mut self) -> io::Result<()> {
        shutdown_result(self.shutdown(std::net::Shutdown::Both))
    }
}
