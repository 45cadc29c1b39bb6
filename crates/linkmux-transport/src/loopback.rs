use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use bytes::Bytes;
use linkmux_packet::check_packet;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::PacketDriver;

/// In-process packet driver.
///
/// [`LoopbackDriver::pair`] returns two connected endpoints; whatever one
/// transmits the other receives, in order. Dropping or closing an endpoint
/// disconnects its peer once the peer has drained what was already sent.
#[derive(Debug)]
pub struct LoopbackDriver {
    tx: Option<Sender<Bytes>>,
    rx: Receiver<Bytes>,
    packets_sent: u64,
    packets_received: u64,
}

impl LoopbackDriver {
    /// Create two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: Sender<Bytes>, rx: Receiver<Bytes>) -> Self {
        Self {
            tx: Some(tx),
            rx,
            packets_sent: 0,
            packets_received: 0,
        }
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }
}

impl PacketDriver for LoopbackDriver {
    fn transmit_packet(&mut self, packet: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Shutdown)?;
        check_packet(packet)?;
        tx.send(Bytes::copy_from_slice(packet))
            .map_err(|_| TransportError::Disconnected)?;
        self.packets_sent += 1;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<Bytes>> {
        if self.tx.is_none() {
            return Err(TransportError::Shutdown);
        }
        match self.rx.try_recv() {
            Ok(packet) => {
                self.packets_received += 1;
                Ok(Some(packet))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            debug!(
                sent = self.packets_sent,
                received = self.packets_received,
                "loopback driver closed"
            );
        }
        Ok(())
    }

    fn driver_name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use linkmux_packet::{encode_packet, Packet, PacketError, PacketType};

    use super::*;

    fn wire(channel: u32, payload: &'static [u8]) -> Bytes {
        let mut buf = BytesMut::new();
        let packet = Packet::new(PacketType::Data, channel, 1, Bytes::from_static(payload)).unwrap();
        encode_packet(&packet, &mut buf);
        buf.freeze()
    }

    #[test]
    fn pair_delivers_in_order_both_ways() {
        let (mut host, mut target) = LoopbackDriver::pair();

        host.transmit_packet(&wire(1, b"a")).unwrap();
        host.transmit_packet(&wire(1, b"b")).unwrap();
        target.transmit_packet(&wire(2, b"c")).unwrap();

        assert_eq!(target.receive_packet().unwrap(), Some(wire(1, b"a")));
        assert_eq!(target.receive_packet().unwrap(), Some(wire(1, b"b")));
        assert_eq!(target.receive_packet().unwrap(), None);
        assert_eq!(host.receive_packet().unwrap(), Some(wire(2, b"c")));

        assert_eq!(host.packets_sent(), 2);
        assert_eq!(target.packets_received(), 2);
    }

    #[test]
    fn dropped_peer_disconnects_after_drain() {
        let (mut host, mut target) = LoopbackDriver::pair();
        host.transmit_packet(&wire(1, b"last words")).unwrap();
        drop(host);

        assert!(target.receive_packet().unwrap().is_some());
        assert!(matches!(
            target.receive_packet(),
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            target.transmit_packet(&wire(1, b"anyone?")),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn close_shuts_down_locally_and_remotely() {
        let (mut host, mut target) = LoopbackDriver::pair();
        host.close().unwrap();

        assert!(matches!(
            host.transmit_packet(&wire(1, b"x")),
            Err(TransportError::Shutdown)
        ));
        assert!(matches!(
            target.receive_packet(),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn rejects_bytes_that_are_not_one_packet() {
        let (mut host, mut target) = LoopbackDriver::pair();
        let mut two = BytesMut::from(&wire(1, b"one")[..]);
        two.extend_from_slice(&wire(1, b"two"));

        let err = host.transmit_packet(&two).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Packet(PacketError::LengthMismatch { .. })
        ));
        assert!(target.receive_packet().unwrap().is_none());
    }
}
