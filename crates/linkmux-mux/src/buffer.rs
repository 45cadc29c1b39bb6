//! Windowed per-channel packet queues.
//!
//! A buffer is a FIFO of pooled packets whose summed body size never exceeds
//! its window. Enqueue refuses rather than drops; the refused packet goes back
//! to the caller inside [`Rejected`].

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use linkmux_packet::PooledPacket;
use tracing::trace;

use crate::error::{BufferError, Rejected};

/// Which side of the channel a buffer serves.
pub trait Direction {
    const NAME: &'static str;
}

/// Application to link.
#[derive(Debug)]
pub enum Outbound {}

/// Link to application.
#[derive(Debug)]
pub enum Inbound {}

impl Direction for Outbound {
    const NAME: &'static str = "send";
}

impl Direction for Inbound {
    const NAME: &'static str = "receive";
}

/// Packets waiting for the mux to put them on the link.
pub type SendBuffer = PacketBuffer<Outbound>;

/// Packets delivered from the link waiting for the application.
pub type ReceiveBuffer = PacketBuffer<Inbound>;

pub struct PacketBuffer<D> {
    packets: VecDeque<PooledPacket>,
    version: i16,
    current_size: usize,
    max_size: usize,
    _direction: PhantomData<D>,
}

impl<D: Direction> PacketBuffer<D> {
    /// Create an empty buffer with a fixed window of `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            packets: VecDeque::new(),
            version: 0,
            current_size: 0,
            max_size,
            _direction: PhantomData,
        }
    }

    /// Set the protocol version for packets in this buffer.
    ///
    /// Only legal while the buffer is empty.
    pub fn set_version(&mut self, version: i16) -> Result<(), BufferError> {
        if !self.packets.is_empty() {
            return Err(BufferError::VersionLocked {
                buffered: self.packets.len(),
            });
        }
        self.version = version;
        Ok(())
    }

    /// Append `packet` if it fits the window.
    pub fn enqueue(&mut self, packet: PooledPacket) -> Result<(), Rejected> {
        let body_size = packet.body_size();
        if !self.fits(body_size) {
            return Err(Rejected {
                packet,
                body_size,
                remaining: self.remaining(),
            });
        }
        debug_assert_eq!(
            packet.version(),
            self.version,
            "packet version differs from {} buffer version",
            D::NAME
        );

        self.current_size += body_size;
        self.packets.push_back(packet);
        trace!(
            buffer = D::NAME,
            body_size,
            current_size = self.current_size,
            "packet buffered"
        );
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<PooledPacket> {
        let packet = self.packets.pop_front()?;
        self.current_size -= packet.body_size();
        Some(packet)
    }

    pub fn peek(&self) -> Option<&PooledPacket> {
        self.packets.front()
    }

    /// Drop every buffered packet, returning their slots to the pool.
    ///
    /// Returns the number of packets discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.packets.len();
        self.packets.clear();
        self.current_size = 0;
        discarded
    }

    /// True if a body of `body_size` bytes would fit right now.
    pub fn fits(&self, body_size: usize) -> bool {
        body_size <= self.remaining()
    }

    pub fn version(&self) -> i16 {
        self.version
    }

    /// Sum of buffered body sizes.
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn remaining(&self) -> usize {
        self.max_size - self.current_size
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl<D: Direction> fmt::Debug for PacketBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("direction", &D::NAME)
            .field("packets", &self.packets.len())
            .field("version", &self.version)
            .field("current_size", &self.current_size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use linkmux_packet::{PacketFactory, PacketType};

    use super::*;

    fn data(factory: &PacketFactory, len: usize) -> PooledPacket {
        factory
            .allocate(PacketType::Data, 1, 0, Bytes::from(vec![len as u8; len]))
            .unwrap()
    }

    #[test]
    fn window_is_never_exceeded() {
        let factory = PacketFactory::new(64);
        let mut buffer = SendBuffer::new(100);

        let mut accepted = 0;
        for len in [30, 50, 40, 20, 1, 0, 5] {
            match buffer.enqueue(data(&factory, len)) {
                Ok(()) => accepted += len,
                Err(rejected) => {
                    assert_eq!(rejected.body_size, len);
                    assert!(len > rejected.remaining);
                }
            }
            assert!(buffer.current_size() <= buffer.max_size());
            assert_eq!(buffer.current_size(), accepted);
        }

        // 30 + 50 + 20 + 0 = 100; 40, 1 and 5 were refused.
        assert_eq!(buffer.current_size(), 100);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn rejected_packet_is_handed_back() {
        let factory = PacketFactory::new(4);
        let mut buffer = ReceiveBuffer::new(8);

        let rejected = buffer.enqueue(data(&factory, 9)).unwrap_err();
        assert_eq!(factory.outstanding(), 1);
        assert!(buffer.is_empty());

        let packet = rejected.into_packet();
        assert_eq!(packet.body_size(), 9);
        drop(packet);
        assert_eq!(factory.outstanding(), 0);
    }

    #[test]
    fn dequeue_is_fifo() {
        let factory = PacketFactory::new(16);
        let mut buffer = SendBuffer::new(1024);

        for len in 1..=10 {
            buffer.enqueue(data(&factory, len)).unwrap();
        }
        assert_eq!(buffer.peek().map(|p| p.body_size()), Some(1));

        let order: Vec<usize> = std::iter::from_fn(|| buffer.dequeue())
            .map(|p| p.body_size())
            .collect();
        assert_eq!(order, (1..=10).collect::<Vec<_>>());
        assert_eq!(buffer.current_size(), 0);
        assert!(buffer.dequeue().is_none());
    }

    #[test]
    fn clear_returns_every_slot() {
        let factory = PacketFactory::new(8);
        let mut buffer = ReceiveBuffer::new(1024);
        for len in [10, 20, 30] {
            buffer.enqueue(data(&factory, len)).unwrap();
        }
        assert_eq!(factory.available(), 5);

        assert_eq!(buffer.clear(), 3);
        assert_eq!(buffer.current_size(), 0);
        assert_eq!(buffer.len(), 0);
        assert_eq!(factory.available(), 8);
        assert_eq!(factory.outstanding(), 0);
    }

    #[test]
    fn version_is_locked_while_buffered() {
        let factory = PacketFactory::new(2);
        let mut buffer = SendBuffer::new(64);
        buffer.set_version(0).unwrap();
        buffer.enqueue(data(&factory, 4)).unwrap();

        assert_eq!(
            buffer.set_version(2),
            Err(BufferError::VersionLocked { buffered: 1 })
        );

        buffer.clear();
        buffer.set_version(2).unwrap();
        assert_eq!(buffer.version(), 2);
    }
}
