//! Bounded packet pool.
//!
//! Packets are stored in a fixed slab of slots. Callers hold a move-only
//! [`PooledPacket`] handle (slot index + generation) and the slot is returned
//! when the handle is dropped or passed to [`PacketFactory::delete`]. The number
//! of live packets can never exceed the pool capacity.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::{encode_packet, ChannelId, Packet, PacketHeader, PacketType};
use crate::error::{PacketError, Result};

/// Default number of packet slots per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Allocates and recycles packets from a bounded slab.
///
/// Cloning the factory yields another handle to the same pool.
#[derive(Clone)]
pub struct PacketFactory {
    shared: Arc<Shared>,
}

struct Shared {
    capacity: usize,
    table: Mutex<SlotTable>,
}

struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    outstanding: usize,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    packet: Option<Packet>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, index: usize, generation: u32) {
        let mut table = self.lock();
        let slot = &mut table.slots[index];
        debug_assert!(
            slot.generation == generation && slot.packet.is_some(),
            "packet slot {index} released twice"
        );
        if slot.generation != generation || slot.packet.is_none() {
            return;
        }

        slot.packet = None;
        slot.generation = slot.generation.wrapping_add(1);
        table.free.push(index);
        table.outstanding -= 1;
    }

    fn with_packet<R>(&self, index: usize, generation: u32, f: impl FnOnce(&Packet) -> R) -> R {
        let table = self.lock();
        let slot = &table.slots[index];
        match slot.packet.as_ref() {
            Some(packet) if slot.generation == generation => f(packet),
            // A live handle always owns its slot; anything else is a broken invariant.
            _ => unreachable!("stale packet handle for slot {index}"),
        }
    }
}

impl PacketFactory {
    /// Create a pool with `capacity` preallocated slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            shared: Arc::new(Shared {
                capacity,
                table: Mutex::new(SlotTable {
                    slots,
                    free: (0..capacity).rev().collect(),
                    outstanding: 0,
                }),
            }),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of packets currently allocated and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// Allocate a packet with no flags.
    ///
    /// Fails with [`PacketError::PoolExhausted`] when no slot is free; callers
    /// should treat that as backpressure and retry after buffers drain.
    pub fn allocate(
        &self,
        packet_type: PacketType,
        channel_id: ChannelId,
        version: i16,
        payload: Bytes,
    ) -> Result<PooledPacket> {
        self.allocate_with_flags(packet_type, channel_id, version, 0, payload)
    }

    /// Allocate a packet with explicit flags.
    pub fn allocate_with_flags(
        &self,
        packet_type: PacketType,
        channel_id: ChannelId,
        version: i16,
        flags: u8,
        payload: Bytes,
    ) -> Result<PooledPacket> {
        let packet = Packet::with_flags(packet_type, channel_id, version, flags, payload)?;
        self.adopt(packet)
    }

    /// Move an already-built packet (e.g. one decoded off the link) into the pool.
    pub fn adopt(&self, packet: Packet) -> Result<PooledPacket> {
        let header = *packet.header();
        let mut table = self.shared.lock();
        let Some(index) = table.free.pop() else {
            return Err(PacketError::PoolExhausted {
                capacity: self.shared.capacity,
            });
        };

        let slot = &mut table.slots[index];
        let generation = slot.generation;
        slot.packet = Some(packet);
        table.outstanding += 1;
        drop(table);

        trace!(
            slot = index,
            channel = header.channel_id,
            packet_type = %header.packet_type,
            body_size = header.body_size,
            "packet allocated"
        );

        Ok(PooledPacket {
            pool: Arc::clone(&self.shared),
            index,
            generation,
            header,
        })
    }

    /// Return a packet's slot to the pool.
    ///
    /// Equivalent to dropping the handle. Returning a packet allocated by a
    /// different pool is a contract violation.
    pub fn delete(&self, packet: PooledPacket) {
        debug_assert!(
            self.owns(&packet),
            "packet returned to a pool that did not allocate it"
        );
        drop(packet);
    }

    /// True if `packet` was allocated by this pool.
    pub fn owns(&self, packet: &PooledPacket) -> bool {
        Arc::ptr_eq(&self.shared, &packet.pool)
    }
}

impl fmt::Debug for PacketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.shared.lock();
        f.debug_struct("PacketFactory")
            .field("capacity", &self.shared.capacity)
            .field("outstanding", &table.outstanding)
            .finish()
    }
}

/// Exclusive handle to a packet stored in a [`PacketFactory`].
///
/// Not `Clone`: ownership moves between buffers, and the slot is released
/// exactly once when the handle is dropped.
pub struct PooledPacket {
    pool: Arc<Shared>,
    index: usize,
    generation: u32,
    header: PacketHeader,
}

impl PooledPacket {
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

    pub fn has_more_fragments(&self) -> bool {
        self.header.flags & crate::codec::FLAG_MORE_FRAGMENTS != 0
    }

    pub fn body_size(&self) -> usize {
        self.header.body_size as usize
    }

    /// The packet payload (shares storage with the pooled packet).
    pub fn payload(&self) -> Bytes {
        self.pool
            .with_packet(self.index, self.generation, |packet| packet.payload().clone())
    }

    /// A detached copy of the packet.
    pub fn to_packet(&self) -> Packet {
        self.pool
            .with_packet(self.index, self.generation, Packet::clone)
    }

    /// Append the wire form of the packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        self.pool
            .with_packet(self.index, self.generation, |packet| encode_packet(packet, dst))
    }
}

impl Drop for PooledPacket {
    fn drop(&mut self) {
        self.pool.release(self.index, self.generation);
    }
}

impl fmt::Debug for PooledPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledPacket")
            .field("slot", &self.index)
            .field("packet_type", &self.header.packet_type)
            .field("channel_id", &self.header.channel_id)
            .field("version", &self.header.version)
            .field("body_size", &self.header.body_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_packet;

    #[test]
    fn allocate_until_exhausted() {
        let factory = PacketFactory::new(2);

        let a = factory
            .allocate(PacketType::Data, 1, 1, Bytes::from_static(b"a"))
            .unwrap();
        let _b = factory
            .allocate(PacketType::Data, 1, 1, Bytes::from_static(b"b"))
            .unwrap();
        assert_eq!(factory.outstanding(), 2);
        assert_eq!(factory.available(), 0);

        let err = factory
            .allocate(PacketType::Data, 1, 1, Bytes::from_static(b"c"))
            .unwrap_err();
        assert!(matches!(err, PacketError::PoolExhausted { capacity: 2 }));

        factory.delete(a);
        assert_eq!(factory.outstanding(), 1);
        assert!(factory
            .allocate(PacketType::Data, 1, 1, Bytes::from_static(b"c"))
            .is_ok());
    }

    #[test]
    fn drop_returns_slot() {
        let factory = PacketFactory::new(4);
        {
            let _p = factory
                .allocate(PacketType::Disconnect, 3, 1, Bytes::new())
                .unwrap();
            assert_eq!(factory.outstanding(), 1);
        }
        assert_eq!(factory.outstanding(), 0);
        assert_eq!(factory.available(), 4);
    }

    #[test]
    fn reused_slot_serves_new_contents() {
        let factory = PacketFactory::new(1);
        let first = factory
            .allocate(PacketType::Data, 1, 1, Bytes::from_static(b"old"))
            .unwrap();
        drop(first);

        let second = factory
            .allocate(PacketType::Data, 2, 1, Bytes::from_static(b"new"))
            .unwrap();
        assert_eq!(second.channel_id(), 2);
        assert_eq!(second.payload().as_ref(), b"new");
    }

    #[test]
    fn encode_matches_codec() {
        let factory = PacketFactory::new(1);
        let pooled = factory
            .allocate(PacketType::Data, 5, 2, Bytes::from_static(b"wire"))
            .unwrap();

        let mut buf = BytesMut::new();
        pooled.encode(&mut buf);
        let decoded = decode_packet(&buf.freeze()).unwrap();
        assert_eq!(decoded, pooled.to_packet());
    }

    #[test]
    fn ownership_is_per_pool() {
        let left = PacketFactory::new(1);
        let right = PacketFactory::new(1);
        let packet = left
            .allocate(PacketType::Data, 1, 1, Bytes::new())
            .unwrap();

        assert!(left.owns(&packet));
        assert!(!right.owns(&packet));
        assert!(left.clone().owns(&packet));
    }

    #[test]
    fn handles_are_shared_across_threads() {
        let factory = PacketFactory::new(64);
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let factory = factory.clone();
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        let p = factory
                            .allocate(PacketType::Data, t, 1, Bytes::from(i.to_le_bytes().to_vec()))
                            .unwrap();
                        assert_eq!(p.payload().as_ref(), &i.to_le_bytes());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(factory.outstanding(), 0);
    }
}
