use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use linkmux_packet::{ChannelId, Packet, PacketFactory, PooledPacket};
use tracing::{debug, info, trace, warn};

use crate::channel::{Channel, ChannelImpl};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};

/// What happened to an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered to the channel or applied to its state machine.
    Accepted,
    /// Ignored: unknown channel, stale control packet, or a faulted channel.
    Dropped { reason: &'static str },
    /// The packet was illegal; its channel is now in the `Error` state.
    Faulted { reason: &'static str },
}

/// Channel table and scheduler for one link session.
///
/// Inbound packets are demultiplexed by channel id; outbound packets are
/// pulled from the channels round-robin, one per channel per pass.
pub struct Mux {
    config: Arc<MuxConfig>,
    factory: PacketFactory,
    channels: RwLock<BTreeMap<ChannelId, Channel>>,
    cursor: AtomicUsize,
}

impl Mux {
    /// Create a mux with its own packet pool.
    pub fn new(config: MuxConfig) -> Result<Self> {
        config.validate()?;
        let factory = PacketFactory::new(config.pool_capacity);
        debug!(
            pool_capacity = config.pool_capacity,
            max_body_size = config.max_body_size,
            versions = ?(config.min_version, config.max_version),
            "mux created"
        );
        Ok(Self {
            config: Arc::new(config),
            factory,
            channels: RwLock::new(BTreeMap::new()),
            cursor: AtomicUsize::new(0),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ChannelId, Channel>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ChannelId, Channel>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register channel `id` with explicit send and receive windows.
    ///
    /// The send window must hold at least one full `Data` body.
    pub fn register_channel(
        &self,
        id: ChannelId,
        max_send_window: usize,
        max_receive_window: usize,
    ) -> Result<Channel> {
        if max_send_window < self.config.max_body_size.max(1) {
            return Err(MuxError::InvalidWindow {
                channel: id,
                reason: "send window smaller than max body size",
            });
        }
        if max_receive_window == 0 {
            return Err(MuxError::InvalidWindow {
                channel: id,
                reason: "receive window is zero",
            });
        }
        if max_send_window > u32::MAX as usize || max_receive_window > u32::MAX as usize {
            return Err(MuxError::InvalidWindow {
                channel: id,
                reason: "window exceeds u32::MAX",
            });
        }

        let mut channels = self.write();
        if channels.contains_key(&id) {
            return Err(MuxError::DuplicateChannel(id));
        }
        let channel = Channel::new(ChannelImpl::new(
            id,
            max_send_window,
            max_receive_window,
            self.factory.clone(),
            Arc::clone(&self.config),
        ));
        channels.insert(id, channel.clone());
        info!(
            channel = id,
            send_window = max_send_window,
            receive_window = max_receive_window,
            "channel registered"
        );
        Ok(channel)
    }

    /// Register channel `id` with the configured default windows.
    pub fn register_default(&self, id: ChannelId) -> Result<Channel> {
        self.register_channel(
            id,
            self.config.default_send_window,
            self.config.default_receive_window,
        )
    }

    /// Reset channel `id` and remove it from the table.
    ///
    /// Outstanding handles keep working as closed channels.
    pub fn unregister_channel(&self, id: ChannelId) -> Result<()> {
        let channel = self.write().remove(&id).ok_or(MuxError::UnknownChannel(id))?;
        channel.cell().lock().detach();
        info!(channel = id, "channel unregistered");
        Ok(())
    }

    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.read().get(&id).cloned()
    }

    /// Registered channel ids in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.read().keys().copied().collect()
    }

    pub fn factory(&self) -> &PacketFactory {
        &self.factory
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Route one packet that arrived from the link.
    ///
    /// Only pool exhaustion is an error, and it leaves no trace: the caller
    /// should hold on to the packet and dispatch it again after draining.
    pub fn dispatch_inbound(&self, packet: &Packet) -> Result<Dispatch> {
        let id = packet.channel_id();
        let Some(channel) = self.channel(id) else {
            warn!(
                channel = id,
                packet_type = %packet.packet_type(),
                "dropping packet for unknown channel"
            );
            return Ok(Dispatch::Dropped {
                reason: "unknown channel",
            });
        };

        let outcome = channel.cell().lock().handle_inbound(packet)?;
        if let Dispatch::Dropped { reason } = outcome {
            debug!(channel = id, packet_type = %packet.packet_type(), reason, "packet dropped");
        }
        Ok(outcome)
    }

    /// One fair pass over the channels registered right now.
    ///
    /// Yields at most one packet per channel. Each call starts one channel
    /// later than the previous one.
    pub fn drain_outbound(&self) -> Drain<'_> {
        let channels: Vec<Channel> = self.read().values().cloned().collect();
        let start = match channels.len() {
            0 => 0,
            n => self.cursor.fetch_add(1, Ordering::Relaxed) % n,
        };
        Drain {
            _mux: self,
            channels,
            start,
            visited: 0,
        }
    }

    /// True if any channel has a packet ready for the link.
    pub fn has_pending_outbound(&self) -> bool {
        self.read()
            .values()
            .any(|channel| channel.cell().lock().has_outbound())
    }

    /// Force every channel to `Disconnected` and return every buffered packet
    /// to the pool. The recovery path for a lost link.
    pub fn reset(&self) {
        let channels: Vec<Channel> = self.read().values().cloned().collect();
        for channel in &channels {
            channel.cell().lock().reset();
        }
        warn!(
            channels = channels.len(),
            outstanding = self.factory.outstanding(),
            "mux reset"
        );
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.reset();
    }
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("channels", &self.channel_ids())
            .field("factory", &self.factory)
            .finish()
    }
}

/// Lazy outbound pass returned by [`Mux::drain_outbound`].
pub struct Drain<'a> {
    _mux: &'a Mux,
    channels: Vec<Channel>,
    start: usize,
    visited: usize,
}

impl Iterator for Drain<'_> {
    type Item = PooledPacket;

    fn next(&mut self) -> Option<PooledPacket> {
        while self.visited < self.channels.len() {
            let index = (self.start + self.visited) % self.channels.len();
            self.visited += 1;
            let channel = &self.channels[index];
            if let Some(packet) = channel.cell().lock().next_outbound() {
                trace!(
                    channel = channel.id(),
                    packet_type = %packet.packet_type(),
                    body_size = packet.body_size(),
                    "packet drained"
                );
                return Some(packet);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.channels.len() - self.visited))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bytes::Bytes;
    use linkmux_packet::PacketType;

    use super::*;
    use crate::channel::ChannelState;
    use crate::error::ChannelError;

    fn mux() -> Mux {
        Mux::new(MuxConfig::default()).unwrap()
    }

    /// Shuttle packets between two muxes until both are quiet.
    fn pump(a: &Mux, b: &Mux) -> Vec<Packet> {
        let mut wire = Vec::new();
        loop {
            let mut moved = false;
            for (from, to) in [(a, b), (b, a)] {
                for pooled in from.drain_outbound() {
                    let packet = pooled.to_packet();
                    drop(pooled);
                    to.dispatch_inbound(&packet).unwrap();
                    wire.push(packet);
                    moved = true;
                }
            }
            if !moved {
                return wire;
            }
        }
    }

    #[test]
    fn register_rejects_duplicates_and_bad_windows() {
        let mux = mux();
        mux.register_default(1).unwrap();

        assert_eq!(
            mux.register_default(1).unwrap_err(),
            MuxError::DuplicateChannel(1)
        );
        assert!(matches!(
            mux.register_channel(2, 512, 1024),
            Err(MuxError::InvalidWindow { channel: 2, .. })
        ));
        assert!(matches!(
            mux.register_channel(2, 1024, 0),
            Err(MuxError::InvalidWindow { channel: 2, .. })
        ));
        assert_eq!(mux.channel_ids(), vec![1]);
    }

    #[test]
    fn invalid_config_is_refused() {
        let err = Mux::new(MuxConfig::default().with_pool_capacity(0)).unwrap_err();
        assert!(matches!(err, MuxError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_channel_is_dropped() {
        let mux = mux();
        let packet = Packet::new(PacketType::Data, 42, 1, Bytes::from_static(b"?")).unwrap();
        assert_eq!(
            mux.dispatch_inbound(&packet).unwrap(),
            Dispatch::Dropped {
                reason: "unknown channel"
            }
        );
    }

    #[test]
    fn fault_stays_on_its_channel() {
        let host = mux();
        let target = mux();
        let (a1, a2) = (host.register_default(1).unwrap(), host.register_default(2).unwrap());
        target.register_default(1).unwrap();
        target.register_default(2).unwrap();
        a1.open().unwrap();
        a2.open().unwrap();
        pump(&host, &target);

        let bogus = Packet::new(PacketType::Connect, 1, 2, vec![0u8; 3]).unwrap();
        assert!(matches!(
            target.dispatch_inbound(&bogus).unwrap(),
            Dispatch::Faulted { .. }
        ));
        assert_eq!(target.channel(1).unwrap().state(), ChannelState::Error);
        assert_eq!(target.channel(2).unwrap().state(), ChannelState::Connected);

        pump(&host, &target);
        assert_eq!(a1.state(), ChannelState::Error);
        assert_eq!(a2.state(), ChannelState::Connected);
    }

    #[test]
    fn drain_yields_one_packet_per_channel_per_pass() {
        let host = mux();
        let target = mux();
        let channels: Vec<_> = (1..=4).map(|id| host.register_default(id).unwrap()).collect();
        for id in 1..=4 {
            target.register_default(id).unwrap();
        }
        for channel in &channels {
            channel.open().unwrap();
        }
        pump(&host, &target);

        for channel in &channels {
            for _ in 0..3 {
                channel.send(b"tick").unwrap();
            }
        }

        for _ in 0..3 {
            let ids: Vec<_> = host.drain_outbound().map(|p| p.channel_id()).collect();
            assert_eq!(ids.len(), 4);
            assert_eq!(ids.iter().copied().collect::<HashSet<_>>().len(), 4);
        }
        assert_eq!(host.drain_outbound().count(), 0);
    }

    #[test]
    fn drain_rotates_starting_channel() {
        let host = mux();
        let target = mux();
        let channels: Vec<_> = (1..=3).map(|id| host.register_default(id).unwrap()).collect();
        for id in 1..=3 {
            target.register_default(id).unwrap();
        }
        for channel in &channels {
            channel.open().unwrap();
        }
        pump(&host, &target);
        for channel in &channels {
            channel.send(b"a").unwrap();
            channel.send(b"b").unwrap();
        }

        let first: Vec<_> = host.drain_outbound().map(|p| p.channel_id()).collect();
        let second: Vec<_> = host.drain_outbound().map(|p| p.channel_id()).collect();
        assert_eq!(first.len(), 3);
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn two_kilobyte_write_on_narrow_window() {
        let host = mux();
        let target = mux();
        let sender = host.register_channel(3, 1024, 8 * 1024).unwrap();
        let receiver = target.register_default(3).unwrap();
        sender.open().unwrap();
        pump(&host, &target);

        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        sender.send(&payload).unwrap();

        let data: Vec<_> = pump(&host, &target)
            .into_iter()
            .filter(|p| p.packet_type() == PacketType::Data)
            .collect();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].body_size() + data[1].body_size(), 2000);

        assert_eq!(receiver.receive().unwrap().unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn reset_closes_everything_and_restores_pool() {
        let host = mux();
        let target = mux();
        let channels: Vec<_> = (1..=3).map(|id| host.register_default(id).unwrap()).collect();
        for id in 1..=3 {
            target.register_default(id).unwrap();
        }
        for channel in &channels {
            channel.open().unwrap();
        }
        pump(&host, &target);
        for channel in &channels {
            channel.send(&[7u8; 3000]).unwrap();
        }
        assert!(host.factory().outstanding() > 0);

        host.reset();

        assert_eq!(host.factory().outstanding(), 0);
        for channel in &channels {
            assert_eq!(channel.state(), ChannelState::Disconnected);
            assert_eq!(
                channel.send(b"x"),
                Err(ChannelError::ChannelClosed(channel.id()))
            );
            assert_eq!(
                channel.receive(),
                Err(ChannelError::ChannelClosed(channel.id()))
            );
        }
        assert!(!host.has_pending_outbound());
    }

    #[test]
    fn unregister_detaches_handle() {
        let mux = mux();
        let channel = mux.register_default(8).unwrap();
        mux.unregister_channel(8).unwrap();

        assert!(channel.is_detached());
        assert_eq!(channel.open(), Err(ChannelError::ChannelClosed(8)));
        assert_eq!(
            mux.unregister_channel(8).unwrap_err(),
            MuxError::UnknownChannel(8)
        );
        assert!(mux.channel(8).is_none());
    }

    #[test]
    fn pool_exhaustion_surfaces_as_busy() {
        let host = mux();
        let target = Mux::new(MuxConfig::default().with_pool_capacity(1)).unwrap();
        let sender = host.register_default(1).unwrap();
        target.register_default(1).unwrap();
        sender.open().unwrap();
        pump(&host, &target);

        sender.send(b"one").unwrap();
        sender.send(b"two").unwrap();
        let first = host.drain_outbound().next().unwrap().to_packet();
        let second = host.drain_outbound().next().unwrap().to_packet();

        assert_eq!(target.dispatch_inbound(&first).unwrap(), Dispatch::Accepted);
        assert_eq!(target.dispatch_inbound(&second), Err(MuxError::Busy));

        let receiver = target.channel(1).unwrap();
        assert_eq!(receiver.receive().unwrap().unwrap().as_ref(), b"one");
        assert_eq!(target.dispatch_inbound(&second).unwrap(), Dispatch::Accepted);
        assert_eq!(receiver.receive().unwrap().unwrap().as_ref(), b"two");
    }

    #[test]
    fn concurrent_senders_and_reset_do_not_corrupt_pool() {
        let host = Arc::new(mux());
        let target = mux();
        let channels: Vec<_> = (1..=4).map(|id| host.register_default(id).unwrap()).collect();
        for id in 1..=4 {
            target.register_default(id).unwrap();
        }
        for channel in &channels {
            channel.open().unwrap();
        }
        pump(&host, &target);

        let workers: Vec<_> = channels
            .into_iter()
            .map(|channel| {
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        match channel.send(&[1u8; 100]) {
                            Ok(()) | Err(ChannelError::WouldBlock) => {}
                            Err(ChannelError::ChannelClosed(_)) => break,
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    }
                })
            })
            .collect();

        for _ in 0..10 {
            let _ = host.drain_outbound().count();
        }
        host.reset();
        for worker in workers {
            worker.join().unwrap();
        }

        host.reset();
        assert_eq!(host.factory().outstanding(), 0);
    }
}
