//! Per-channel state machine.
//!
//! ```text
//! NotInitialized ─open─▶ Connecting ─ConnectResponse─▶ Connected ─close─▶ Disconnecting
//!       ▲                    │                             │                   │
//!       └──── Disconnected ◀─┴──────── Disconnect ─────────┴── Disconnect sent ┘
//!
//! any state ─protocol violation / peer Error─▶ Error ─reset─▶ Disconnected
//! ```
//!
//! Application threads drive `send`/`receive`/`open`/`close` through a
//! [`Channel`] handle; the mux coordinator drives inbound dispatch and
//! outbound drain. Both sides meet under the channel's own mutex.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use linkmux_packet::{
    ChannelId, ConnectBody, ConnectResponseBody, ErrorBody, MaxDataBody, Packet, PacketError,
    PacketFactory, PacketType, PooledPacket, FLAG_MORE_FRAGMENTS,
};
use tracing::{debug, trace, warn};

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::config::MuxConfig;
use crate::error::{ChannelError, MuxError};
use crate::mux::Dispatch;

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ChannelState {
    NotInitialized,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time counters for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChannelStats {
    pub channel: ChannelId,
    pub state: ChannelState,
    pub version: i16,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// `send` calls refused with `WouldBlock`.
    pub would_block: u64,
    pub send_buffered: usize,
    pub send_window: usize,
    pub receive_buffered: usize,
    pub receive_window: usize,
    /// Bytes of accepted writes not yet admitted to the send window.
    pub staged: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    messages_sent: u64,
    messages_received: u64,
    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    would_block: u64,
}

/// A fragment of an accepted write that has not entered the send window yet.
#[derive(Debug)]
struct Fragment {
    payload: Bytes,
    more: bool,
}

/// Control packets owed to the peer, built when the drain reaches the channel.
#[derive(Debug, Default)]
struct PendingControl {
    connect: bool,
    connect_response: bool,
    error: Option<u32>,
}

/// Credit bookkeeping, in cumulative `Data` body bytes since connect.
#[derive(Debug, Default)]
struct Credit {
    /// Limit granted by the peer.
    peer_max_data: u64,
    /// Peer's receive window, caps our fragment size.
    peer_window: u32,
    sent: u64,
    /// Limit last granted to the peer.
    advertised: u64,
    received: u64,
    /// Bytes the application has taken out of the receive buffer.
    consumed: u64,
}

pub(crate) struct ChannelImpl {
    id: ChannelId,
    state: ChannelState,
    version: i16,
    send: SendBuffer,
    receive: ReceiveBuffer,
    staged: VecDeque<Fragment>,
    staged_bytes: usize,
    assembler: BytesMut,
    pending: PendingControl,
    disconnect_pending: bool,
    credit: Credit,
    counters: Counters,
    registered: bool,
    factory: PacketFactory,
    config: Arc<MuxConfig>,
}

impl ChannelImpl {
    pub(crate) fn new(
        id: ChannelId,
        send_window: usize,
        receive_window: usize,
        factory: PacketFactory,
        config: Arc<MuxConfig>,
    ) -> Self {
        Self {
            id,
            state: ChannelState::NotInitialized,
            version: 0,
            send: SendBuffer::new(send_window),
            receive: ReceiveBuffer::new(receive_window),
            staged: VecDeque::new(),
            staged_bytes: 0,
            assembler: BytesMut::new(),
            pending: PendingControl::default(),
            disconnect_pending: false,
            credit: Credit::default(),
            counters: Counters::default(),
            registered: true,
            factory,
            config,
        }
    }

    fn set_state(&mut self, next: ChannelState) {
        if self.state != next {
            debug!(channel = self.id, from = %self.state, to = %next, "channel state changed");
            self.state = next;
        }
    }

    fn closed_error(&self) -> ChannelError {
        match self.state {
            ChannelState::Error => ChannelError::Faulted(self.id),
            _ => ChannelError::ChannelClosed(self.id),
        }
    }

    fn invalid(&self, operation: &'static str) -> ChannelError {
        ChannelError::InvalidState {
            channel: self.id,
            state: self.state,
            operation,
        }
    }

    /// Drop buffered, staged and partially assembled data.
    fn discard_data(&mut self) {
        let dropped = self.send.clear() + self.receive.clear();
        self.staged.clear();
        self.staged_bytes = 0;
        self.assembler.clear();
        if dropped > 0 {
            debug!(channel = self.id, packets = dropped, "discarded buffered packets");
        }
    }

    fn lock_version(&mut self, version: i16) -> Result<(), ChannelError> {
        let locked = self
            .send
            .set_version(version)
            .and_then(|()| self.receive.set_version(version));
        if locked.is_err() {
            self.fault(ErrorBody::PROTOCOL_VIOLATION, "buffers not empty at connect");
            return Err(self.closed_error());
        }
        self.version = version;
        Ok(())
    }

    // Application operations.

    pub(crate) fn open(&mut self) -> Result<(), ChannelError> {
        if !self.registered {
            return Err(ChannelError::ChannelClosed(self.id));
        }
        match self.state {
            ChannelState::NotInitialized | ChannelState::Disconnected => {}
            _ => return Err(self.invalid("open")),
        }

        self.discard_data();
        self.credit = Credit {
            advertised: self.receive.max_size() as u64,
            ..Credit::default()
        };
        self.version = 0;
        self.pending.connect = true;
        self.pending.connect_response = false;
        self.pending.error = None;
        self.set_state(ChannelState::Connecting);
        Ok(())
    }

    pub(crate) fn close(&mut self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Connected => {
                self.disconnect_pending = true;
                self.set_state(ChannelState::Disconnecting);
                Ok(())
            }
            ChannelState::Connecting => {
                // Abort. A Connect that never left needs no Disconnect.
                if !std::mem::take(&mut self.pending.connect) {
                    self.disconnect_pending = true;
                }
                self.discard_data();
                self.set_state(ChannelState::Disconnected);
                Ok(())
            }
            _ => Err(self.invalid("close")),
        }
    }

    pub(crate) fn send(&mut self, payload: Bytes) -> Result<(), ChannelError> {
        if self.state != ChannelState::Connected {
            return Err(self.closed_error());
        }
        if payload.len() > self.config.max_write_size {
            return Err(ChannelError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_write_size,
            });
        }
        if !self.staged.is_empty() {
            self.counters.would_block += 1;
            return Err(ChannelError::WouldBlock);
        }

        let fragment_size = self
            .config
            .max_body_size
            .min(self.credit.peer_window as usize)
            .max(1);
        let mut fragments = split_fragments(payload, fragment_size);

        let Some(first) = fragments.pop_front() else {
            return Ok(());
        };
        if !self.send.fits(first.payload.len()) {
            self.counters.would_block += 1;
            return Err(ChannelError::WouldBlock);
        }
        let packet = match self.allocate_data(&first) {
            Ok(packet) => packet,
            Err(_) => {
                self.counters.would_block += 1;
                return Err(ChannelError::WouldBlock);
            }
        };
        self.push_send(packet);

        self.staged_bytes = fragments.iter().map(|f| f.payload.len()).sum();
        self.staged = fragments;
        self.promote_staged();
        self.counters.messages_sent += 1;

        trace!(
            channel = self.id,
            buffered = self.send.current_size(),
            staged = self.staged_bytes,
            "write accepted"
        );
        Ok(())
    }

    pub(crate) fn receive(&mut self) -> Result<Option<Bytes>, ChannelError> {
        match self.state {
            ChannelState::Connected | ChannelState::Disconnecting => {}
            _ => return Err(self.closed_error()),
        }

        while let Some(packet) = self.receive.dequeue() {
            let payload = packet.payload();
            let more = packet.has_more_fragments();
            drop(packet);
            self.credit.consumed += payload.len() as u64;

            if !more && self.assembler.is_empty() {
                self.counters.messages_received += 1;
                return Ok(Some(payload));
            }
            if self.assembler.len() + payload.len() > self.config.max_write_size {
                self.fault(ErrorBody::PROTOCOL_VIOLATION, "message exceeds max write size");
                return Err(self.closed_error());
            }
            self.assembler.extend_from_slice(&payload);
            if !more {
                self.counters.messages_received += 1;
                return Ok(Some(self.assembler.split().freeze()));
            }
        }
        Ok(None)
    }

    pub(crate) fn reset(&mut self) {
        self.discard_data();
        self.pending = PendingControl::default();
        self.disconnect_pending = false;
        self.credit = Credit::default();
        self.version = 0;
        self.set_state(ChannelState::Disconnected);
    }

    pub(crate) fn detach(&mut self) {
        self.registered = false;
        self.reset();
    }

    // Link-facing operations.

    /// Put a protocol violation on record: enter `Error` and owe the peer an
    /// `Error` packet.
    fn fault(&mut self, code: u32, reason: &'static str) -> Dispatch {
        warn!(channel = self.id, state = %self.state, code, reason, "channel faulted");
        self.discard_data();
        self.pending = PendingControl {
            error: Some(code),
            ..PendingControl::default()
        };
        self.disconnect_pending = false;
        self.set_state(ChannelState::Error);
        Dispatch::Faulted { reason }
    }

    pub(crate) fn handle_inbound(&mut self, packet: &Packet) -> Result<Dispatch, MuxError> {
        use ChannelState as S;

        trace!(
            channel = self.id,
            packet_type = %packet.packet_type(),
            state = %self.state,
            body_size = packet.body_size(),
            "inbound packet"
        );

        if self.state == S::Error {
            return Ok(Dispatch::Dropped {
                reason: "channel is faulted",
            });
        }

        match packet.packet_type() {
            PacketType::Connect => match self.state {
                S::NotInitialized | S::Disconnected | S::Connecting => Ok(self.accept(packet)),
                _ => Ok(self.fault(ErrorBody::PROTOCOL_VIOLATION, "connect while open")),
            },
            PacketType::ConnectResponse => match self.state {
                S::Connecting => Ok(self.complete_connect(packet)),
                S::Connected if packet.version() == self.version => Ok(Dispatch::Dropped {
                    reason: "duplicate connect response",
                }),
                S::Connected => Ok(self.fault(
                    ErrorBody::PROTOCOL_VIOLATION,
                    "conflicting connect response",
                )),
                _ => Ok(Dispatch::Dropped {
                    reason: "stale connect response",
                }),
            },
            PacketType::Data => match self.state {
                S::Connected | S::Disconnecting => self.accept_data(packet),
                S::Connecting => Ok(self.fault(ErrorBody::PROTOCOL_VIOLATION, "data before connect")),
                _ => Ok(Dispatch::Dropped {
                    reason: "data on closed channel",
                }),
            },
            PacketType::MaxData => match self.state {
                S::Connected | S::Disconnecting => Ok(self.accept_max_data(packet)),
                S::Connecting => Ok(self.fault(
                    ErrorBody::PROTOCOL_VIOLATION,
                    "credit before connect",
                )),
                _ => Ok(Dispatch::Dropped {
                    reason: "credit on closed channel",
                }),
            },
            PacketType::Disconnect => match self.state {
                S::Connected | S::Connecting | S::Disconnecting => {
                    self.discard_data();
                    self.pending = PendingControl::default();
                    self.disconnect_pending = false;
                    self.set_state(S::Disconnected);
                    Ok(Dispatch::Accepted)
                }
                _ => Ok(Dispatch::Dropped {
                    reason: "disconnect on closed channel",
                }),
            },
            PacketType::Error => {
                let code = ErrorBody::decode(packet.payload())
                    .map(|body| body.code)
                    .unwrap_or(ErrorBody::PROTOCOL_VIOLATION);
                warn!(channel = self.id, code, "peer reported channel error");
                self.discard_data();
                self.pending = PendingControl::default();
                self.disconnect_pending = false;
                self.set_state(S::Error);
                Ok(Dispatch::Accepted)
            }
        }
    }

    /// Passive open (or simultaneous open) on a peer `Connect`.
    fn accept(&mut self, packet: &Packet) -> Dispatch {
        let Ok(body) = ConnectBody::decode(packet.payload()) else {
            return self.fault(ErrorBody::PROTOCOL_VIOLATION, "malformed connect");
        };

        let version = self.config.max_version.min(body.max_version);
        if version < self.config.min_version || version < body.min_version {
            debug!(
                channel = self.id,
                local = ?(self.config.min_version, self.config.max_version),
                remote = ?(body.min_version, body.max_version),
                "no common version"
            );
            return self.fault(ErrorBody::VERSION_MISMATCH, "no common version");
        }

        self.discard_data();
        if self.lock_version(version).is_err() {
            return Dispatch::Faulted {
                reason: "buffers not empty at connect",
            };
        }
        self.credit = Credit {
            peer_max_data: u64::from(body.receive_window),
            peer_window: body.receive_window,
            advertised: self.receive.max_size() as u64,
            ..Credit::default()
        };
        self.pending.connect = false;
        self.pending.connect_response = true;
        self.disconnect_pending = false;
        self.set_state(ChannelState::Connected);
        debug!(channel = self.id, version, "channel accepted");
        Dispatch::Accepted
    }

    fn complete_connect(&mut self, packet: &Packet) -> Dispatch {
        let Ok(body) = ConnectResponseBody::decode(packet.payload()) else {
            return self.fault(ErrorBody::PROTOCOL_VIOLATION, "malformed connect response");
        };
        if !(self.config.min_version..=self.config.max_version).contains(&body.version) {
            return self.fault(ErrorBody::VERSION_MISMATCH, "unsupported version");
        }
        if self.lock_version(body.version).is_err() {
            return Dispatch::Faulted {
                reason: "buffers not empty at connect",
            };
        }
        self.credit.peer_max_data = u64::from(body.receive_window);
        self.credit.peer_window = body.receive_window;
        self.pending.connect = false;
        self.set_state(ChannelState::Connected);
        debug!(channel = self.id, version = body.version, "channel connected");
        Dispatch::Accepted
    }

    fn accept_data(&mut self, packet: &Packet) -> Result<Dispatch, MuxError> {
        if packet.version() != self.version {
            return Ok(self.fault(ErrorBody::PROTOCOL_VIOLATION, "data version mismatch"));
        }
        let body_size = packet.body_size() as u64;
        if self.credit.received + body_size > self.credit.advertised {
            return Ok(self.fault(ErrorBody::WINDOW_EXCEEDED, "peer exceeded granted credit"));
        }

        let pooled = match self.factory.adopt(packet.clone()) {
            Ok(pooled) => pooled,
            Err(PacketError::PoolExhausted { .. }) => return Err(MuxError::Busy),
            Err(_) => return Ok(self.fault(ErrorBody::PROTOCOL_VIOLATION, "invalid data packet")),
        };
        if self.receive.enqueue(pooled).is_err() {
            return Ok(self.fault(ErrorBody::WINDOW_EXCEEDED, "receive window overflow"));
        }

        self.credit.received += body_size;
        self.counters.packets_received += 1;
        self.counters.bytes_received += body_size;
        Ok(Dispatch::Accepted)
    }

    fn accept_max_data(&mut self, packet: &Packet) -> Dispatch {
        let Ok(body) = MaxDataBody::decode(packet.payload()) else {
            return self.fault(ErrorBody::PROTOCOL_VIOLATION, "malformed credit");
        };
        if body.max_data > self.credit.peer_max_data {
            trace!(channel = self.id, max_data = body.max_data, "credit raised");
            self.credit.peer_max_data = body.max_data;
        }
        Dispatch::Accepted
    }

    /// Limit to advertise now, if an update is due.
    fn max_data_due(&self) -> Option<u64> {
        match self.state {
            ChannelState::Connected | ChannelState::Disconnecting => {}
            _ => return None,
        }
        let window = self.receive.max_size() as u64;
        let limit = self.credit.consumed + window;
        let unadvertised = limit.saturating_sub(self.credit.advertised);
        if unadvertised == 0 {
            return None;
        }
        if unadvertised >= window / 2 || self.receive.is_empty() {
            Some(limit)
        } else {
            None
        }
    }

    fn data_ready(&self) -> bool {
        match self.state {
            ChannelState::Connected | ChannelState::Disconnecting => {}
            _ => return false,
        }
        self.send.peek().is_some_and(|head| {
            self.credit.sent + head.body_size() as u64 <= self.credit.peer_max_data
        })
    }

    /// Staged fragments that fit the window but were held back by the pool.
    fn promotion_due(&self) -> bool {
        match self.state {
            ChannelState::Connected | ChannelState::Disconnecting => {}
            _ => return false,
        }
        self.staged
            .front()
            .is_some_and(|next| self.send.fits(next.payload.len()))
    }

    fn closing_ready(&self) -> bool {
        self.disconnect_pending && self.send.is_empty() && self.staged.is_empty()
    }

    pub(crate) fn has_outbound(&self) -> bool {
        self.pending.connect
            || self.pending.connect_response
            || self.pending.error.is_some()
            || self.max_data_due().is_some()
            || self.data_ready()
            || self.promotion_due()
            || self.closing_ready()
    }

    /// Next packet this channel wants on the link, at most one per call.
    ///
    /// Control first, then the head `Data` packet if credit allows, then the
    /// closing `Disconnect`. Pool exhaustion leaves the intent pending.
    pub(crate) fn next_outbound(&mut self) -> Option<PooledPacket> {
        // An aborted open owes its Disconnect before anything else.
        if self.disconnect_pending && self.state != ChannelState::Disconnecting {
            return self.emit_disconnect();
        }

        if self.pending.connect_response {
            let body = ConnectResponseBody {
                version: self.version,
                receive_window: self.receive.max_size() as u32,
            };
            let packet = self.allocate_control(PacketType::ConnectResponse, body.encode())?;
            self.pending.connect_response = false;
            return Some(packet);
        }
        if self.pending.connect {
            let body = ConnectBody {
                max_version: self.config.max_version,
                min_version: self.config.min_version,
                receive_window: self.receive.max_size() as u32,
            };
            let packet = self.allocate_control(PacketType::Connect, body.encode())?;
            self.pending.connect = false;
            return Some(packet);
        }
        if let Some(code) = self.pending.error {
            let packet = self.allocate_control(PacketType::Error, ErrorBody { code }.encode())?;
            self.pending.error = None;
            return Some(packet);
        }
        if let Some(max_data) = self.max_data_due() {
            let packet =
                self.allocate_control(PacketType::MaxData, MaxDataBody { max_data }.encode())?;
            self.credit.advertised = max_data;
            return Some(packet);
        }

        if self.promotion_due() {
            self.promote_staged();
        }
        if self.data_ready() {
            let packet = self.send.dequeue()?;
            let body_size = packet.body_size() as u64;
            self.credit.sent += body_size;
            self.counters.packets_sent += 1;
            self.counters.bytes_sent += body_size;
            self.promote_staged();
            return Some(packet);
        }

        if self.closing_ready() {
            return self.emit_disconnect();
        }
        None
    }

    fn emit_disconnect(&mut self) -> Option<PooledPacket> {
        let packet = self.allocate_control(PacketType::Disconnect, Bytes::new())?;
        self.disconnect_pending = false;
        if self.state == ChannelState::Disconnecting {
            self.discard_data();
            self.set_state(ChannelState::Disconnected);
        }
        Some(packet)
    }

    fn allocate_control(&self, packet_type: PacketType, body: Bytes) -> Option<PooledPacket> {
        let version = match packet_type {
            PacketType::Connect => self.config.max_version,
            _ => self.version,
        };
        match self.factory.allocate(packet_type, self.id, version, body) {
            Ok(packet) => Some(packet),
            Err(err) => {
                trace!(channel = self.id, %packet_type, error = %err, "control packet deferred");
                None
            }
        }
    }

    fn allocate_data(&self, fragment: &Fragment) -> Result<PooledPacket, PacketError> {
        let flags = if fragment.more { FLAG_MORE_FRAGMENTS } else { 0 };
        self.factory.allocate_with_flags(
            PacketType::Data,
            self.id,
            self.version,
            flags,
            fragment.payload.clone(),
        )
    }

    fn push_send(&mut self, packet: PooledPacket) {
        // Callers check `fits` first.
        let queued = self.send.enqueue(packet);
        debug_assert!(queued.is_ok(), "fragment did not fit the send window");
    }

    /// Move staged fragments into the send window while they fit.
    fn promote_staged(&mut self) {
        while let Some(next) = self.staged.front() {
            if !self.send.fits(next.payload.len()) {
                break;
            }
            let Ok(packet) = self.allocate_data(next) else {
                break;
            };
            self.staged_bytes -= next.payload.len();
            self.staged.pop_front();
            self.push_send(packet);
        }
    }

    pub(crate) fn stats(&self) -> ChannelStats {
        ChannelStats {
            channel: self.id,
            state: self.state,
            version: self.version,
            messages_sent: self.counters.messages_sent,
            messages_received: self.counters.messages_received,
            packets_sent: self.counters.packets_sent,
            packets_received: self.counters.packets_received,
            bytes_sent: self.counters.bytes_sent,
            bytes_received: self.counters.bytes_received,
            would_block: self.counters.would_block,
            send_buffered: self.send.current_size(),
            send_window: self.send.max_size(),
            receive_buffered: self.receive.current_size(),
            receive_window: self.receive.max_size(),
            staged: self.staged_bytes,
        }
    }
}

fn split_fragments(payload: Bytes, fragment_size: usize) -> VecDeque<Fragment> {
    if payload.is_empty() {
        return VecDeque::from([Fragment {
            payload,
            more: false,
        }]);
    }

    let count = payload.len().div_ceil(fragment_size);
    (0..count)
        .map(|i| {
            let start = i * fragment_size;
            let end = (start + fragment_size).min(payload.len());
            Fragment {
                payload: payload.slice(start..end),
                more: i + 1 < count,
            }
        })
        .collect()
}

pub(crate) struct ChannelCell {
    id: ChannelId,
    inner: Mutex<ChannelImpl>,
}

impl ChannelCell {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ChannelImpl> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Application handle to a registered channel.
///
/// Cheap to clone; every clone drives the same channel. All calls are
/// non-blocking: a full window surfaces as [`ChannelError::WouldBlock`] and an
/// empty receive buffer as `Ok(None)`.
#[derive(Clone)]
pub struct Channel {
    cell: Arc<ChannelCell>,
}

impl Channel {
    pub(crate) fn new(inner: ChannelImpl) -> Self {
        Self {
            cell: Arc::new(ChannelCell {
                id: inner.id,
                inner: Mutex::new(inner),
            }),
        }
    }

    pub(crate) fn cell(&self) -> &ChannelCell {
        &self.cell
    }

    pub fn id(&self) -> ChannelId {
        self.cell.id
    }

    pub fn state(&self) -> ChannelState {
        self.cell.lock().state
    }

    /// Negotiated protocol version, 0 before the first connect.
    pub fn version(&self) -> i16 {
        self.cell.lock().version
    }

    /// Start connecting. The `Connect` goes out on the next drain.
    pub fn open(&self) -> Result<(), ChannelError> {
        self.cell.lock().open()
    }

    /// Close gracefully once buffered data has been sent, or abort a pending open.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.cell.lock().close()
    }

    /// Queue one application write.
    pub fn send(&self, payload: &[u8]) -> Result<(), ChannelError> {
        self.send_bytes(Bytes::copy_from_slice(payload))
    }

    /// Queue one application write without copying it.
    pub fn send_bytes(&self, payload: Bytes) -> Result<(), ChannelError> {
        self.cell.lock().send(payload)
    }

    /// Take the next complete message, if one has arrived.
    pub fn receive(&self) -> Result<Option<Bytes>, ChannelError> {
        self.cell.lock().receive()
    }

    /// Force the channel back to `Disconnected`, discarding everything.
    pub fn reset(&self) {
        self.cell.lock().reset();
    }

    pub fn stats(&self) -> ChannelStats {
        self.cell.lock().stats()
    }

    /// True once the channel has been removed from its mux.
    pub fn is_detached(&self) -> bool {
        !self.cell.lock().registered
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.cell.id)
            .field("state", &self.state())
            .finish()
    }
}
