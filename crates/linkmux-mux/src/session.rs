//! Drives a [`Mux`] over a [`PacketDriver`].
//!
//! A session is the coordinator context: it is the only caller of
//! `dispatch_inbound` and `drain_outbound` for its mux. Application threads
//! keep using their [`crate::Channel`] handles concurrently.

use std::sync::Arc;

use bytes::BytesMut;
use linkmux_packet::{decode_packet, Packet};
use linkmux_transport::{PacketDriver, TransportError};
use tracing::{debug, trace, warn};

use crate::error::{MuxError, SessionError};
use crate::mux::{Dispatch, Mux};

/// Traffic counters for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SessionStats {
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Inbound packets dropped by the mux.
    pub dropped: u64,
    /// Inbound packets that faulted their channel.
    pub faulted: u64,
    /// Inbound packets held back because the pool was exhausted.
    pub busy: u64,
}

pub struct Session<D> {
    mux: Arc<Mux>,
    driver: D,
    pending_inbound: Option<Packet>,
    scratch: BytesMut,
    stats: SessionStats,
}

impl<D: PacketDriver> Session<D> {
    pub fn new(mux: Arc<Mux>, driver: D) -> Self {
        debug!(driver = driver.driver_name(), "session started");
        Self {
            mux,
            driver,
            pending_inbound: None,
            scratch: BytesMut::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Read and dispatch every packet the driver has ready.
    ///
    /// Returns the number of packets dispatched. Stops early, without error,
    /// when the pool is exhausted; the held packet is retried first next time.
    pub fn poll_inbound(&mut self) -> Result<usize, SessionError> {
        let mut dispatched = 0;

        if let Some(packet) = self.pending_inbound.take() {
            if !self.dispatch(packet)? {
                return Ok(dispatched);
            }
            dispatched += 1;
        }

        loop {
            let raw = match self.driver.receive_packet() {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(dispatched),
                Err(err) => return Err(self.fail(err)),
            };
            let packet = match decode_packet(&raw) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(error = %err, len = raw.len(), "undecodable packet, resetting mux");
                    self.mux.reset();
                    return Err(SessionError::Packet(err));
                }
            };
            self.stats.packets_in += 1;
            self.stats.bytes_in += raw.len() as u64;

            if !self.dispatch(packet)? {
                return Ok(dispatched);
            }
            dispatched += 1;
        }
    }

    /// Dispatch one packet. Returns false if it was held back.
    fn dispatch(&mut self, packet: Packet) -> Result<bool, SessionError> {
        match self.mux.dispatch_inbound(&packet) {
            Ok(Dispatch::Accepted) => Ok(true),
            Ok(Dispatch::Dropped { .. }) => {
                self.stats.dropped += 1;
                Ok(true)
            }
            Ok(Dispatch::Faulted { .. }) => {
                self.stats.faulted += 1;
                Ok(true)
            }
            Err(MuxError::Busy) => {
                trace!(channel = packet.channel_id(), "pool exhausted, holding packet");
                self.stats.busy += 1;
                self.pending_inbound = Some(packet);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Transmit drain passes until one comes back empty.
    ///
    /// Returns the number of packets transmitted. Each pooled packet is
    /// released once its bytes are on the driver.
    pub fn flush(&mut self) -> Result<usize, SessionError> {
        let mux = Arc::clone(&self.mux);
        let mut sent = 0;
        loop {
            let mut pass = 0;
            for packet in mux.drain_outbound() {
                self.scratch.clear();
                packet.encode(&mut self.scratch);
                drop(packet);

                if let Err(err) = self.driver.transmit_packet(&self.scratch) {
                    return Err(self.fail(err));
                }
                self.stats.packets_out += 1;
                self.stats.bytes_out += self.scratch.len() as u64;
                pass += 1;
            }
            if pass == 0 {
                return Ok(sent);
            }
            sent += pass;
        }
    }

    /// One coordinator step: inbound first, then outbound.
    pub fn run_once(&mut self) -> Result<(usize, usize), SessionError> {
        let received = self.poll_inbound()?;
        let sent = self.flush()?;
        Ok((received, sent))
    }

    /// Reset the mux and close the driver.
    pub fn shutdown(mut self) -> Result<SessionStats, SessionError> {
        self.mux.reset();
        self.pending_inbound = None;
        self.driver.close()?;
        debug!(
            driver = self.driver.driver_name(),
            packets_in = self.stats.packets_in,
            packets_out = self.stats.packets_out,
            "session shut down"
        );
        Ok(self.stats)
    }

    fn fail(&mut self, err: TransportError) -> SessionError {
        warn!(
            driver = self.driver.driver_name(),
            error = %err,
            "transport failed, resetting mux"
        );
        self.pending_inbound = None;
        self.mux.reset();
        SessionError::Transport(err)
    }
}

impl<D> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mux", &self.mux)
            .field("pending_inbound", &self.pending_inbound.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
