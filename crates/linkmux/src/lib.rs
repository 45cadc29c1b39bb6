//! Multiplexed, flow-controlled channels over a single packet link.
//!
//! linkmux lets a host and a target run many independent, ordered byte
//! channels over one transport, each with its own send and receive window.
//!
//! # Crate Structure
//!
//! - [`packet`]: wire header, control bodies, the bounded packet pool
//! - [`transport`]: the [`transport::PacketDriver`] seam plus stream and loopback drivers
//! - [`mux`]: channels, windows, credit and the session coordinator

/// Re-export packet types.
pub mod packet {
    pub use linkmux_packet::*;
}

/// Re-export transport types.
pub mod transport {
    pub use linkmux_transport::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use linkmux_mux::*;
}

pub use linkmux_mux::{
    Channel, ChannelError, ChannelState, ChannelStats, Mux, MuxConfig, MuxError, Session,
    SessionError,
};
