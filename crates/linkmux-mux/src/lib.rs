//! Channel multiplexing over a single packet link.
//!
//! A [`Mux`] owns a table of channels, each with a bounded send and receive
//! window. Applications talk to [`Channel`] handles; a [`Session`] moves
//! packets between the mux and a [`linkmux_transport::PacketDriver`].

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod mux;
pub mod session;

pub use buffer::{Direction, Inbound, Outbound, PacketBuffer, ReceiveBuffer, SendBuffer};
pub use channel::{Channel, ChannelState, ChannelStats};
pub use config::{
    MuxConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_VERSION, DEFAULT_MAX_WRITE_SIZE,
    DEFAULT_MIN_VERSION, DEFAULT_WINDOW,
};
pub use error::{BufferError, ChannelError, MuxError, Rejected, Result, SessionError};
pub use mux::{Dispatch, Drain, Mux};
pub use session::{Session, SessionStats};
