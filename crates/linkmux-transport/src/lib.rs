//! Packet driver abstraction.
//!
//! The multiplexer never touches the physical link directly. It hands whole
//! encoded packets to a [`PacketDriver`] and asks it for whole packets back:
//! - [`StreamDriver`] frames packets on any `Read + Write` byte stream
//!   (serial port, Unix socket, TCP)
//! - [`LoopbackDriver`] connects two in-process endpoints over channels
//!
//! Native handle teardown is reached through the [`Closeable`] hook.

pub mod error;
pub mod loopback;
pub mod stream;
pub mod traits;

pub use error::{Result, TransportError};
pub use loopback::LoopbackDriver;
pub use stream::{StreamDriver, DEFAULT_POLL_TIMEOUT};
pub use traits::{Closeable, PacketDriver};
