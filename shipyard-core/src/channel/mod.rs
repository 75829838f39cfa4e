//! Framed Channel
//!
//! Bidirectional packet transport between the coordinator and build workers.
//! One connection multiplexes many logical channels; every frame carries the
//! channel name, the message kind and the payload.
//!
//! - [`packet`]: the immutable [`Packet`] value
//! - [`codec`]: length-delimited wire framing
//! - [`connection`]: FIFO writer + reader task over any async byte stream
//! - [`router`]: per-channel handler dispatch

pub mod codec;
pub mod connection;
pub mod error;
pub mod packet;
pub mod router;

pub use codec::PacketCodec;
pub use connection::{Connection, FramedChannel};
pub use error::ChannelError;
pub use packet::{MessageKind, Packet};
pub use router::{ChannelHandler, Router};

/// Well-known channel names
pub mod names {
    /// Worker registration, first packet on every connection
    pub const HANDSHAKE: &str = "handshake";
    /// Periodic worker liveness pings
    pub const HEARTBEAT: &str = "heartbeat";
    /// Build dispatch and completion traffic
    pub const BUILD_RUNNER: &str = "build-runner";
    /// Coordinator-initiated control messages (e.g. "shutdown")
    pub const CONTROL: &str = "control";
}
