//! NatNet wire protocol primitives.
//!
//! - [`codec`]: little-endian cursor reader/writer and string handling
//! - [`message`]: message ids and the 4-byte packet header
//! - [`version`]: bitstream version and its decode gates

pub mod codec;
pub mod message;
pub mod version;

pub use codec::{ByteReader, ByteWriter, Quat, Vec3};
pub use message::{HEADER_LEN, MAX_PACKET_SIZE, MessageId, PacketHeader, split_packet};
pub use version::Version;

/// Default command port.
pub const DEFAULT_COMMAND_PORT: u16 = 1510;

/// Default data port.
pub const DEFAULT_DATA_PORT: u16 = 1511;

/// Default multicast group.
pub const DEFAULT_MULTICAST_GROUP: &str = "239.255.42.99";

/// Application name reported before any `ServerInfo` arrives.
pub const UNSET_APP_NAME: &str = "Not Set";

/// Width of the NUL-padded application name in `ServerInfo`.
pub const SERVER_NAME_LEN: usize = 256;
