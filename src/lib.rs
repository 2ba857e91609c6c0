//! Type-safe Rust client for the NatNet motion-capture streaming protocol.
//!
//! NatNet servers (OptiTrack Motive and compatible tools) publish tracking
//! data over UDP: frames of marker, rigid-body, skeleton and analog data on
//! a data channel, and model definitions plus command replies on a command
//! channel. This crate decodes every bitstream version from 1.x to 4.x and
//! delivers the results through callbacks or async streams.
//!
//! # Features
//!
//! - **Version-aware decoding**: every optional field is gated on the
//!   bitstream version the server streams with
//! - **Multicast and unicast**: including keep-alives and bitstream changes
//! - **Two delivery styles**: listeners on the receive threads, or
//!   latest-wins streams with optional rate limiting
//! - **Pure decoders**: [`decode`] works on byte slices, no sockets needed
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use natnet::{ClientConfig, NatNetClient, UpdateRate};
//!
//! #[tokio::main]
//! async fn main() -> natnet::Result<()> {
//!     let mut client = NatNetClient::new(ClientConfig::default())?;
//!     client.run()?;
//!
//!     let mut frames = client.subscribe(UpdateRate::Max(30));
//!     while let Some(frame) = frames.next().await {
//!         println!("{}", frame.summary());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Decoding captured packets
//!
//! ```rust
//! use natnet::decode::decode_frame;
//! use natnet::protocol::{Version, split_packet};
//!
//! fn frame_number(packet: &[u8]) -> natnet::Result<i32> {
//!     let (_, payload) = split_packet(packet)?;
//!     let (_, frame) = decode_frame(payload, Version::bitstream(4, 1))?;
//!     Ok(frame.frame_number())
//! }
//! # assert!(frame_number(&[7, 0, 0, 0]).is_err());
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire format
pub mod decode;
pub mod protocol;

// Client
mod client;
pub mod command;
pub mod config;
mod session;
pub mod stream;
pub mod transport;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use client::{ConnectionState, NatNetClient};
pub use command::{CommandChannel, DatagramSink};
pub use config::{ClientConfig, ResyncTiming, TransportMode};
pub use protocol::{MessageId, Version};
pub use session::SessionState;
