//! Payload decoders.
//!
//! Decoders are pure functions of a payload (header already stripped) and
//! the active bitstream [`Version`](crate::protocol::Version). They return
//! the number of bytes consumed along with the decoded value, and never
//! retain state between packets.

mod control;
mod description;
mod frame;

pub use control::{decode_message_string, decode_response, decode_server_info};
pub use description::decode_descriptions;
pub use frame::{FrameDecoder, decode_frame};
pub(crate) use frame::frame_error;
