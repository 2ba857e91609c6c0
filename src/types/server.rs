//! Control-channel values: server identity and server messages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{UNSET_APP_NAME, Version};

/// Identity advertised by the server in `ServerInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub application_name: String,
    pub server_version: Version,
    /// NatNet stream version the server speaks.
    pub stream_version: Version,
}

impl ServerInfo {
    /// `true` once a real `ServerInfo` has been received.
    pub fn is_known(&self) -> bool {
        self.application_name != UNSET_APP_NAME && !self.server_version.is_unset()
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            application_name: UNSET_APP_NAME.to_string(),
            server_version: Version::UNSET,
            stream_version: Version::UNSET,
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (NatNet {})",
            self.application_name, self.server_version, self.stream_version
        )
    }
}

/// Non-data messages received on either channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// `Response` carrying a 4-byte result code.
    ResponseCode(i32),
    /// `Response` carrying text.
    Response(String),
    /// `MessageString` from the server.
    Message(String),
    /// The server did not recognize the last request.
    UnrecognizedRequest,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::ResponseCode(code) => write!(f, "response code {}", code),
            ServerMessage::Response(text) => write!(f, "response '{}'", text),
            ServerMessage::Message(text) => write!(f, "message '{}'", text),
            ServerMessage::UnrecognizedRequest => f.write_str("unrecognized request"),
        }
    }
}
