//! Control message payloads: `ServerInfo`, `Response`, `MessageString`.

use crate::protocol::{ByteReader, SERVER_NAME_LEN, Version};
use crate::types::{ServerInfo, ServerMessage};
use crate::Result;

/// Decode a `ServerInfo` payload.
pub fn decode_server_info(payload: &[u8]) -> Result<ServerInfo> {
    let mut reader = ByteReader::new(payload);
    let application_name = reader.read_fixed_str(SERVER_NAME_LEN, "server application name")?;
    let server_version = Version::from_bytes(read_version(&mut reader, "server version")?);
    let stream_version = Version::from_bytes(read_version(&mut reader, "NatNet stream version")?);
    Ok(ServerInfo { application_name, server_version, stream_version })
}

fn read_version(reader: &mut ByteReader<'_>, context: &str) -> Result<[u8; 4]> {
    let bytes = reader.take(4, context)?;
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode a `Response` payload; `declared_len` comes from the packet header.
pub fn decode_response(payload: &[u8], declared_len: u16) -> Result<ServerMessage> {
    let mut reader = ByteReader::new(payload);
    if declared_len == 4 {
        return Ok(ServerMessage::ResponseCode(reader.read_i32("response code")?));
    }
    Ok(ServerMessage::Response(reader.read_cstr("response text")?))
}

/// Decode a `MessageString` payload.
pub fn decode_message_string(payload: &[u8]) -> Result<ServerMessage> {
    Ok(ServerMessage::Message(ByteReader::new(payload).read_cstr("server message")?))
}
