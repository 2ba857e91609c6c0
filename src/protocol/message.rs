//! Message identifiers and packet framing.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::codec::{ByteReader, ByteWriter};
use crate::Result;

/// Size of the `[u16 id][u16 length]` header preceding every payload.
pub const HEADER_LEN: usize = 4;

/// Largest datagram the receive loops accept.
pub const MAX_PACKET_SIZE: usize = 65_503;

/// NatNet message identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageId {
    Connect = 0,
    ServerInfo = 1,
    Request = 2,
    Response = 3,
    RequestModelDef = 4,
    ModelDef = 5,
    RequestFrameOfData = 6,
    FrameOfData = 7,
    MessageString = 8,
    Disconnect = 9,
    KeepAlive = 10,
    UnrecognizedRequest = 100,
}

impl MessageId {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => MessageId::Connect,
            1 => MessageId::ServerInfo,
            2 => MessageId::Request,
            3 => MessageId::Response,
            4 => MessageId::RequestModelDef,
            5 => MessageId::ModelDef,
            6 => MessageId::RequestFrameOfData,
            7 => MessageId::FrameOfData,
            8 => MessageId::MessageString,
            9 => MessageId::Disconnect,
            10 => MessageId::KeepAlive,
            100 => MessageId::UnrecognizedRequest,
            _ => return None,
        })
    }

    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Requests that go out with no body and a zero length field.
    pub const fn has_empty_body(self) -> bool {
        matches!(
            self,
            MessageId::RequestModelDef
                | MessageId::RequestFrameOfData
                | MessageId::KeepAlive
                | MessageId::Disconnect
        )
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}

/// Header of a received or outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw message id; may not map to a known [`MessageId`].
    pub message_id: u16,
    /// Declared payload length in bytes.
    pub payload_len: u16,
}

impl PacketHeader {
    pub fn new(id: MessageId, payload_len: u16) -> Self {
        Self { message_id: id.as_u16(), payload_len }
    }

    /// Decode the header at the start of `packet`.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(packet);
        let message_id = reader.read_u16("packet header message id")?;
        let payload_len = reader.read_u16("packet header length")?;
        Ok(Self { message_id, payload_len })
    }

    pub fn id(&self) -> Option<MessageId> {
        MessageId::from_u16(self.message_id)
    }

    pub fn write(&self, writer: &mut ByteWriter) {
        writer.put_u16(self.message_id).put_u16(self.payload_len);
    }
}

/// Split a datagram into its header and the bytes after it.
pub fn split_packet(packet: &[u8]) -> Result<(PacketHeader, &[u8])> {
    let header = PacketHeader::parse(packet)?;
    Ok((header, &packet[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_map_both_ways() {
        for raw in [0u16, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 100] {
            let id = MessageId::from_u16(raw).unwrap();
            assert_eq!(id.as_u16(), raw);
        }
        assert_eq!(MessageId::from_u16(11), None);
        assert_eq!(MessageId::from_u16(99), None);
    }

    #[test]
    fn header_parses_little_endian() {
        let packet = [0x07, 0x00, 0x10, 0x01, 0xAA];
        let (header, payload) = split_packet(&packet).unwrap();
        assert_eq!(header.id(), Some(MessageId::FrameOfData));
        assert_eq!(header.payload_len, 0x0110);
        assert_eq!(payload, &[0xAA]);
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(PacketHeader::parse(&[0x01, 0x00, 0x05]).is_err());
    }

    #[test]
    fn empty_body_requests() {
        assert!(MessageId::KeepAlive.has_empty_body());
        assert!(MessageId::Disconnect.has_empty_body());
        assert!(!MessageId::Connect.has_empty_body());
        assert!(!MessageId::Request.has_empty_body());
    }
}
