//! Message dispatch: routes each datagram by message id to its decoder and
//! hands the result to listeners and subscription channels.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::Channel;
use crate::decode::{
    FrameDecoder, decode_descriptions, decode_message_string, decode_response, decode_server_info,
    frame_error,
};
use crate::protocol::{MessageId, PacketHeader, Quat, Vec3, split_packet};
use crate::session::SessionState;
use crate::types::{DescriptionSet, Frame, FrameSummary, RigidBodyFrame, ServerMessage};

/// Receives every decoded frame.
pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;
/// Receives frame-level counts after each frame.
pub type FrameSummaryCallback = Arc<dyn Fn(&FrameSummary) + Send + Sync>;
/// Receives (id, position, orientation) for every rigid body and bone.
pub type RigidBodyCallback = Arc<dyn Fn(i32, Vec3, Quat) + Send + Sync>;
/// Receives every description set, complete or partial.
pub type DescriptionCallback = Arc<dyn Fn(&DescriptionSet) + Send + Sync>;
/// Receives responses and messages from the server.
pub type ServerMessageCallback = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Registered listeners; all optional.
#[derive(Clone, Default)]
pub struct Listeners {
    pub frame: Option<FrameCallback>,
    pub frame_summary: Option<FrameSummaryCallback>,
    pub rigid_body: Option<RigidBodyCallback>,
    pub descriptions: Option<DescriptionCallback>,
    pub server_message: Option<ServerMessageCallback>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("frame", &self.frame.is_some())
            .field("frame_summary", &self.frame_summary.is_some())
            .field("rigid_body", &self.rigid_body.is_some())
            .field("descriptions", &self.descriptions.is_some())
            .field("server_message", &self.server_message.is_some())
            .finish()
    }
}

pub type FrameSender = Arc<watch::Sender<Option<Arc<Frame>>>>;
pub type DescriptionSender = Arc<watch::Sender<Option<Arc<DescriptionSet>>>>;

/// Per-loop packet counts keyed by raw message id.
#[derive(Debug, Default)]
pub struct MessageCounters {
    counts: HashMap<u16, u64>,
}

impl MessageCounters {
    /// Count one more packet of `message_id`, returning the new total.
    pub fn record(&mut self, message_id: u16) -> u64 {
        let count = self.counts.entry(message_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, message_id: u16) -> u64 {
        self.counts.get(&message_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Shared by both receive loops.
pub struct Dispatcher {
    session: Arc<SessionState>,
    listeners: Listeners,
    frames: FrameSender,
    descriptions: DescriptionSender,
}

impl Dispatcher {
    pub fn new(
        session: Arc<SessionState>,
        listeners: Listeners,
        frames: FrameSender,
        descriptions: DescriptionSender,
    ) -> Self {
        Self { session, listeners, frames, descriptions }
    }

    /// Decode and deliver one datagram. Returns the message id when known.
    pub fn dispatch(
        &self,
        channel: Channel,
        packet: &[u8],
        counters: &mut MessageCounters,
    ) -> Option<MessageId> {
        let (header, payload) = match split_packet(packet) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Dropping {} byte datagram on {} channel: {}", packet.len(), channel, e);
                return None;
            }
        };
        let count = counters.record(header.message_id);

        let Some(id) = header.id() else {
            debug!(
                "Ignoring unknown message id {} ({} bytes) on {} channel",
                header.message_id, header.payload_len, channel
            );
            return None;
        };
        trace!("{} on {} channel: {} byte payload (#{})", id, channel, header.payload_len, count);

        match id {
            MessageId::FrameOfData => self.handle_frame(payload, count),
            MessageId::ModelDef => self.handle_descriptions(payload),
            MessageId::ServerInfo => self.handle_server_info(payload),
            MessageId::Response => self.handle_response(header, payload),
            MessageId::MessageString => match decode_message_string(payload) {
                Ok(message) => self.deliver_message(message),
                Err(e) => warn!("Malformed message string: {}", e),
            },
            MessageId::UnrecognizedRequest => {
                debug!("Server did not recognize the last request");
                self.deliver_message(ServerMessage::UnrecognizedRequest);
            }
            other => debug!("Ignoring client-side message {} on {} channel", other, channel),
        }
        Some(id)
    }

    /// Whether the n-th frame should be logged in full.
    fn frame_is_verbose(&self, count: u64) -> bool {
        match self.session.print_level() {
            0 => false,
            level => count % u64::from(level) == 0,
        }
    }

    fn handle_frame(&self, payload: &[u8], count: u64) {
        let version = self.session.requested_version();
        let result = match &self.listeners.rigid_body {
            Some(callback) => {
                let mut observer =
                    |rb: &RigidBodyFrame| callback(rb.id, rb.position, rb.orientation);
                FrameDecoder::new(version).with_rigid_body_observer(&mut observer).decode(payload)
            }
            None => FrameDecoder::new(version).decode(payload),
        };

        let (consumed, frame) = match result {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping malformed frame (bitstream {}): {}", version, frame_error(e, payload.len()));
                return;
            }
        };
        // Leftover bytes mean the gates did not match the sender's bitstream.
        if consumed != payload.len() {
            warn!(
                "Dropping frame {} (bitstream {}): decoded {} of {} payload bytes",
                frame.frame_number(),
                version,
                consumed,
                payload.len()
            );
            return;
        }

        let summary = frame.summary();
        if self.frame_is_verbose(count) {
            debug!("{}", summary);
            trace!("{:?}", frame);
        }
        if let Some(callback) = &self.listeners.frame_summary {
            callback(&summary);
        }

        let frame = Arc::new(frame);
        if let Some(callback) = &self.listeners.frame {
            callback(&frame);
        }
        self.frames.send_replace(Some(frame));
    }

    fn handle_descriptions(&self, payload: &[u8]) {
        let version = self.session.requested_version();
        let set = match decode_descriptions(payload, version) {
            Ok((_, set)) => set,
            Err(e) => {
                warn!("Dropping malformed model definitions (bitstream {}): {}", version, e);
                return;
            }
        };
        debug!(
            "Model definitions: {} entries{}",
            set.len(),
            if set.is_complete() { "" } else { " (partial)" }
        );
        if self.session.print_level() > 0 {
            trace!("{:?}", set);
        }

        if let Some(callback) = &self.listeners.descriptions {
            callback(&set);
        }
        self.descriptions.send_replace(Some(Arc::new(set)));
    }

    fn handle_server_info(&self, payload: &[u8]) {
        match decode_server_info(payload) {
            Ok(info) => self.session.apply_server_info(info),
            Err(e) => warn!("Malformed server info: {}", e),
        }
    }

    fn handle_response(&self, header: PacketHeader, payload: &[u8]) {
        match decode_response(payload, header.payload_len) {
            Ok(message) => {
                debug!("Command response: {}", message);
                self.deliver_message(message);
            }
            Err(e) => warn!("Malformed command response: {}", e),
        }
    }

    fn deliver_message(&self, message: ServerMessage) {
        trace!("Server message: {}", message);
        if let Some(callback) = &self.listeners.server_message {
            callback(&message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportMode;
    use crate::protocol::Version;
    use crate::test_utils::{
        DescriptionFixture, FrameFixture, encode_frame, packet, sample_frame, server_info_payload,
    };
    use std::sync::Mutex;

    struct Harness {
        dispatcher: Dispatcher,
        session: Arc<SessionState>,
        frames: watch::Receiver<Option<Arc<Frame>>>,
        descriptions: watch::Receiver<Option<Arc<DescriptionSet>>>,
    }

    fn harness(mode: TransportMode, listeners: Listeners) -> Harness {
        let session = Arc::new(SessionState::new(mode, 0));
        let (frame_tx, frames) = watch::channel(None);
        let (desc_tx, descriptions) = watch::channel(None);
        let dispatcher =
            Dispatcher::new(Arc::clone(&session), listeners, Arc::new(frame_tx), Arc::new(desc_tx));
        Harness { dispatcher, session, frames, descriptions }
    }

    fn server_info_packet(stream: Version) -> Vec<u8> {
        packet(MessageId::ServerInfo, &server_info_payload("Motive", Version::new(3, 1, 0, 0), stream))
    }

    #[test]
    fn server_info_updates_session() {
        let h = harness(TransportMode::Unicast, Listeners::default());
        let mut counters = MessageCounters::default();
        let id = h.dispatcher.dispatch(Channel::Command, &server_info_packet(Version::new(4, 0, 0, 0)), &mut counters);

        assert_eq!(id, Some(MessageId::ServerInfo));
        assert!(h.session.has_server_info());
        assert!(h.session.can_change_bitstream());
        assert_eq!(h.session.requested_version(), Version::new(4, 0, 0, 0));
        assert_eq!(counters.get(1), 1);
    }

    #[test]
    fn frames_reach_listeners_and_watch() {
        let seen_bodies = Arc::new(Mutex::new(Vec::new()));
        let summaries = Arc::new(Mutex::new(Vec::new()));
        let bodies = Arc::clone(&seen_bodies);
        let sums = Arc::clone(&summaries);
        let listeners = Listeners {
            rigid_body: Some(Arc::new(move |id: i32, _: Vec3, _: Quat| bodies.lock().unwrap().push(id))),
            frame_summary: Some(Arc::new(move |s: &FrameSummary| sums.lock().unwrap().push(*s))),
            ..Default::default()
        };
        let h = harness(TransportMode::Multicast, listeners);
        let version = Version::new(3, 1, 0, 0);
        h.session.set_requested_version(version);

        let frame = sample_frame(version);
        let mut counters = MessageCounters::default();
        h.dispatcher.dispatch(
            Channel::Data,
            &packet(MessageId::FrameOfData, &encode_frame(&frame, version)),
            &mut counters,
        );

        assert_eq!(*seen_bodies.lock().unwrap(), vec![1, 2, 65537, 65538]);
        assert_eq!(summaries.lock().unwrap()[0].frame_number, 4242);
        let latest = h.frames.borrow().clone().unwrap();
        assert_eq!(*latest, frame);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let h = harness(TransportMode::Multicast, Listeners::default());
        let version = Version::new(3, 0, 0, 0);
        h.session.set_requested_version(version);
        let payload = FrameFixture::new(version).rigid_body(1, [0.0; 3], [0.0; 4], true).build();

        let mut counters = MessageCounters::default();
        h.dispatcher.dispatch(
            Channel::Data,
            &packet(MessageId::FrameOfData, &payload[..payload.len() - 2]),
            &mut counters,
        );
        assert!(h.frames.borrow().is_none());
        assert_eq!(counters.get(7), 1);
    }

    #[test]
    fn frames_with_trailing_bytes_are_dropped() {
        let delivered = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&delivered);
        let listeners = Listeners {
            frame: Some(Arc::new(move |_: &Frame| *count.lock().unwrap() += 1)),
            ..Default::default()
        };
        let h = harness(TransportMode::Multicast, listeners);
        let version = Version::new(3, 0, 0, 0);
        h.session.set_requested_version(version);

        let mut payload = encode_frame(&sample_frame(version), version);
        let decoded_len = payload.len();
        payload.extend_from_slice(&[0u8; 12]);
        let bytes = packet(MessageId::FrameOfData, &payload);
        assert_eq!(PacketHeader::parse(&bytes).unwrap().payload_len as usize, decoded_len + 12);

        let mut counters = MessageCounters::default();
        h.dispatcher.dispatch(Channel::Data, &bytes, &mut counters);
        assert_eq!(*delivered.lock().unwrap(), 0);
        assert!(h.frames.borrow().is_none());
        assert_eq!(counters.get(7), 1);

        // The same frame without the padding is delivered.
        h.dispatcher.dispatch(Channel::Data, &packet(MessageId::FrameOfData, &payload[..decoded_len]), &mut counters);
        assert_eq!(*delivered.lock().unwrap(), 1);
        assert!(h.frames.borrow().is_some());
    }

    #[test]
    fn descriptions_are_published() {
        let h = harness(TransportMode::Multicast, Listeners::default());
        h.session.set_requested_version(Version::new(3, 0, 0, 0));
        let bytes = DescriptionFixture::new(Version::new(3, 0, 0, 0)).marker_set("Wand", &["A", "B"]).build_packet();

        h.dispatcher.dispatch(Channel::Command, &bytes, &mut MessageCounters::default());
        let set = h.descriptions.borrow().clone().unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn responses_and_messages_reach_listener() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        let listeners = Listeners {
            server_message: Some(Arc::new(move |m: &ServerMessage| sink.lock().unwrap().push(m.clone()))),
            ..Default::default()
        };
        let h = harness(TransportMode::Unicast, listeners);
        let mut counters = MessageCounters::default();

        h.dispatcher.dispatch(Channel::Command, &packet(MessageId::Response, &0i32.to_le_bytes()), &mut counters);
        h.dispatcher.dispatch(Channel::Command, &packet(MessageId::Response, b"Bitstream set\0"), &mut counters);
        h.dispatcher.dispatch(Channel::Command, &packet(MessageId::MessageString, b"hello\0"), &mut counters);
        h.dispatcher.dispatch(Channel::Command, &packet(MessageId::UnrecognizedRequest, &[]), &mut counters);

        assert_eq!(
            *messages.lock().unwrap(),
            vec![
                ServerMessage::ResponseCode(0),
                ServerMessage::Response("Bitstream set".into()),
                ServerMessage::Message("hello".into()),
                ServerMessage::UnrecognizedRequest,
            ]
        );
        assert_eq!(counters.total(), 4);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let h = harness(TransportMode::Multicast, Listeners::default());
        let mut counters = MessageCounters::default();
        assert_eq!(h.dispatcher.dispatch(Channel::Data, &[0x2a, 0x00, 0x00, 0x00], &mut counters), None);
        assert_eq!(h.dispatcher.dispatch(Channel::Data, &[0x01], &mut counters), None);
        assert_eq!(counters.get(42), 1);
    }

    #[test]
    fn print_level_selects_every_nth_frame() {
        let h = harness(TransportMode::Multicast, Listeners::default());
        assert!(!h.dispatcher.frame_is_verbose(3));
        h.session.set_print_level(1);
        assert!(h.dispatcher.frame_is_verbose(7));
        h.session.set_print_level(3);
        assert!(!h.dispatcher.frame_is_verbose(2));
        assert!(h.dispatcher.frame_is_verbose(3));
        assert!(h.dispatcher.frame_is_verbose(6));
    }
}
