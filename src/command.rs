//! Command channel: request framing, retried commands, keep-alives and
//! bitstream version negotiation.
//!
//! Sends run synchronously on the caller's thread. Replies arrive through the
//! command receive loop and reach the server-message listener.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::ResyncTiming;
use crate::protocol::{ByteWriter, MAX_PACKET_SIZE, MessageId, PacketHeader, Version};
use crate::session::SessionState;
use crate::{NatNetError, Result};

/// Attempts made by [`CommandChannel::send_command`].
pub const COMMAND_ATTEMPTS: u32 = 3;

/// Greeting carried by `Connect`.
pub const CONNECT_GREETING: &str = "Ping";

/// Commands sent after a bitstream change, following the first `TimelinePlay`
/// and its settle pause.
pub const RESYNC_COMMANDS: [&str; 4] =
    ["TimelinePlay", "TimelineStop", "SetPlaybackCurrentFrame,0", "TimelineStop"];

/// Anything that can send a datagram to an address.
pub trait DatagramSink: Send + Sync {
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.send_to(buf, target)
    }
}

impl<T: DatagramSink + ?Sized> DatagramSink for Arc<T> {
    fn send_datagram(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        (**self).send_datagram(buf, target)
    }
}

/// Frame a request as `[u16 id][u16 len][body][NUL]`.
///
/// Requests without a body (`RequestModelDef`, `RequestFrameOfData`,
/// `KeepAlive`, `Disconnect`) ignore `body` and declare length 0. `Connect`
/// always carries the greeting. Everything else carries `body` with the
/// terminator counted in the length.
pub fn compose_request(command: MessageId, body: &str) -> Result<Vec<u8>> {
    let body = match command {
        MessageId::Connect => CONNECT_GREETING,
        id if id.has_empty_body() => "",
        _ => body,
    };
    let declared = if command.has_empty_body() { 0 } else { body.len() + 1 };
    if declared > MAX_PACKET_SIZE - 4 {
        return Err(NatNetError::invalid_config(
            "command",
            format!("{} byte body exceeds the maximum packet size", body.len()),
        ));
    }

    let mut writer = ByteWriter::with_capacity(body.len() + 5);
    PacketHeader::new(command, declared as u16).write(&mut writer);
    writer.put_cstr(body);
    Ok(writer.into_inner())
}

/// Synchronous command sender bound to the command socket.
pub struct CommandChannel<S: DatagramSink = UdpSocket> {
    sink: Arc<S>,
    server: SocketAddr,
    session: Arc<SessionState>,
    resync: ResyncTiming,
}

impl<S: DatagramSink> Clone for CommandChannel<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            server: self.server,
            session: Arc::clone(&self.session),
            resync: self.resync,
        }
    }
}

impl<S: DatagramSink> CommandChannel<S> {
    pub fn new(sink: Arc<S>, server: SocketAddr, session: Arc<SessionState>, resync: ResyncTiming) -> Self {
        Self { sink, server, session, resync }
    }

    /// Server command address.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Send one framed request to `target`, returning the bytes sent.
    pub fn send_request(&self, command: MessageId, body: &str, target: SocketAddr) -> Result<usize> {
        let packet = compose_request(command, body)?;
        let sent = self
            .sink
            .send_datagram(&packet, target)
            .map_err(|e| NatNetError::transport(format!("send {} to {}", command, target), e))?;
        trace!("Sent {} ({} bytes) to {}", command, sent, target);
        Ok(sent)
    }

    /// Send a text command to the server, retrying up to three times.
    pub fn send_command(&self, command: &str) -> Result<usize> {
        let mut last_error = None;
        for attempt in 1..=COMMAND_ATTEMPTS {
            match self.send_request(MessageId::Request, command, self.server) {
                Ok(sent) => {
                    debug!("Command '{}' sent ({} bytes, attempt {})", command, sent, attempt);
                    return Ok(sent);
                }
                Err(err) => {
                    warn!("Command '{}' attempt {}/{} failed: {}", command, attempt, COMMAND_ATTEMPTS, err);
                    last_error = Some(err);
                }
            }
        }

        let source = match last_error {
            Some(NatNetError::Transport { source, .. }) => Some(source),
            Some(other) => return Err(other),
            None => None,
        };
        Err(NatNetError::CommandFailed { command: command.to_string(), attempts: COMMAND_ATTEMPTS, source })
    }

    /// Send each command in order, collecting every result.
    pub fn send_commands<I, T>(&self, commands: I) -> Vec<Result<usize>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        commands
            .into_iter()
            .map(|command| {
                let result = self.send_command(command.as_ref());
                debug!("Command: {} - result: {:?}", command.as_ref(), result.as_ref().map_err(|e| e.to_string()));
                result
            })
            .collect()
    }

    pub fn send_keep_alive(&self) -> Result<usize> {
        self.send_request(MessageId::KeepAlive, "", self.server)
    }

    /// Ask the server for its identity (answered with `ServerInfo`).
    pub fn send_connect(&self) -> Result<usize> {
        self.send_request(MessageId::Connect, "", self.server)
    }

    pub fn request_model_definitions(&self) -> Result<usize> {
        self.send_request(MessageId::RequestModelDef, "", self.server)
    }

    pub fn request_frame_of_data(&self) -> Result<usize> {
        self.send_request(MessageId::RequestFrameOfData, "", self.server)
    }

    pub fn send_disconnect(&self) -> Result<usize> {
        self.send_request(MessageId::Disconnect, "", self.server)
    }

    /// Switch the server to bitstream `major.minor` and resync playback.
    ///
    /// Rejected without sending anything unless the server allows bitstream
    /// changes and the version differs from the active one. The new version
    /// is recorded only after the `Bitstream` command was sent.
    pub fn set_natnet_version(&self, major: u8, minor: u8) -> Result<usize> {
        let requested = Version::bitstream(major, minor);
        if !self.session.can_change_bitstream() {
            return Err(NatNetError::version_change_rejected(
                requested,
                "server does not accept bitstream changes (needs NatNet 4.0+ over unicast)",
            ));
        }
        let current = self.session.requested_version();
        if current.same_bitstream(&requested) {
            return Err(NatNetError::version_change_rejected(
                requested,
                format!("bitstream {}.{} is already active", current.major, current.minor),
            ));
        }

        let sent = self.send_command(&format!("Bitstream,{}.{}", major, minor))?;
        self.session.set_requested_version(requested);
        info!("Bitstream changed from {}.{} to {}.{}", current.major, current.minor, major, minor);

        self.resync_playback();
        Ok(sent)
    }

    /// Force a frame send and rewind after a bitstream change.
    fn resync_playback(&self) {
        let mut failures = 0;
        if self.send_command("TimelinePlay").is_err() {
            failures += 1;
        }
        std::thread::sleep(self.resync.settle());
        failures += self.send_commands(RESYNC_COMMANDS).iter().filter(|r| r.is_err()).count();
        std::thread::sleep(self.resync.final_settle());
        if failures > 0 {
            warn!("{} playback resync command(s) failed after bitstream change", failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportMode;
    use crate::types::ServerInfo;
    use std::sync::Mutex;

    /// Records datagrams; fails every send when `fail` is set.
    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        sent: Mutex<Vec<Vec<u8>>>,
        attempts: Mutex<u32>,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }

        fn bodies(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|p| String::from_utf8_lossy(&p[4..p.len() - 1]).into_owned())
                .collect()
        }
    }

    impl DatagramSink for RecordingSink {
        fn send_datagram(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
            *self.attempts.lock().unwrap() += 1;
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.sent.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }
    }

    fn channel(sink: Arc<RecordingSink>, mode: TransportMode) -> (CommandChannel<RecordingSink>, Arc<SessionState>) {
        let session = Arc::new(SessionState::new(mode, 0));
        let server = "127.0.0.1:1510".parse().unwrap();
        (CommandChannel::new(sink, server, Arc::clone(&session), ResyncTiming::IMMEDIATE), session)
    }

    fn server_info(stream: Version) -> ServerInfo {
        ServerInfo {
            application_name: "Motive".into(),
            server_version: Version::new(3, 1, 0, 0),
            stream_version: stream,
        }
    }

    #[test]
    fn request_framing() {
        assert_eq!(compose_request(MessageId::Connect, "ignored").unwrap(), b"\x00\x00\x05\x00Ping\x00");
        assert_eq!(compose_request(MessageId::KeepAlive, "x").unwrap(), b"\x0a\x00\x00\x00\x00");
        assert_eq!(compose_request(MessageId::RequestModelDef, "").unwrap(), b"\x04\x00\x00\x00\x00");
        assert_eq!(compose_request(MessageId::RequestFrameOfData, "").unwrap(), b"\x06\x00\x00\x00\x00");
        assert_eq!(compose_request(MessageId::Disconnect, "").unwrap(), b"\x09\x00\x00\x00\x00");
        assert_eq!(
            compose_request(MessageId::Request, "TimelinePlay").unwrap(),
            b"\x02\x00\x0d\x00TimelinePlay\x00"
        );
    }

    #[test]
    fn oversized_bodies_are_rejected() {
        let body = "x".repeat(MAX_PACKET_SIZE);
        assert!(compose_request(MessageId::Request, &body).is_err());
    }

    #[test]
    fn failing_sink_gets_exactly_three_attempts() {
        let sink = Arc::new(RecordingSink::failing());
        let (channel, _) = channel(Arc::clone(&sink), TransportMode::Unicast);

        let err = channel.send_command("TimelinePlay").unwrap_err();
        assert_eq!(*sink.attempts.lock().unwrap(), 3);
        match err {
            NatNetError::CommandFailed { command, attempts, source } => {
                assert_eq!(command, "TimelinePlay");
                assert_eq!(attempts, 3);
                assert!(source.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn successful_command_sends_once() {
        let sink = Arc::new(RecordingSink::default());
        let (channel, _) = channel(Arc::clone(&sink), TransportMode::Unicast);
        assert_eq!(channel.send_command("TimelineStop").unwrap(), 17);
        assert_eq!(*sink.attempts.lock().unwrap(), 1);
    }

    #[test]
    fn version_change_needs_capability() {
        let sink = Arc::new(RecordingSink::default());
        let (channel, _) = channel(Arc::clone(&sink), TransportMode::Unicast);

        let err = channel.set_natnet_version(3, 1).unwrap_err();
        assert!(matches!(err, NatNetError::VersionChangeRejected { .. }));
        assert_eq!(*sink.attempts.lock().unwrap(), 0);
    }

    #[test]
    fn version_change_rejects_active_version() {
        let sink = Arc::new(RecordingSink::default());
        let (channel, session) = channel(Arc::clone(&sink), TransportMode::Unicast);
        session.apply_server_info(server_info(Version::new(4, 1, 0, 0)));

        let err = channel.set_natnet_version(4, 1).unwrap_err();
        match err {
            NatNetError::VersionChangeRejected { requested, .. } => {
                assert_eq!(requested, Version::bitstream(4, 1))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*sink.attempts.lock().unwrap(), 0);
    }

    #[test]
    fn version_change_with_same_major_is_allowed() {
        let sink = Arc::new(RecordingSink::default());
        let (channel, session) = channel(Arc::clone(&sink), TransportMode::Unicast);
        session.apply_server_info(server_info(Version::new(4, 1, 0, 0)));

        channel.set_natnet_version(4, 0).unwrap();
        assert_eq!(session.requested_version(), Version::bitstream(4, 0));
        assert_eq!(
            sink.bodies(),
            vec![
                "Bitstream,4.0",
                "TimelinePlay",
                "TimelinePlay",
                "TimelineStop",
                "SetPlaybackCurrentFrame,0",
                "TimelineStop"
            ]
        );
    }

    #[test]
    fn failed_version_change_keeps_version() {
        let sink = Arc::new(RecordingSink::failing());
        let (channel, session) = channel(Arc::clone(&sink), TransportMode::Unicast);
        session.apply_server_info(server_info(Version::new(4, 1, 0, 0)));

        assert!(matches!(channel.set_natnet_version(3, 0), Err(NatNetError::CommandFailed { .. })));
        assert_eq!(session.requested_version(), Version::new(4, 1, 0, 0));
        assert_eq!(*sink.attempts.lock().unwrap(), 3);
    }

    #[test]
    fn convenience_requests_use_empty_bodies() {
        let sink = Arc::new(RecordingSink::default());
        let (channel, _) = channel(Arc::clone(&sink), TransportMode::Multicast);
        channel.request_model_definitions().unwrap();
        channel.request_frame_of_data().unwrap();
        channel.send_keep_alive().unwrap();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0], b"\x04\x00\x00\x00\x00");
        assert_eq!(sent[1], b"\x06\x00\x00\x00\x00");
        assert_eq!(sent[2], b"\x0a\x00\x00\x00\x00");
    }

    #[test]
    fn send_commands_reports_each_result() {
        let sink = Arc::new(RecordingSink::default());
        let (channel, _) = channel(Arc::clone(&sink), TransportMode::Unicast);
        let results = channel.send_commands(["TimelinePlay", "TimelineStop"]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_ok()));
    }
}
