//! Blocking receive loop run on each channel's thread.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::Channel;
use super::dispatch::{Dispatcher, MessageCounters};
use crate::command::CommandChannel;
use crate::protocol::MAX_PACKET_SIZE;

/// Upper bound on the pause after repeated socket errors.
const MAX_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome of one blocking receive.
#[derive(Debug)]
pub enum ReceiveResult {
    Datagram { len: usize, from: SocketAddr },
    Timeout,
    Failed(io::Error),
}

pub fn receive(socket: &UdpSocket, buf: &mut [u8]) -> ReceiveResult {
    match socket.recv_from(buf) {
        Ok((len, from)) => ReceiveResult::Datagram { len, from },
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            ReceiveResult::Timeout
        }
        Err(e) => ReceiveResult::Failed(e),
    }
}

pub struct ReceiveLoop {
    pub channel: Channel,
    pub socket: Arc<UdpSocket>,
    pub dispatcher: Arc<Dispatcher>,
    pub cancel: CancellationToken,
    /// Set on the unicast command loop; a keep-alive goes out on each timeout.
    pub keep_alive: Option<CommandChannel>,
    pub multicast: bool,
}

impl ReceiveLoop {
    /// Receive and dispatch until cancelled.
    pub fn run(self) -> MessageCounters {
        info!("{} loop started on {:?}", self.channel, self.socket.local_addr().ok());

        // Room for the largest datagram plus one byte so oversize packets
        // are seen as such rather than silently truncated.
        let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
        let mut counters = MessageCounters::default();
        let mut consecutive_errors = 0u32;

        while !self.cancel.is_cancelled() {
            match receive(&self.socket, &mut buf) {
                // A shut-down socket also returns zero bytes.
                ReceiveResult::Datagram { len: 0, from } => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    trace!("Empty datagram from {} on {} channel", from, self.channel);
                }
                ReceiveResult::Datagram { len, from } => {
                    consecutive_errors = 0;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if len > MAX_PACKET_SIZE {
                        warn!("Dropping oversize datagram from {} ({} bytes)", from, len);
                        continue;
                    }
                    self.dispatcher.dispatch(self.channel, &buf[..len], &mut counters);
                }
                ReceiveResult::Timeout => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if self.multicast {
                        trace!("No data on {} channel (server idle?)", self.channel);
                    }
                    if let Some(commands) = &self.keep_alive {
                        if let Err(e) = commands.send_keep_alive() {
                            warn!("Keep-alive failed: {}", e);
                        }
                    }
                }
                ReceiveResult::Failed(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let backoff = error_backoff(consecutive_errors);
                    warn!(
                        "Receive failed on {} channel ({} in a row, retrying in {:?}): {}",
                        self.channel, consecutive_errors, backoff, e
                    );
                    std::thread::sleep(backoff);
                }
            }
        }

        info!("{} loop stopped after {} packets", self.channel, counters.total());
        debug!("{} loop counters: {:?}", self.channel, counters);
        counters
    }
}

/// Exponential backoff: 10ms, 20ms, 40ms ... capped at [`MAX_ERROR_BACKOFF`].
fn error_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(6);
    Duration::from_millis(10 * (1u64 << exponent)).min(MAX_ERROR_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(error_backoff(1), Duration::from_millis(10));
        assert_eq!(error_backoff(2), Duration::from_millis(20));
        assert_eq!(error_backoff(5), Duration::from_millis(160));
        assert_eq!(error_backoff(50), MAX_ERROR_BACKOFF);
    }

    #[test]
    fn receive_reports_timeout() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(receive(&socket, &mut buf), ReceiveResult::Timeout));
    }

    #[test]
    fn receive_reports_datagram() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"abc", socket.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 8];
        match receive(&socket, &mut buf) {
            ReceiveResult::Datagram { len, from } => {
                assert_eq!(len, 3);
                assert_eq!(from, sender.local_addr().unwrap());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
