//! Sockets and receive threads.
//!
//! A running client owns two OS threads, one per channel. Each blocks on
//! its socket with a [`READ_TIMEOUT`](socket::READ_TIMEOUT) and exits once
//! the shared cancellation token fires. Shutdown cancels the token, shuts
//! down the receive side of both sockets so a blocked receive returns at
//! once, then joins both threads.

pub mod dispatch;
mod receiver;
pub mod socket;

use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::CommandChannel;
use crate::config::ClientConfig;
use crate::session::SessionState;
use crate::{NatNetError, Result};
use dispatch::Dispatcher;
use receiver::ReceiveLoop;

/// The two UDP channels of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Commands out, replies and model definitions in.
    Command,
    /// Frames in.
    Data,
}

impl Channel {
    fn thread_name(self) -> &'static str {
        match self {
            Channel::Command => "natnet-command",
            Channel::Data => "natnet-data",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Command => f.write_str("command"),
            Channel::Data => f.write_str("data"),
        }
    }
}

/// Open sockets plus their receive threads.
pub struct Transport {
    command_socket: Arc<UdpSocket>,
    data_socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    threads: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Open both sockets and start both receive loops.
    ///
    /// On error nothing is left running.
    pub fn start(
        config: &ClientConfig,
        session: Arc<SessionState>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<(Self, CommandChannel)> {
        let command_socket = Arc::new(socket::command_socket(config)?);
        let data_socket = Arc::new(socket::data_socket(config)?);

        let commands = CommandChannel::new(
            Arc::clone(&command_socket),
            config.server_command_addr(),
            session,
            config.resync,
        );

        let mut transport = Transport {
            command_socket,
            data_socket,
            cancel: CancellationToken::new(),
            threads: Vec::with_capacity(2),
        };

        let multicast = config.transport_mode.is_multicast();
        transport.spawn(ReceiveLoop {
            channel: Channel::Data,
            socket: Arc::clone(&transport.data_socket),
            dispatcher: Arc::clone(&dispatcher),
            cancel: transport.cancel.child_token(),
            keep_alive: None,
            multicast,
        })?;
        transport.spawn(ReceiveLoop {
            channel: Channel::Command,
            socket: Arc::clone(&transport.command_socket),
            dispatcher,
            cancel: transport.cancel.child_token(),
            keep_alive: (!multicast).then(|| commands.clone()),
            multicast,
        })?;

        info!(
            "Transport started ({}): command {:?}, data {:?}",
            config.transport_mode,
            transport.command_local_addr().ok(),
            transport.data_local_addr().ok()
        );
        Ok((transport, commands))
    }

    fn spawn(&mut self, receive_loop: ReceiveLoop) -> Result<()> {
        let channel = receive_loop.channel;
        let handle = std::thread::Builder::new()
            .name(channel.thread_name().to_string())
            .spawn(move || {
                receive_loop.run();
            })
            .map_err(|e| NatNetError::transport(format!("spawn {} thread", channel), e))?;
        self.threads.push(handle);
        Ok(())
    }

    pub fn command_local_addr(&self) -> Result<SocketAddr> {
        self.command_socket.local_addr().map_err(|e| NatNetError::transport("command socket address", e))
    }

    pub fn data_local_addr(&self) -> Result<SocketAddr> {
        self.data_socket.local_addr().map_err(|e| NatNetError::transport("data socket address", e))
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.threads.iter().any(|t| !t.is_finished())
    }

    /// Stop both loops and wait for their threads. Idempotent.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        debug!("Stopping transport");
        self.cancel.cancel();
        let sockets = [(Channel::Data, &self.data_socket), (Channel::Command, &self.command_socket)];
        for (channel, udp) in sockets {
            // The read timeout still bounds the join if this fails.
            if let Err(e) = socket::shutdown_receive(udp) {
                debug!("Could not shut down {} socket: {}", channel, e);
            }
        }

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("receiver").to_string();
            if handle.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }
        info!("Transport stopped");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("command", &self.command_socket.local_addr().ok())
            .field("data", &self.data_socket.local_addr().ok())
            .field("threads", &self.threads.len())
            .finish()
    }
}
