//! UDP socket setup for the command and data channels.

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tracing::debug;

use crate::config::{ClientConfig, TransportMode};
use crate::{NatNetError, Result};

/// Receive timeout on both sockets; bounds how long a loop takes to notice
/// cancellation when nothing arrives.
pub const READ_TIMEOUT: Duration = Duration::from_millis(2000);

fn new_udp_socket(operation: &'static str) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NatNetError::transport(operation, e))?;
    socket.set_reuse_address(true).map_err(|e| NatNetError::transport(operation, e))?;
    socket.set_read_timeout(Some(READ_TIMEOUT)).map_err(|e| NatNetError::transport(operation, e))?;
    Ok(socket)
}

fn bind(socket: &Socket, address: Ipv4Addr, port: u16, operation: &'static str) -> Result<()> {
    let addr = SocketAddr::V4(SocketAddrV4::new(address, port));
    socket.bind(&addr.into()).map_err(|e| NatNetError::transport(operation, e))
}

/// Socket that sends commands and receives their replies.
///
/// Multicast binds any interface on an ephemeral port with broadcast
/// enabled; unicast binds the configured local address.
pub fn command_socket(config: &ClientConfig) -> Result<UdpSocket> {
    const OP: &str = "open command socket";
    let socket = new_udp_socket(OP)?;
    match config.transport_mode {
        TransportMode::Multicast => {
            bind(&socket, Ipv4Addr::UNSPECIFIED, 0, OP)?;
            socket.set_broadcast(true).map_err(|e| NatNetError::transport(OP, e))?;
        }
        TransportMode::Unicast => bind(&socket, config.local_address, 0, OP)?,
    }
    let socket = UdpSocket::from(socket);
    debug!("Command socket bound to {:?}", socket.local_addr().ok());
    Ok(socket)
}

/// Socket that receives frames.
///
/// Multicast binds the data port on any interface and joins the group on
/// the local address; unicast binds an ephemeral port.
pub fn data_socket(config: &ClientConfig) -> Result<UdpSocket> {
    const OP: &str = "open data socket";
    let socket = new_udp_socket(OP)?;
    match config.transport_mode {
        TransportMode::Multicast => {
            bind(&socket, Ipv4Addr::UNSPECIFIED, config.data_port, OP)?;
            socket
                .join_multicast_v4(&config.multicast_group, &config.local_address)
                .map_err(|e| NatNetError::transport("join multicast group", e))?;
            debug!("Joined {} on {}", config.multicast_group, config.local_address);
        }
        TransportMode::Unicast => bind(&socket, Ipv4Addr::UNSPECIFIED, 0, OP)?,
    }
    let socket = UdpSocket::from(socket);
    debug!("Data socket bound to {:?}", socket.local_addr().ok());
    Ok(socket)
}

/// Shut down the receive side of `socket`, waking any thread blocked in
/// `recv_from` on it. Sends are unaffected.
///
/// Linux reports `NotConnected` for unconnected UDP sockets but still marks
/// them shut down and wakes waiting receivers.
pub fn shutdown_receive(socket: &UdpSocket) -> io::Result<()> {
    match SockRef::from(socket).shutdown(Shutdown::Read) {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn unicast_config() -> ClientConfig {
        ClientConfig { transport_mode: TransportMode::Unicast, ..Default::default() }
    }

    #[test]
    fn unicast_sockets_bind_ephemeral_ports() {
        let config = unicast_config();
        let command = command_socket(&config).unwrap();
        let data = data_socket(&config).unwrap();

        let command_addr = command.local_addr().unwrap();
        assert_eq!(command_addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(command_addr.port(), 0);
        assert_ne!(data.local_addr().unwrap().port(), 0);
        assert_eq!(command.read_timeout().unwrap(), Some(READ_TIMEOUT));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn receive_shutdown_unblocks_a_waiting_receiver() {
        let data = Arc::new(data_socket(&unicast_config()).unwrap());
        let waiting = Arc::clone(&data);
        let receiver = std::thread::spawn(move || {
            let started = Instant::now();
            let mut buf = [0u8; 16];
            let received = waiting.recv_from(&mut buf).map(|(len, _)| len).unwrap_or(0);
            (received, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(100));
        shutdown_receive(&data).unwrap();
        let (received, waited) = receiver.join().unwrap();
        assert_eq!(received, 0);
        assert!(waited < READ_TIMEOUT, "receiver waited {:?}", waited);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn shared_multicast_port_does_not_delay_receive_shutdown() {
        let config = ClientConfig {
            transport_mode: TransportMode::Multicast,
            data_port: 0,
            ..Default::default()
        };
        let data = Arc::new(data_socket(&config).unwrap());
        let port = data.local_addr().unwrap().port();

        // Another client on the same host shares the port.
        let neighbour = new_udp_socket("neighbour").unwrap();
        bind(&neighbour, Ipv4Addr::UNSPECIFIED, port, "neighbour").unwrap();

        let waiting = Arc::clone(&data);
        let receiver = std::thread::spawn(move || {
            let started = Instant::now();
            let mut buf = [0u8; 16];
            let _ = waiting.recv_from(&mut buf);
            started.elapsed()
        });

        std::thread::sleep(Duration::from_millis(100));
        shutdown_receive(&data).unwrap();
        let waited = receiver.join().unwrap();
        assert!(waited < Duration::from_millis(1000), "receiver waited {:?}", waited);
    }
}
