//! The NatNet client facade.
//!
//! [`NatNetClient`] owns the configuration, the registered listeners and,
//! once [`run`](NatNetClient::run) succeeds, the running transport. Network
//! settings and listeners are locked from that point on; commands, version
//! queries and subscriptions are available until
//! [`shutdown`](NatNetClient::shutdown).

use futures::{Stream, StreamExt, stream::BoxStream};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

use crate::command::CommandChannel;
use crate::config::{ClientConfig, TransportMode, parse_address};
use crate::protocol::{Quat, Vec3, Version};
use crate::session::SessionState;
use crate::stream::RateLimitExt;
use crate::transport::Transport;
use crate::transport::dispatch::{DescriptionSender, Dispatcher, FrameSender, Listeners};
use crate::types::{DescriptionSet, Frame, FrameSummary, ServerInfo, ServerMessage, UpdateRate};
use crate::{NatNetError, Result};

const SERVER_INFO_POLL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`NatNetClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Settings and listeners may still change.
    Unconfigured,
    /// `run()` is opening sockets.
    Starting,
    /// Both receive loops are running.
    Connected,
    ShuttingDown,
    /// Terminal; a new client is needed to reconnect.
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Unconfigured => "unconfigured",
            ConnectionState::Starting => "starting",
            ConnectionState::Connected => "connected",
            ConnectionState::ShuttingDown => "shutting down",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Client for one NatNet server.
///
/// ```rust,no_run
/// use natnet::{ClientConfig, NatNetClient, TransportMode};
///
/// # fn main() -> natnet::Result<()> {
/// let mut client = NatNetClient::new(ClientConfig {
///     transport_mode: TransportMode::Unicast,
///     ..Default::default()
/// })?;
/// client.on_rigid_body(|id, position, _| println!("{id}: {position:?}"))?;
/// client.run()?;
/// client.request_model_definitions()?;
/// # Ok(())
/// # }
/// ```
pub struct NatNetClient {
    config: ClientConfig,
    listeners: Listeners,
    session: Arc<SessionState>,
    frames: FrameSender,
    descriptions: DescriptionSender,
    state: ConnectionState,
    transport: Option<Transport>,
    commands: Option<CommandChannel>,
}

impl NatNetClient {
    /// Create an unconfigured client. Fails if `config` does not validate.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(SessionState::new(config.transport_mode, config.print_level));
        let (frames, _) = watch::channel(None);
        let (descriptions, _) = watch::channel(None);
        Ok(Self {
            config,
            listeners: Listeners::default(),
            session,
            frames: Arc::new(frames),
            descriptions: Arc::new(descriptions),
            state: ConnectionState::Unconfigured,
            transport: None,
            commands: None,
        })
    }

    /// Load a YAML config file and create a client from it.
    pub fn from_config_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(ClientConfig::load(path)?)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_configurable(&self, setting: &str) -> Result<()> {
        match self.state {
            ConnectionState::Unconfigured => Ok(()),
            _ => Err(NatNetError::configuration_locked(setting)),
        }
    }

    // --- Network settings -------------------------------------------------

    /// Local interface, as a dotted IPv4 address.
    pub fn set_client_address(&mut self, address: &str) -> Result<()> {
        self.ensure_configurable("local_address")?;
        self.config.local_address = parse_address("local_address", address)?;
        Ok(())
    }

    pub fn client_address(&self) -> Ipv4Addr {
        self.config.local_address
    }

    /// Server address, as a dotted IPv4 address.
    pub fn set_server_address(&mut self, address: &str) -> Result<()> {
        self.ensure_configurable("server_address")?;
        let address = parse_address("server_address", address)?;
        if address.is_unspecified() {
            return Err(NatNetError::invalid_config("server_address", "0.0.0.0 cannot receive commands"));
        }
        self.config.server_address = address;
        Ok(())
    }

    pub fn server_address(&self) -> Ipv4Addr {
        self.config.server_address
    }

    pub fn set_transport_mode(&mut self, mode: TransportMode) -> Result<()> {
        self.ensure_configurable("transport_mode")?;
        self.config.transport_mode = mode;
        Ok(())
    }

    pub fn set_use_multicast(&mut self, multicast: bool) -> Result<()> {
        self.set_transport_mode(if multicast { TransportMode::Multicast } else { TransportMode::Unicast })
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.config.transport_mode
    }

    pub fn can_change_bitstream_version(&self) -> bool {
        self.session.can_change_bitstream()
    }

    // --- Listeners ----------------------------------------------------------

    /// Called with every decoded frame, on the data thread.
    pub fn on_frame<F>(&mut self, listener: F) -> Result<()>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.ensure_configurable("frame listener")?;
        self.listeners.frame = Some(Arc::new(listener));
        Ok(())
    }

    /// Called with frame-level counts after every frame.
    pub fn on_frame_summary<F>(&mut self, listener: F) -> Result<()>
    where
        F: Fn(&FrameSummary) + Send + Sync + 'static,
    {
        self.ensure_configurable("frame summary listener")?;
        self.listeners.frame_summary = Some(Arc::new(listener));
        Ok(())
    }

    /// Called with (id, position, orientation) for each rigid body and
    /// skeleton bone as it is decoded.
    pub fn on_rigid_body<F>(&mut self, listener: F) -> Result<()>
    where
        F: Fn(i32, Vec3, Quat) + Send + Sync + 'static,
    {
        self.ensure_configurable("rigid body listener")?;
        self.listeners.rigid_body = Some(Arc::new(listener));
        Ok(())
    }

    /// Called with each model definition set, partial ones included.
    pub fn on_descriptions<F>(&mut self, listener: F) -> Result<()>
    where
        F: Fn(&DescriptionSet) + Send + Sync + 'static,
    {
        self.ensure_configurable("description listener")?;
        self.listeners.descriptions = Some(Arc::new(listener));
        Ok(())
    }

    /// Called with command responses and server messages.
    pub fn on_server_message<F>(&mut self, listener: F) -> Result<()>
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.ensure_configurable("server message listener")?;
        self.listeners.server_message = Some(Arc::new(listener));
        Ok(())
    }

    // --- Lifecycle ------------------------------------------------------------

    /// Open both sockets, start the receive threads and greet the server.
    ///
    /// Fails without leaving anything running if either socket cannot be
    /// opened; the client then stays configurable.
    pub fn run(&mut self) -> Result<()> {
        if self.state != ConnectionState::Unconfigured {
            return Err(NatNetError::lifecycle("run", self.state));
        }
        self.config.validate()?;
        self.state = ConnectionState::Starting;
        info!(
            "Starting {} client: local {}, server {}",
            self.config.transport_mode, self.config.local_address, self.config.server_address
        );

        let session = Arc::new(SessionState::new(self.config.transport_mode, self.session.print_level()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&session),
            self.listeners.clone(),
            Arc::clone(&self.frames),
            Arc::clone(&self.descriptions),
        ));

        let (transport, commands) = match Transport::start(&self.config, Arc::clone(&session), dispatcher) {
            Ok(started) => started,
            Err(e) => {
                error!("Client startup failed: {}", e);
                self.state = ConnectionState::Unconfigured;
                return Err(e);
            }
        };
        self.session = session;
        self.transport = Some(transport);
        self.state = ConnectionState::Connected;

        if let Err(e) = commands.send_connect() {
            warn!("Connect request failed: {}", e);
        }
        self.commands = Some(commands);
        Ok(())
    }

    /// Stop both receive threads. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            if self.state == ConnectionState::Unconfigured {
                self.state = ConnectionState::Stopped;
            }
            return;
        };
        self.state = ConnectionState::ShuttingDown;
        if let Some(commands) = self.commands.take() {
            if self.config.transport_mode == TransportMode::Unicast {
                if let Err(e) = commands.send_disconnect() {
                    debug!("Disconnect notice failed: {}", e);
                }
            }
        }
        transport.shutdown();
        self.state = ConnectionState::Stopped;
        info!("Client stopped");
    }

    /// `true` while running and after the server has identified itself.
    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.session.has_server_info()
    }

    /// Block until the server has identified itself, for at most `timeout`.
    pub fn wait_for_server_info(&self, timeout: Duration) -> Result<ServerInfo> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state != ConnectionState::Connected {
                return Err(NatNetError::lifecycle("wait for server info", self.state));
            }
            if self.session.has_server_info() {
                return Ok(self.session.server_info());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(NatNetError::Timeout { duration: timeout });
            }
            std::thread::sleep(SERVER_INFO_POLL.min(deadline - now));
        }
    }

    /// Local address of the command socket while running.
    pub fn command_local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref()?.command_local_addr().ok()
    }

    /// Local address of the data socket while running.
    pub fn data_local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref()?.data_local_addr().ok()
    }

    // --- Commands --------------------------------------------------------------

    fn commands(&self, operation: &str) -> Result<&CommandChannel> {
        match (&self.commands, self.state) {
            (Some(commands), ConnectionState::Connected) => Ok(commands),
            _ => Err(NatNetError::lifecycle(operation, self.state)),
        }
    }

    /// Send a text request, retrying transport failures.
    pub fn send_command(&self, command: &str) -> Result<usize> {
        self.commands("send_command")?.send_command(command)
    }

    /// Send each command in order; one result per command.
    pub fn send_commands<I, T>(&self, commands: I) -> Result<Vec<Result<usize>>>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Ok(self.commands("send_commands")?.send_commands(commands))
    }

    pub fn send_keep_alive(&self) -> Result<usize> {
        self.commands("send_keep_alive")?.send_keep_alive()
    }

    /// Ask for a `ModelDef`; it arrives through the description listener
    /// and [`description_updates`](Self::description_updates).
    pub fn request_model_definitions(&self) -> Result<usize> {
        self.commands("request_model_definitions")?.request_model_definitions()
    }

    pub fn request_frame_of_data(&self) -> Result<usize> {
        self.commands("request_frame_of_data")?.request_frame_of_data()
    }

    /// Switch the server's bitstream version and resync playback.
    pub fn set_natnet_version(&self, major: u8, minor: u8) -> Result<usize> {
        self.commands("set_natnet_version")?.set_natnet_version(major, minor)
    }

    // --- Versions and diagnostics ---------------------------------------------

    pub fn server_info(&self) -> ServerInfo {
        self.session.server_info()
    }

    pub fn application_name(&self) -> String {
        self.session.server_info().application_name
    }

    /// Version frames and descriptions are decoded with.
    pub fn natnet_requested_version(&self) -> Version {
        self.session.requested_version()
    }

    /// Stream version the server reported.
    pub fn natnet_server_version(&self) -> Version {
        self.session.server_info().stream_version
    }

    /// Version of the server application.
    pub fn server_version(&self) -> Version {
        self.session.server_info().server_version
    }

    pub fn major(&self) -> u8 {
        self.natnet_requested_version().major
    }

    pub fn minor(&self) -> u8 {
        self.natnet_requested_version().minor
    }

    pub fn print_level(&self) -> u32 {
        self.session.print_level()
    }

    /// 0 silences per-frame logging; n logs every n-th frame at debug.
    pub fn set_print_level(&mut self, level: u32) {
        self.config.print_level = level;
        self.session.set_print_level(level);
    }

    // --- Subscriptions -------------------------------------------------------

    /// Latest decoded frame, if any.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    pub fn latest_descriptions(&self) -> Option<Arc<DescriptionSet>> {
        self.descriptions.borrow().clone()
    }

    /// Every frame as it is decoded, starting with the latest one if any.
    ///
    /// Slow consumers see the newest frame rather than a backlog. The stream
    /// ends when the client is dropped.
    pub fn frame_updates(&self) -> impl Stream<Item = Arc<Frame>> + Send + use<> {
        WatchStream::new(self.frames.subscribe()).filter_map(|frame| async move { frame })
    }

    /// Frames at no more than `rate`.
    pub fn subscribe(&self, rate: UpdateRate) -> BoxStream<'static, Arc<Frame>> {
        match rate.throttle_interval(None) {
            None => self.frame_updates().boxed(),
            Some(period) => {
                debug!("Frame subscription limited to one per {:?}", period);
                self.frame_updates().rate_limit(period).boxed()
            }
        }
    }

    /// Each model definition set as it arrives.
    pub fn description_updates(&self) -> impl Stream<Item = Arc<DescriptionSet>> + Send + use<> {
        WatchStream::new(self.descriptions.subscribe()).filter_map(|set| async move { set })
    }
}

impl Drop for NatNetClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for NatNetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatNetClient")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .field("transport", &self.transport)
            .finish()
    }
}
