//! Client configuration.
//!
//! [`ClientConfig`] collects the network settings a client needs before
//! `run()`. Every field has a default matching a stock Motive install on the
//! local machine, so a YAML file only needs the fields that differ:
//!
//! ```rust
//! use natnet::{ClientConfig, TransportMode};
//!
//! let config = ClientConfig::from_yaml_str(
//!     "server_address: 192.168.1.20\nlocal_address: 192.168.1.5\ntransport_mode: unicast\n",
//! )
//! .unwrap();
//! assert_eq!(config.transport_mode, TransportMode::Unicast);
//! assert_eq!(config.command_port, 1510);
//! ```

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::protocol::{DEFAULT_COMMAND_PORT, DEFAULT_DATA_PORT};
use crate::{NatNetError, Result};

/// How frames reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Server multicasts frames to a group joined on the data port.
    #[default]
    Multicast,
    /// Server sends frames directly to this client.
    Unicast,
}

impl TransportMode {
    pub fn is_multicast(self) -> bool {
        matches!(self, TransportMode::Multicast)
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMode::Multicast => f.write_str("multicast"),
            TransportMode::Unicast => f.write_str("unicast"),
        }
    }
}

/// Pauses in the playback resync that follows a bitstream change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResyncTiming {
    /// Pause after the first `TimelinePlay`.
    pub settle_ms: u64,
    /// Pause after the final `TimelineStop`.
    pub final_settle_ms: u64,
}

impl ResyncTiming {
    /// No pauses; for tests against a fake server.
    pub const IMMEDIATE: ResyncTiming = ResyncTiming { settle_ms: 0, final_settle_ms: 0 };

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn final_settle(&self) -> Duration {
        Duration::from_millis(self.final_settle_ms)
    }
}

impl Default for ResyncTiming {
    fn default() -> Self {
        Self { settle_ms: 100, final_settle_ms: 2000 }
    }
}

/// Network and diagnostics settings for a [`NatNetClient`](crate::NatNetClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local interface address; multicast is joined on it, unicast binds it.
    pub local_address: Ipv4Addr,
    pub server_address: Ipv4Addr,
    pub transport_mode: TransportMode,
    pub multicast_group: Ipv4Addr,
    pub command_port: u16,
    pub data_port: u16,
    /// 0 = no per-frame logging, 1 = every frame, n = every n-th frame.
    pub print_level: u32,
    pub resync: ResyncTiming,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_address: Ipv4Addr::LOCALHOST,
            server_address: Ipv4Addr::LOCALHOST,
            transport_mode: TransportMode::Multicast,
            multicast_group: Ipv4Addr::new(239, 255, 42, 99),
            command_port: DEFAULT_COMMAND_PORT,
            data_port: DEFAULT_DATA_PORT,
            print_level: 0,
            resync: ResyncTiming::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml_ng::from_str(yaml).map_err(|e| NatNetError::Parse {
            context: "client config".to_string(),
            details: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| NatNetError::File { path: path.to_path_buf(), source })?;
        debug!("Loaded client config from {} ({} bytes)", path.display(), text.len());
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| NatNetError::Parse {
            context: "client config".to_string(),
            details: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multicast_group.is_multicast() {
            return Err(NatNetError::invalid_config(
                "multicast_group",
                format!("{} is not in 224.0.0.0/4", self.multicast_group),
            ));
        }
        if self.command_port == 0 {
            return Err(NatNetError::invalid_config("command_port", "port must be non-zero"));
        }
        if self.transport_mode.is_multicast() && self.data_port == 0 {
            return Err(NatNetError::invalid_config(
                "data_port",
                "multicast needs a fixed data port",
            ));
        }
        if self.server_address.is_unspecified() {
            return Err(NatNetError::invalid_config("server_address", "0.0.0.0 cannot receive commands"));
        }
        Ok(())
    }

    /// Where commands are sent.
    pub fn server_command_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.server_address, self.command_port))
    }
}

/// Parse a dotted IPv4 address for the named setting.
pub(crate) fn parse_address(field: &str, value: &str) -> Result<Ipv4Addr> {
    value.trim().parse().map_err(|_| {
        NatNetError::invalid_config(field, format!("'{}' is not a dotted IPv4 address", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result, ensure};

    #[test]
    fn defaults_match_protocol() {
        let config = ClientConfig::default();
        assert_eq!(config.command_port, 1510);
        assert_eq!(config.data_port, 1511);
        assert_eq!(config.multicast_group.to_string(), "239.255.42.99");
        assert_eq!(config.transport_mode, TransportMode::Multicast);
        assert_eq!(config.resync, ResyncTiming { settle_ms: 100, final_settle_ms: 2000 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() -> Result<()> {
        let config = ClientConfig::from_yaml_str(
            "server_address: 10.0.0.2\ntransport_mode: unicast\nprint_level: 5\nresync:\n  settle_ms: 0\n",
        )
        .context("config should parse")?;
        ensure!(config.server_address == Ipv4Addr::new(10, 0, 0, 2));
        ensure!(config.transport_mode == TransportMode::Unicast);
        ensure!(config.print_level == 5);
        ensure!(config.resync.settle_ms == 0);
        ensure!(config.resync.final_settle_ms == 2000);
        ensure!(config.local_address == Ipv4Addr::LOCALHOST);
        Ok(())
    }

    #[test]
    fn yaml_round_trip() -> Result<()> {
        let config = ClientConfig { print_level: 3, ..Default::default() };
        let text = config.to_yaml_string()?;
        ensure!(ClientConfig::from_yaml_str(&text)? == config);
        Ok(())
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            ClientConfig::from_yaml_str("server_address: not-an-ip\n"),
            Err(NatNetError::Parse { .. })
        ));
        assert!(matches!(
            ClientConfig::from_yaml_str("multicast_group: 10.1.2.3\n"),
            Err(NatNetError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ClientConfig::from_yaml_str("command_port: 0\n"),
            Err(NatNetError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClientConfig::load("/nonexistent/natnet.yaml").unwrap_err();
        match err {
            NatNetError::File { path, .. } => assert!(path.ends_with("natnet.yaml")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn address_parsing() {
        assert_eq!(parse_address("server_address", " 192.168.0.1 ").unwrap(), Ipv4Addr::new(192, 168, 0, 1));
        assert!(matches!(
            parse_address("server_address", "localhost"),
            Err(NatNetError::InvalidConfig { .. })
        ));
    }
}
