//! Connection and version metadata shared between the caller and both
//! receive loops.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::config::TransportMode;
use crate::protocol::Version;
use crate::types::ServerInfo;

/// Session metadata: server identity, requested bitstream version and the
/// bitstream-change capability.
#[derive(Debug)]
pub struct SessionState {
    transport_mode: TransportMode,
    server: RwLock<ServerInfo>,
    requested: RwLock<Version>,
    can_change_bitstream: AtomicBool,
    print_level: AtomicU32,
}

impl SessionState {
    pub fn new(transport_mode: TransportMode, print_level: u32) -> Self {
        Self {
            transport_mode,
            server: RwLock::new(ServerInfo::default()),
            requested: RwLock::new(Version::UNSET),
            can_change_bitstream: AtomicBool::new(false),
            print_level: AtomicU32::new(print_level),
        }
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.transport_mode
    }

    pub fn server_info(&self) -> ServerInfo {
        self.server.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Version used to decode frames and descriptions.
    pub fn requested_version(&self) -> Version {
        *self.requested.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_requested_version(&self, version: Version) {
        *self.requested.write().unwrap_or_else(PoisonError::into_inner) = version;
    }

    pub fn can_change_bitstream(&self) -> bool {
        self.can_change_bitstream.load(Ordering::Acquire)
    }

    /// `true` once a `ServerInfo` with a name and version has been applied.
    pub fn has_server_info(&self) -> bool {
        self.server.read().unwrap_or_else(PoisonError::into_inner).is_known()
    }

    pub fn print_level(&self) -> u32 {
        self.print_level.load(Ordering::Relaxed)
    }

    pub fn set_print_level(&self, level: u32) {
        self.print_level.store(level, Ordering::Relaxed);
    }

    /// Record a `ServerInfo`.
    ///
    /// Adopts the server's stream version when none was requested yet and
    /// recomputes the bitstream-change capability.
    pub fn apply_server_info(&self, info: ServerInfo) {
        {
            let mut requested = self.requested.write().unwrap_or_else(PoisonError::into_inner);
            if requested.major == 0 && requested.minor == 0 {
                debug!("Adopting server stream version {}", info.stream_version);
                *requested = info.stream_version;
            }
        }

        let capable = info.stream_version.supports_bitstream_change()
            && self.transport_mode == TransportMode::Unicast;
        self.can_change_bitstream.store(capable, Ordering::Release);

        info!(
            "Server info: {} (bitstream changes {})",
            info,
            if capable { "allowed" } else { "not allowed" }
        );
        *self.server.write().unwrap_or_else(PoisonError::into_inner) = info;
    }
}
