//! Bitstream version and the feature gates it controls.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Four-part NatNet version (major, minor, build, revision).
///
/// The same shape is used for the negotiated bitstream version, the server's
/// advertised stream version and the server application version. A version of
/// 0.0 means nothing has been negotiated yet; the description decoder treats
/// it as "latest".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub revision: u8,
}

impl Version {
    /// Unset version (0.0.0.0).
    pub const UNSET: Version = Version::new(0, 0, 0, 0);

    pub const fn new(major: u8, minor: u8, build: u8, revision: u8) -> Self {
        Self { major, minor, build, revision }
    }

    /// Version carrying only a major and minor number.
    pub const fn bitstream(major: u8, minor: u8) -> Self {
        Self::new(major, minor, 0, 0)
    }

    /// Version as laid out on the wire in `ServerInfo`.
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.major, self.minor, self.build, self.revision]
    }

    pub const fn is_unset(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.build == 0 && self.revision == 0
    }

    /// `true` when `(major == M && minor >= m) || major > M`.
    pub const fn at_least(&self, major: u8, minor: u8) -> bool {
        (self.major == major && self.minor >= minor) || self.major > major
    }

    /// Whether the (major, minor) pair equals another version's.
    pub const fn same_bitstream(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    // Frame sections

    pub const fn has_skeletons(&self) -> bool {
        self.at_least(2, 1)
    }

    pub const fn has_labeled_markers(&self) -> bool {
        self.at_least(2, 4)
    }

    pub const fn has_force_plates(&self) -> bool {
        self.at_least(2, 9)
    }

    pub const fn has_devices(&self) -> bool {
        self.at_least(2, 11)
    }

    // Rigid body and marker fields

    /// Per-marker block inside each rigid body (dropped in 3.0).
    pub const fn has_rigid_body_markers(&self) -> bool {
        self.major < 3 && self.major != 0
    }

    /// Marker ids and sizes inside the legacy per-marker block.
    pub const fn has_rigid_body_marker_details(&self) -> bool {
        self.major >= 2
    }

    pub const fn has_mean_error(&self) -> bool {
        self.major >= 2
    }

    /// Tracking-valid word on rigid bodies and flag word on labeled markers.
    pub const fn has_tracking_flags(&self) -> bool {
        self.at_least(2, 6)
    }

    pub const fn has_marker_residual(&self) -> bool {
        self.major >= 3
    }

    // Suffix

    pub const fn has_double_timestamp(&self) -> bool {
        self.at_least(2, 7)
    }

    pub const fn has_precision_timestamps(&self) -> bool {
        self.major >= 3
    }

    // Descriptions (0.0 reads as latest)

    pub const fn describes_rigid_body_names(&self) -> bool {
        self.major >= 2 || self.major == 0
    }

    pub const fn describes_rigid_body_markers(&self) -> bool {
        self.major >= 3 || self.major == 0
    }

    pub const fn describes_rigid_body_marker_names(&self) -> bool {
        self.major >= 4 || self.major == 0
    }

    /// Force plate and device descriptions exist only from 3.0.
    pub const fn describes_instruments(&self) -> bool {
        self.major >= 3
    }

    /// Servers from stream 4.0 accept `Bitstream,M.m` over unicast.
    pub const fn supports_bitstream_change(&self) -> bool {
        self.major >= 4
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

impl From<[u8; 4]> for Version {
    fn from(bytes: [u8; 4]) -> Self {
        Version::from_bytes(bytes)
    }
}
