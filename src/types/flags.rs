//! Packed 16-bit flag words carried in frames.

use serde::{Deserialize, Serialize};

/// Raw 16-bit flag word as read from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlagWord(pub u16);

impl FlagWord {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Check if a specific bit is set.
    pub fn is_set(&self, bit: u16) -> bool {
        bit < 16 && (self.0 & (1 << bit)) != 0
    }

    /// Check if any bit of `flag` is set.
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl From<u16> for FlagWord {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Rigid body parameter word.
pub mod rigid_body {
    pub const TRACKING_VALID: u16 = 0x0001;
}

/// Labeled marker parameter word.
pub mod labeled_marker {
    pub const OCCLUDED: u16 = 0x0001;
    pub const POINT_CLOUD_SOLVED: u16 = 0x0002;
    pub const MODEL_SOLVED: u16 = 0x0004;
}

/// Frame suffix parameter word.
pub mod frame {
    pub const RECORDING: u16 = 0x0001;
    pub const TRACKED_MODELS_CHANGED: u16 = 0x0002;
}
