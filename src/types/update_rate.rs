//! Update rate control for frame subscriptions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for frame subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame the server streams
    Native,

    /// At most this many frames per second, latest wins
    /// `Max(0)` is treated as Native
    Max(u32),
}

impl UpdateRate {
    /// Normalize rate against the capture frequency, if known
    pub fn normalize(self, source_hz: Option<f64>) -> Self {
        match (self, source_hz) {
            (UpdateRate::Max(0), _) => UpdateRate::Native,
            (UpdateRate::Max(hz), Some(source)) if hz as f64 >= source => UpdateRate::Native,
            (rate, _) => rate,
        }
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self, source_hz: Option<f64>) -> Option<Duration> {
        match self.normalize(source_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

impl Default for UpdateRate {
    fn default() -> Self {
        UpdateRate::Native
    }
}
