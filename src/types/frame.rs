//! Decoded `FrameOfData` entities.
//!
//! One [`Frame`] is produced per packet and owned by the consumer afterwards.
//! Sections absent from the active bitstream version are left empty.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::flags::{self, FlagWord};
use crate::protocol::{Quat, Vec3, Version};

/// Sections of a frame in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameSectionKind {
    Prefix,
    MarkerSets,
    RigidBodies,
    Skeletons,
    LabeledMarkers,
    ForcePlates,
    Devices,
    Suffix,
}

impl FrameSectionKind {
    /// All sections in the order they appear on the wire.
    pub const ALL: [FrameSectionKind; 8] = [
        FrameSectionKind::Prefix,
        FrameSectionKind::MarkerSets,
        FrameSectionKind::RigidBodies,
        FrameSectionKind::Skeletons,
        FrameSectionKind::LabeledMarkers,
        FrameSectionKind::ForcePlates,
        FrameSectionKind::Devices,
        FrameSectionKind::Suffix,
    ];

    /// Whether a frame encoded with `version` carries this section.
    pub fn is_present(self, version: Version) -> bool {
        match self {
            FrameSectionKind::Prefix
            | FrameSectionKind::MarkerSets
            | FrameSectionKind::RigidBodies
            | FrameSectionKind::Suffix => true,
            FrameSectionKind::Skeletons => version.has_skeletons(),
            FrameSectionKind::LabeledMarkers => version.has_labeled_markers(),
            FrameSectionKind::ForcePlates => version.has_force_plates(),
            FrameSectionKind::Devices => version.has_devices(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameSectionKind::Prefix => "frame prefix",
            FrameSectionKind::MarkerSets => "marker set data",
            FrameSectionKind::RigidBodies => "rigid body data",
            FrameSectionKind::Skeletons => "skeleton data",
            FrameSectionKind::LabeledMarkers => "labeled marker data",
            FrameSectionKind::ForcePlates => "force plate data",
            FrameSectionKind::Devices => "device data",
            FrameSectionKind::Suffix => "frame suffix",
        }
    }
}

impl fmt::Display for FrameSectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded motion-capture frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub prefix: FramePrefix,
    pub marker_sets: MarkerSetFrame,
    pub rigid_bodies: Vec<RigidBodyFrame>,
    pub skeletons: Vec<SkeletonFrame>,
    pub labeled_markers: Vec<LabeledMarker>,
    pub force_plates: Vec<ForcePlateFrame>,
    pub devices: Vec<DeviceFrame>,
    pub suffix: FrameSuffix,
}

impl Frame {
    pub fn frame_number(&self) -> i32 {
        self.prefix.frame_number
    }

    /// Frame-level counts handed to the summary listener.
    pub fn summary(&self) -> FrameSummary {
        FrameSummary {
            frame_number: self.prefix.frame_number,
            marker_set_count: self.marker_sets.marker_sets.len(),
            unlabeled_marker_count: self.marker_sets.unlabeled_markers.len(),
            rigid_body_count: self.rigid_bodies.len(),
            skeleton_count: self.skeletons.len(),
            labeled_marker_count: self.labeled_markers.len(),
            timecode: self.suffix.timecode,
            timecode_sub: self.suffix.timecode_sub,
            timestamp: self.suffix.timestamp,
            is_recording: self.suffix.is_recording(),
            tracked_models_changed: self.suffix.tracked_models_changed(),
        }
    }

    /// Find a top-level rigid body by id.
    pub fn rigid_body(&self, id: i32) -> Option<&RigidBodyFrame> {
        self.rigid_bodies.iter().find(|rb| rb.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FramePrefix {
    pub frame_number: i32,
}

/// Named marker groups plus the unlabeled marker cloud.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerSetFrame {
    pub marker_sets: Vec<MarkerGroup>,
    pub unlabeled_markers: Vec<Vec3>,
}

impl MarkerSetFrame {
    pub fn get(&self, name: &str) -> Option<&MarkerGroup> {
        self.marker_sets.iter().find(|group| group.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerGroup {
    pub name: String,
    pub positions: Vec<Vec3>,
}

/// Legacy per-marker entry inside a rigid body (bitstream < 3.0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidBodyMarker {
    pub position: Vec3,
    /// Present from 2.0.
    pub id: Option<i32>,
    /// Present from 2.0.
    pub size: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidBodyFrame {
    pub id: i32,
    pub position: Vec3,
    pub orientation: Quat,
    /// Only populated for 1.x and 2.x streams.
    pub markers: Vec<RigidBodyMarker>,
    pub mean_error: f32,
    pub tracking_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SkeletonFrame {
    pub id: i32,
    pub rigid_bodies: Vec<RigidBodyFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LabeledMarker {
    /// Model id in the high 16 bits, marker id in the low 16 bits.
    pub id: i32,
    pub position: Vec3,
    pub size: f32,
    pub params: FlagWord,
    /// Present from 3.0.
    pub residual: f32,
}

impl LabeledMarker {
    pub fn model_id(&self) -> u16 {
        ((self.id as u32) >> 16) as u16
    }

    pub fn marker_id(&self) -> u16 {
        (self.id as u32 & 0xFFFF) as u16
    }

    pub fn is_occluded(&self) -> bool {
        self.params.has_flag(flags::labeled_marker::OCCLUDED)
    }

    pub fn is_point_cloud_solved(&self) -> bool {
        self.params.has_flag(flags::labeled_marker::POINT_CLOUD_SOLVED)
    }

    pub fn is_model_solved(&self) -> bool {
        self.params.has_flag(flags::labeled_marker::MODEL_SOLVED)
    }
}

/// Samples of one analog channel for the current acquisition window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalogChannel {
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForcePlateFrame {
    pub id: i32,
    pub channels: Vec<AnalogChannel>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceFrame {
    pub id: i32,
    pub channels: Vec<AnalogChannel>,
}

/// High-resolution clock stamps (3.0 and newer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrecisionTimestamps {
    pub camera_mid_exposure: u64,
    pub data_received: u64,
    pub transmit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameSuffix {
    pub timecode: u32,
    pub timecode_sub: u32,
    /// Seconds since capture start; widened from f32 for streams before 2.7.
    pub timestamp: f64,
    pub precision_timestamps: Option<PrecisionTimestamps>,
    pub params: FlagWord,
}

impl FrameSuffix {
    pub fn is_recording(&self) -> bool {
        self.params.has_flag(flags::frame::RECORDING)
    }

    pub fn tracked_models_changed(&self) -> bool {
        self.params.has_flag(flags::frame::TRACKED_MODELS_CHANGED)
    }
}

/// Counts and timing handed to the frame-summary listener.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameSummary {
    pub frame_number: i32,
    pub marker_set_count: usize,
    pub unlabeled_marker_count: usize,
    pub rigid_body_count: usize,
    pub skeleton_count: usize,
    pub labeled_marker_count: usize,
    pub timecode: u32,
    pub timecode_sub: u32,
    pub timestamp: f64,
    pub is_recording: bool,
    pub tracked_models_changed: bool,
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} ({} marker sets, {} unlabeled, {} rigid bodies, {} skeletons, {} labeled) t={:.3}",
            self.frame_number,
            self.marker_set_count,
            self.unlabeled_marker_count,
            self.rigid_body_count,
            self.skeleton_count,
            self.labeled_marker_count,
            self.timestamp
        )
    }
}
