//! Decoded `ModelDef` entities.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{Quat, Vec3};

/// The six description kinds and their wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DescriptionKind {
    MarkerSet = 0,
    RigidBody = 1,
    Skeleton = 2,
    ForcePlate = 3,
    Device = 4,
    Camera = 5,
}

impl DescriptionKind {
    pub fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => DescriptionKind::MarkerSet,
            1 => DescriptionKind::RigidBody,
            2 => DescriptionKind::Skeleton,
            3 => DescriptionKind::ForcePlate,
            4 => DescriptionKind::Device,
            5 => DescriptionKind::Camera,
            _ => return None,
        })
    }

    pub const fn tag(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptionKind::MarkerSet => "marker set",
            DescriptionKind::RigidBody => "rigid body",
            DescriptionKind::Skeleton => "skeleton",
            DescriptionKind::ForcePlate => "force plate",
            DescriptionKind::Device => "device",
            DescriptionKind::Camera => "camera",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerSetDescription {
    pub name: String,
    pub marker_names: Vec<String>,
}

/// Marker offset within a rigid body (3.0 and newer).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidBodyMarkerDescription {
    pub offset: Vec3,
    pub active_label: i32,
    /// Empty before 4.0.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidBodyDescription {
    /// Empty before 2.0.
    pub name: String,
    pub id: i32,
    pub parent_id: i32,
    pub offset: Vec3,
    pub markers: Vec<RigidBodyMarkerDescription>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SkeletonDescription {
    pub name: String,
    pub id: i32,
    pub rigid_bodies: Vec<RigidBodyDescription>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForcePlateDescription {
    pub id: i32,
    pub serial_number: String,
    pub width: f32,
    pub length: f32,
    pub origin: Vec3,
    pub calibration_matrix: [[f32; 12]; 12],
    pub corners: [Vec3; 4],
    pub plate_type: i32,
    pub channel_data_type: i32,
    pub channel_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub id: i32,
    pub name: String,
    pub serial_number: String,
    pub device_type: i32,
    pub channel_data_type: i32,
    pub channel_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraDescription {
    pub name: String,
    pub position: Vec3,
    pub orientation: Quat,
}

/// One entry of a description set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Description {
    MarkerSet(MarkerSetDescription),
    RigidBody(RigidBodyDescription),
    Skeleton(SkeletonDescription),
    ForcePlate(ForcePlateDescription),
    Device(DeviceDescription),
    Camera(CameraDescription),
}

impl Description {
    pub fn kind(&self) -> DescriptionKind {
        match self {
            Description::MarkerSet(_) => DescriptionKind::MarkerSet,
            Description::RigidBody(_) => DescriptionKind::RigidBody,
            Description::Skeleton(_) => DescriptionKind::Skeleton,
            Description::ForcePlate(_) => DescriptionKind::ForcePlate,
            Description::Device(_) => DescriptionKind::Device,
            Description::Camera(_) => DescriptionKind::Camera,
        }
    }

    /// Display name; force plates are named by serial number.
    pub fn name(&self) -> &str {
        match self {
            Description::MarkerSet(d) => &d.name,
            Description::RigidBody(d) => &d.name,
            Description::Skeleton(d) => &d.name,
            Description::ForcePlate(d) => &d.serial_number,
            Description::Device(d) => &d.name,
            Description::Camera(d) => &d.name,
        }
    }
}

/// Where and why description decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeFailure {
    /// Type tag of the failing entry, if it could be read.
    pub tag: Option<u32>,
    /// Zero-based index of the failing entry.
    pub index: usize,
    /// Payload offset where the failing entry started.
    pub offset: usize,
    pub reason: String,
}

/// Ordered, heterogeneous descriptions from one `ModelDef` packet.
///
/// Insertion order matches the wire and is independent of kind. When decoding
/// stopped early, `failure` records where; `entries` then holds only the
/// entries that decoded completely.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescriptionSet {
    pub entries: Vec<Description>,
    pub failure: Option<DecodeFailure>,
}

impl DescriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, description: Description) {
        self.entries.push(description);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when every declared entry was decoded.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Description> {
        self.entries.iter()
    }

    pub fn count_of(&self, kind: DescriptionKind) -> usize {
        self.entries.iter().filter(|d| d.kind() == kind).count()
    }

    pub fn marker_sets(&self) -> impl Iterator<Item = &MarkerSetDescription> {
        self.entries.iter().filter_map(|d| match d {
            Description::MarkerSet(ms) => Some(ms),
            _ => None,
        })
    }

    pub fn rigid_bodies(&self) -> impl Iterator<Item = &RigidBodyDescription> {
        self.entries.iter().filter_map(|d| match d {
            Description::RigidBody(rb) => Some(rb),
            _ => None,
        })
    }

    pub fn skeletons(&self) -> impl Iterator<Item = &SkeletonDescription> {
        self.entries.iter().filter_map(|d| match d {
            Description::Skeleton(sk) => Some(sk),
            _ => None,
        })
    }

    pub fn force_plates(&self) -> impl Iterator<Item = &ForcePlateDescription> {
        self.entries.iter().filter_map(|d| match d {
            Description::ForcePlate(fp) => Some(fp),
            _ => None,
        })
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceDescription> {
        self.entries.iter().filter_map(|d| match d {
            Description::Device(dev) => Some(dev),
            _ => None,
        })
    }

    pub fn cameras(&self) -> impl Iterator<Item = &CameraDescription> {
        self.entries.iter().filter_map(|d| match d {
            Description::Camera(cam) => Some(cam),
            _ => None,
        })
    }

    /// Look up a rigid body description by id, including skeleton bones.
    pub fn find_rigid_body(&self, id: i32) -> Option<&RigidBodyDescription> {
        self.rigid_bodies()
            .find(|rb| rb.id == id)
            .or_else(|| self.skeletons().flat_map(|sk| sk.rigid_bodies.iter()).find(|rb| rb.id == id))
    }
}

impl<'a> IntoIterator for &'a DescriptionSet {
    type Item = &'a Description;
    type IntoIter = std::slice::Iter<'a, Description>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
