//! Object model for decoded NatNet data.
//!
//! Every type here is plain data: created fresh per packet by the decoders,
//! handed to listeners or subscription streams, and owned by the consumer
//! afterwards.
//!
//! ## Layout
//!
//! - [`Frame`] aggregates one `FrameOfData` packet, section by section
//!   ([`FrameSectionKind`] lists them in wire order)
//! - [`DescriptionSet`] holds the ordered [`Description`] entries of one
//!   `ModelDef` packet, plus a [`DecodeFailure`] when decoding stopped early
//! - [`ServerInfo`] and [`ServerMessage`] carry control-channel traffic
//! - [`FlagWord`] wraps the packed 16-bit parameter words
//!
//! ## Usage Example
//!
//! ```rust
//! use natnet::types::{FlagWord, LabeledMarker};
//!
//! let marker = LabeledMarker { id: (2 << 16) | 17, params: FlagWord(0b001), ..Default::default() };
//! assert_eq!(marker.model_id(), 2);
//! assert_eq!(marker.marker_id(), 17);
//! assert!(marker.is_occluded());
//! ```

mod description;
pub mod flags;
mod frame;
mod server;
mod update_rate;

pub use description::{
    CameraDescription, DecodeFailure, Description, DescriptionKind, DescriptionSet,
    DeviceDescription, ForcePlateDescription, MarkerSetDescription, RigidBodyDescription,
    RigidBodyMarkerDescription, SkeletonDescription,
};
pub use flags::FlagWord;
pub use frame::{
    AnalogChannel, DeviceFrame, ForcePlateFrame, Frame, FramePrefix, FrameSectionKind,
    FrameSuffix, FrameSummary, LabeledMarker, MarkerGroup, MarkerSetFrame, PrecisionTimestamps,
    RigidBodyFrame, RigidBodyMarker, SkeletonFrame,
};
pub use server::{ServerInfo, ServerMessage};
pub use update_rate::UpdateRate;

pub use crate::protocol::{Quat, Vec3};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn labeled_marker_ids_split_into_halves(model in any::<u16>(), marker in any::<u16>()) {
            let id = ((model as u32) << 16 | marker as u32) as i32;
            let labeled = LabeledMarker { id, ..Default::default() };
            prop_assert_eq!(labeled.model_id(), model);
            prop_assert_eq!(labeled.marker_id(), marker);
        }

        #[test]
        fn unknown_tags_have_no_kind(tag in 6u32..) {
            prop_assert!(DescriptionKind::from_tag(tag).is_none());
        }
    }
}
