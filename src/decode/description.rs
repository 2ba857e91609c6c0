//! Version-gated `ModelDef` decoder.
//!
//! A description payload is an entry count followed by tagged entries. Each
//! entry is decoded in isolation: the first entry that fails (unknown tag or
//! truncation) stops decoding, and the set keeps every entry decoded before
//! it along with a [`DecodeFailure`] describing where it stopped.

use tracing::{debug, trace, warn};

use crate::protocol::{ByteReader, Version};
use crate::types::{
    CameraDescription, DecodeFailure, Description, DescriptionKind, DescriptionSet,
    DeviceDescription, ForcePlateDescription, MarkerSetDescription, RigidBodyDescription,
    RigidBodyMarkerDescription, SkeletonDescription,
};
use crate::{NatNetError, Result};

const ENTRY_MIN: usize = 4;
const NAME_MIN: usize = 1;
const RIGID_BODY_MARKER_MIN: usize = 12 + 4;
const RIGID_BODY_MIN: usize = 4 + 4 + 12;

/// Decode a `ModelDef` payload (header already stripped).
///
/// Fails only when the entry count itself cannot be read. Later failures are
/// recorded on the returned set, and the returned length covers only the
/// entries that decoded completely.
pub fn decode_descriptions(payload: &[u8], version: Version) -> Result<(usize, DescriptionSet)> {
    let mut reader = ByteReader::new(payload);
    let count = reader.read_count("description count", ENTRY_MIN)?;
    trace!(count, %version, "Decoding descriptions");

    let mut set = DescriptionSet::new();
    for index in 0..count {
        let entry_start = reader.position();
        // Decode on a copy so a failing entry never advances the real cursor
        let mut entry_reader = reader.clone();
        match decode_entry(&mut entry_reader, version, index) {
            Ok(description) => {
                trace!(index, kind = %description.kind(), name = description.name(), "Description");
                set.push(description);
                reader = entry_reader;
            }
            Err(err) => {
                let tag = match &err {
                    NatNetError::UnknownDescriptionType { tag, .. } => Some(*tag),
                    _ => ByteReader::at(payload, entry_start).read_u32("description type").ok(),
                };
                warn!(
                    index,
                    count,
                    offset = entry_start,
                    decoded = set.len(),
                    error = %err,
                    "Description decoding stopped"
                );
                set.failure =
                    Some(DecodeFailure { tag, index, offset: entry_start, reason: err.to_string() });
                break;
            }
        }
    }

    debug!(decoded = set.len(), count, complete = set.is_complete(), "Descriptions decoded");
    Ok((reader.position(), set))
}

fn decode_entry(reader: &mut ByteReader<'_>, version: Version, index: usize) -> Result<Description> {
    let offset = reader.position();
    let tag = reader.read_u32("description type")?;
    let kind = DescriptionKind::from_tag(tag)
        .ok_or(NatNetError::UnknownDescriptionType { tag, index, offset })?;

    match kind {
        DescriptionKind::MarkerSet => marker_set(reader).map(Description::MarkerSet),
        DescriptionKind::RigidBody => rigid_body(reader, version).map(Description::RigidBody),
        DescriptionKind::Skeleton => skeleton(reader, version).map(Description::Skeleton),
        DescriptionKind::ForcePlate => {
            require_instruments(kind, version, reader.position())?;
            force_plate(reader).map(Description::ForcePlate)
        }
        DescriptionKind::Device => {
            require_instruments(kind, version, reader.position())?;
            device(reader).map(Description::Device)
        }
        DescriptionKind::Camera => camera(reader).map(Description::Camera),
    }
}

fn require_instruments(kind: DescriptionKind, version: Version, offset: usize) -> Result<()> {
    if version.describes_instruments() {
        return Ok(());
    }
    Err(NatNetError::malformed(
        format!("{} description", kind),
        offset,
        format!("{} descriptions require bitstream 3.0 or newer, active version is {}", kind, version),
    ))
}

fn read_names(reader: &mut ByteReader<'_>, context: &str) -> Result<Vec<String>> {
    let count = reader.read_count(&format!("{} count", context), NAME_MIN)?;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(reader.read_cstr(context)?);
    }
    Ok(names)
}

fn marker_set(reader: &mut ByteReader<'_>) -> Result<MarkerSetDescription> {
    let name = reader.read_cstr("marker set name")?;
    let marker_names = read_names(reader, "marker name")?;
    Ok(MarkerSetDescription { name, marker_names })
}

fn rigid_body(reader: &mut ByteReader<'_>, version: Version) -> Result<RigidBodyDescription> {
    let name = if version.describes_rigid_body_names() {
        reader.read_cstr("rigid body name")?
    } else {
        String::new()
    };
    let id = reader.read_i32("rigid body id")?;
    let parent_id = reader.read_i32("rigid body parent id")?;
    let offset = reader.read_vec3("rigid body offset")?;

    let mut markers = Vec::new();
    if version.describes_rigid_body_markers() {
        // Offsets for all markers, then labels for all markers, then names
        let count = reader.read_count("rigid body marker count", RIGID_BODY_MARKER_MIN)?;
        markers.reserve(count);
        for _ in 0..count {
            let offset = reader.read_vec3("rigid body marker offset")?;
            markers.push(RigidBodyMarkerDescription { offset, active_label: 0, name: String::new() });
        }
        for marker in markers.iter_mut() {
            marker.active_label = reader.read_i32("rigid body marker label")?;
        }
        if version.describes_rigid_body_marker_names() {
            for marker in markers.iter_mut() {
                marker.name = reader.read_cstr("rigid body marker name")?;
            }
        }
    }

    Ok(RigidBodyDescription { name, id, parent_id, offset, markers })
}

fn skeleton(reader: &mut ByteReader<'_>, version: Version) -> Result<SkeletonDescription> {
    let name = reader.read_cstr("skeleton name")?;
    let id = reader.read_i32("skeleton id")?;
    let count = reader.read_count("skeleton bone count", RIGID_BODY_MIN)?;
    let mut rigid_bodies = Vec::with_capacity(count);
    for _ in 0..count {
        rigid_bodies.push(rigid_body(reader, version)?);
    }
    Ok(SkeletonDescription { name, id, rigid_bodies })
}

fn force_plate(reader: &mut ByteReader<'_>) -> Result<ForcePlateDescription> {
    let id = reader.read_i32("force plate id")?;
    let serial_number = reader.read_cstr("force plate serial number")?;
    let width = reader.read_f32("force plate width")?;
    let length = reader.read_f32("force plate length")?;
    let origin = reader.read_vec3("force plate origin")?;

    let mut calibration_matrix = [[0f32; 12]; 12];
    for row in calibration_matrix.iter_mut() {
        *row = reader.read_floats::<12>("force plate calibration matrix")?;
    }

    let flat = reader.read_floats::<12>("force plate corners")?;
    let mut corners = [[0f32; 3]; 4];
    for (corner, chunk) in corners.iter_mut().zip(flat.chunks_exact(3)) {
        corner.copy_from_slice(chunk);
    }

    let plate_type = reader.read_i32("force plate type")?;
    let channel_data_type = reader.read_i32("force plate channel data type")?;
    let channel_names = read_names(reader, "force plate channel name")?;

    Ok(ForcePlateDescription {
        id,
        serial_number,
        width,
        length,
        origin,
        calibration_matrix,
        corners,
        plate_type,
        channel_data_type,
        channel_names,
    })
}

fn device(reader: &mut ByteReader<'_>) -> Result<DeviceDescription> {
    let id = reader.read_i32("device id")?;
    let name = reader.read_cstr("device name")?;
    let serial_number = reader.read_cstr("device serial number")?;
    let device_type = reader.read_i32("device type")?;
    let channel_data_type = reader.read_i32("device channel data type")?;
    let channel_names = read_names(reader, "device channel name")?;
    Ok(DeviceDescription { id, name, serial_number, device_type, channel_data_type, channel_names })
}

fn camera(reader: &mut ByteReader<'_>) -> Result<CameraDescription> {
    let name = reader.read_cstr("camera name")?;
    let position = reader.read_vec3("camera position")?;
    let orientation = reader.read_quat("camera orientation")?;
    Ok(CameraDescription { name, position, orientation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ByteWriter;
    use crate::test_utils::{DescriptionFixture, sample_descriptions};

    #[test]
    fn single_marker_set() {
        let version = Version::bitstream(3, 1);
        let payload = DescriptionFixture::new(version).marker_set("Wand", &["A", "B"]).build();
        let (consumed, set) = decode_descriptions(&payload, version).unwrap();

        assert_eq!(consumed, payload.len());
        assert!(set.is_complete());
        assert_eq!(set.len(), 1);
        match &set.entries[0] {
            Description::MarkerSet(ms) => {
                assert_eq!(ms.name, "Wand");
                assert_eq!(ms.marker_names, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("expected marker set, got {:?}", other),
        }
    }

    #[test]
    fn full_sets_survive_encoding() {
        for version in [Version::bitstream(3, 0), Version::bitstream(4, 1), Version::UNSET] {
            let expected = sample_descriptions(version);
            let payload = DescriptionFixture::from_set(&expected, version).build();
            let (consumed, set) = decode_descriptions(&payload, version).unwrap();
            assert_eq!(consumed, payload.len(), "version {}", version);
            assert_eq!(set, expected, "version {}", version);
        }
    }

    #[test]
    fn unset_version_reads_marker_names() {
        let version = Version::UNSET;
        let set = sample_descriptions(version);
        let rb = set.rigid_bodies().next().unwrap();
        assert!(!rb.name.is_empty());
        assert!(rb.markers.iter().all(|m| !m.name.is_empty()));
    }

    #[test]
    fn rigid_body_without_names_before_two() {
        let version = Version::bitstream(1, 9);
        let payload = DescriptionFixture::new(version)
            .rigid_body(&RigidBodyDescription { id: 3, parent_id: -1, ..Default::default() })
            .build();
        let (consumed, set) = decode_descriptions(&payload, version).unwrap();
        assert_eq!(consumed, payload.len());
        let rb = set.rigid_bodies().next().unwrap();
        assert_eq!(rb.id, 3);
        assert_eq!(rb.parent_id, -1);
        assert!(rb.name.is_empty());
        assert!(rb.markers.is_empty());
    }

    #[test]
    fn unknown_tag_keeps_partial_set() {
        let version = Version::bitstream(3, 0);
        let mut payload = DescriptionFixture::new(version)
            .marker_set("First", &["m1"])
            .camera("Cam", [0.0, 1.0, 2.0], [0.0, 0.0, 0.0, 1.0])
            .with_declared_count(3)
            .build();
        let good_len = payload.len();
        let mut writer = ByteWriter::new();
        writer.put_u32(9).put_cstr("mystery");
        payload.extend_from_slice(writer.as_slice());

        let (consumed, set) = decode_descriptions(&payload, version).unwrap();
        assert_eq!(consumed, good_len);
        assert_eq!(set.len(), 2);
        let failure = set.failure.as_ref().unwrap();
        assert_eq!(failure.tag, Some(9));
        assert_eq!(failure.index, 2);
        assert_eq!(failure.offset, good_len);
    }

    #[test]
    fn truncated_entry_is_not_exposed() {
        let version = Version::bitstream(3, 0);
        let payload = DescriptionFixture::new(version)
            .marker_set("First", &["m1"])
            .rigid_body(&RigidBodyDescription { name: "Body".into(), id: 2, ..Default::default() })
            .build();
        let (_, set) = decode_descriptions(&payload[..payload.len() - 3], version).unwrap();
        assert_eq!(set.len(), 1);
        let failure = set.failure.unwrap();
        assert_eq!(failure.tag, Some(DescriptionKind::RigidBody.tag()));
        assert_eq!(failure.index, 1);
    }

    #[test]
    fn instruments_need_three() {
        let version = Version::bitstream(2, 11);
        let payload = DescriptionFixture::new(Version::bitstream(3, 0))
            .device(&DeviceDescription { name: "Analog".into(), ..Default::default() })
            .build();
        let (_, set) = decode_descriptions(&payload, version).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.failure.unwrap().tag, Some(DescriptionKind::Device.tag()));
    }

    #[test]
    fn missing_count_is_an_error() {
        assert!(decode_descriptions(&[1, 0], Version::bitstream(3, 0)).is_err());
    }
}
