//! Version-gated `FrameOfData` decoder.
//!
//! Sections are read in wire order (prefix, marker sets, rigid bodies,
//! skeletons, labeled markers, force plates, devices, suffix). Optional
//! sections and fields are gated on the bitstream version, see
//! [`Version`](crate::protocol::Version) for the individual predicates.

use tracing::trace;

use crate::protocol::{ByteReader, Version};
use crate::types::{
    AnalogChannel, DeviceFrame, FlagWord, ForcePlateFrame, Frame, FramePrefix, FrameSectionKind,
    FrameSuffix, LabeledMarker, MarkerGroup, MarkerSetFrame, PrecisionTimestamps, RigidBodyFrame,
    RigidBodyMarker, SkeletonFrame, flags,
};
use crate::{NatNetError, Result};

// Minimum encoded sizes used to sanity-check counts
const VEC3_SIZE: usize = 12;
const MARKER_GROUP_MIN: usize = 1 + 4;
const RIGID_BODY_MIN: usize = 4 + 12 + 16;
const SKELETON_MIN: usize = 4 + 4;
const LABELED_MARKER_MIN: usize = 4 + 12 + 4;
const ANALOG_ENTITY_MIN: usize = 4 + 4;
const CHANNEL_MIN: usize = 4;
const SAMPLE_SIZE: usize = 4;

/// Decode a `FrameOfData` payload (header already stripped).
///
/// Returns the number of payload bytes consumed together with the frame.
pub fn decode_frame(payload: &[u8], version: Version) -> Result<(usize, Frame)> {
    FrameDecoder::new(version).decode(payload)
}

/// Frame decoder with an optional per-rigid-body observer.
///
/// The observer sees every rigid body as soon as it is decoded, including
/// bones nested in skeletons.
pub struct FrameDecoder<'a> {
    version: Version,
    on_rigid_body: Option<&'a mut dyn FnMut(&RigidBodyFrame)>,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(version: Version) -> Self {
        Self { version, on_rigid_body: None }
    }

    pub fn with_rigid_body_observer(mut self, observer: &'a mut dyn FnMut(&RigidBodyFrame)) -> Self {
        self.on_rigid_body = Some(observer);
        self
    }

    pub fn decode(mut self, payload: &[u8]) -> Result<(usize, Frame)> {
        let mut reader = ByteReader::new(payload);
        let mut frame = Frame::default();

        for section in FrameSectionKind::ALL {
            if !section.is_present(self.version) {
                trace!(%section, version = %self.version, "Section absent for version");
                continue;
            }
            let start = reader.position();
            match section {
                FrameSectionKind::Prefix => frame.prefix = self.prefix(&mut reader)?,
                FrameSectionKind::MarkerSets => frame.marker_sets = self.marker_sets(&mut reader)?,
                FrameSectionKind::RigidBodies => {
                    frame.rigid_bodies = self.rigid_bodies(&mut reader)?
                }
                FrameSectionKind::Skeletons => frame.skeletons = self.skeletons(&mut reader)?,
                FrameSectionKind::LabeledMarkers => {
                    frame.labeled_markers = self.labeled_markers(&mut reader)?
                }
                FrameSectionKind::ForcePlates => {
                    frame.force_plates = self
                        .analog_entities(&mut reader, "force plate")?
                        .into_iter()
                        .map(|(id, channels)| ForcePlateFrame { id, channels })
                        .collect()
                }
                FrameSectionKind::Devices => {
                    frame.devices = self
                        .analog_entities(&mut reader, "device")?
                        .into_iter()
                        .map(|(id, channels)| DeviceFrame { id, channels })
                        .collect()
                }
                FrameSectionKind::Suffix => frame.suffix = self.suffix(&mut reader)?,
            }
            trace!(%section, start, end = reader.position(), "Decoded section");
        }

        Ok((reader.position(), frame))
    }

    fn prefix(&self, reader: &mut ByteReader<'_>) -> Result<FramePrefix> {
        let frame_number = reader.read_i32("frame number")?;
        trace!(frame_number, "Frame prefix");
        Ok(FramePrefix { frame_number })
    }

    fn marker_sets(&self, reader: &mut ByteReader<'_>) -> Result<MarkerSetFrame> {
        let set_count = reader.read_count("marker set count", MARKER_GROUP_MIN)?;
        let mut marker_sets = Vec::with_capacity(set_count);
        for _ in 0..set_count {
            let name = reader.read_cstr("marker set name")?;
            let positions = read_positions(reader, "marker set marker")?;
            trace!(%name, markers = positions.len(), "Marker set");
            marker_sets.push(MarkerGroup { name, positions });
        }

        let unlabeled_markers = read_positions(reader, "unlabeled marker")?;
        trace!(sets = set_count, unlabeled = unlabeled_markers.len(), "Marker set data");
        Ok(MarkerSetFrame { marker_sets, unlabeled_markers })
    }

    fn rigid_bodies(&mut self, reader: &mut ByteReader<'_>) -> Result<Vec<RigidBodyFrame>> {
        let count = reader.read_count("rigid body count", RIGID_BODY_MIN)?;
        let mut bodies = Vec::with_capacity(count);
        for _ in 0..count {
            bodies.push(self.rigid_body(reader)?);
        }
        Ok(bodies)
    }

    fn rigid_body(&mut self, reader: &mut ByteReader<'_>) -> Result<RigidBodyFrame> {
        let version = self.version;
        let id = reader.read_i32("rigid body id")?;
        let position = reader.read_vec3("rigid body position")?;
        let orientation = reader.read_quat("rigid body orientation")?;

        let mut markers = Vec::new();
        if version.has_rigid_body_markers() {
            let marker_count = reader.read_count("rigid body marker count", VEC3_SIZE)?;
            markers.reserve(marker_count);
            for _ in 0..marker_count {
                let position = reader.read_vec3("rigid body marker position")?;
                markers.push(RigidBodyMarker { position, id: None, size: None });
            }
            if version.has_rigid_body_marker_details() {
                for marker in markers.iter_mut() {
                    marker.id = Some(reader.read_i32("rigid body marker id")?);
                }
                for marker in markers.iter_mut() {
                    marker.size = Some(reader.read_f32("rigid body marker size")?);
                }
            }
        }

        let mean_error =
            if version.has_mean_error() { reader.read_f32("rigid body mean error")? } else { 0.0 };

        let tracking_valid = if version.has_tracking_flags() {
            FlagWord(reader.read_u16("rigid body params")?)
                .has_flag(flags::rigid_body::TRACKING_VALID)
        } else {
            false
        };

        let body = RigidBodyFrame { id, position, orientation, markers, mean_error, tracking_valid };
        trace!(id, ?position, ?orientation, tracking_valid, "Rigid body");
        if let Some(observer) = self.on_rigid_body.as_deref_mut() {
            observer(&body);
        }
        Ok(body)
    }

    fn skeletons(&mut self, reader: &mut ByteReader<'_>) -> Result<Vec<SkeletonFrame>> {
        let count = reader.read_count("skeleton count", SKELETON_MIN)?;
        let mut skeletons = Vec::with_capacity(count);
        for _ in 0..count {
            let id = reader.read_i32("skeleton id")?;
            let rigid_bodies = self.rigid_bodies(reader)?;
            trace!(id, bones = rigid_bodies.len(), "Skeleton");
            skeletons.push(SkeletonFrame { id, rigid_bodies });
        }
        Ok(skeletons)
    }

    fn labeled_markers(&self, reader: &mut ByteReader<'_>) -> Result<Vec<LabeledMarker>> {
        let version = self.version;
        let count = reader.read_count("labeled marker count", LABELED_MARKER_MIN)?;
        let mut markers = Vec::with_capacity(count);
        for _ in 0..count {
            let id = reader.read_i32("labeled marker id")?;
            let position = reader.read_vec3("labeled marker position")?;
            let size = reader.read_f32("labeled marker size")?;
            let params = if version.has_tracking_flags() {
                FlagWord(reader.read_u16("labeled marker params")?)
            } else {
                FlagWord::default()
            };
            let residual = if version.has_marker_residual() {
                reader.read_f32("labeled marker residual")?
            } else {
                0.0
            };
            let marker = LabeledMarker { id, position, size, params, residual };
            trace!(model_id = marker.model_id(), marker_id = marker.marker_id(), "Labeled marker");
            markers.push(marker);
        }
        Ok(markers)
    }

    /// Force plates and devices share one layout: id, channels, samples.
    fn analog_entities(
        &self,
        reader: &mut ByteReader<'_>,
        kind: &str,
    ) -> Result<Vec<(i32, Vec<AnalogChannel>)>> {
        let [count_ctx, id_ctx, channel_ctx, sample_count_ctx, sample_ctx] =
            ["count", "id", "channel count", "sample count", "sample"].map(|field| format!("{} {}", kind, field));

        let count = reader.read_count(&count_ctx, ANALOG_ENTITY_MIN)?;
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            let id = reader.read_i32(&id_ctx)?;
            let channel_count = reader.read_count(&channel_ctx, CHANNEL_MIN)?;
            let mut channels = Vec::with_capacity(channel_count);
            for _ in 0..channel_count {
                let sample_count = reader.read_count(&sample_count_ctx, SAMPLE_SIZE)?;
                let mut samples = Vec::with_capacity(sample_count);
                for _ in 0..sample_count {
                    samples.push(reader.read_f32(&sample_ctx)?);
                }
                channels.push(AnalogChannel { samples });
            }
            trace!(kind, id, channels = channels.len(), "Analog entity");
            entities.push((id, channels));
        }
        Ok(entities)
    }

    fn suffix(&self, reader: &mut ByteReader<'_>) -> Result<FrameSuffix> {
        let version = self.version;
        let timecode = reader.read_u32("timecode")?;
        let timecode_sub = reader.read_u32("timecode subframe")?;
        let timestamp = if version.has_double_timestamp() {
            reader.read_f64("timestamp")?
        } else {
            f64::from(reader.read_f32("timestamp")?)
        };
        let precision_timestamps = if version.has_precision_timestamps() {
            Some(PrecisionTimestamps {
                camera_mid_exposure: reader.read_u64("mid-exposure timestamp")?,
                data_received: reader.read_u64("data received timestamp")?,
                transmit: reader.read_u64("transmit timestamp")?,
            })
        } else {
            None
        };
        let params = FlagWord(reader.read_u16("frame params")?);
        trace!(timecode, timecode_sub, timestamp, params = params.value(), "Frame suffix");
        Ok(FrameSuffix { timecode, timecode_sub, timestamp, precision_timestamps, params })
    }
}

fn read_positions(reader: &mut ByteReader<'_>, context: &str) -> Result<Vec<[f32; 3]>> {
    let count = reader.read_count(&format!("{} count", context), VEC3_SIZE)?;
    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        positions.push(reader.read_vec3(context)?);
    }
    Ok(positions)
}

/// Attach the section name to a decode error.
pub(crate) fn frame_error(err: NatNetError, frame_len: usize) -> NatNetError {
    match err {
        NatNetError::Truncated { context, offset, needed, available } => NatNetError::Truncated {
            context: format!("frame of data ({} bytes): {}", frame_len, context),
            offset,
            needed,
            available,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ByteWriter;
    use crate::test_utils::{FrameFixture, encode_frame, sample_frame};

    /// 2.x frame written field by field: one rigid body with one legacy
    /// marker and one labeled marker. Params words appear from 2.6 and the
    /// timestamp widens to a double from 2.7.
    fn written_2x_frame(minor: u8) -> Vec<u8> {
        let mut w = ByteWriter::default();
        w.put_i32(77)
            .put_count(0) // marker sets
            .put_count(0) // unlabeled markers
            .put_count(1)
            .put_i32(5)
            .put_floats(&[1.0, 2.0, 3.0])
            .put_floats(&[0.0, 0.0, 0.0, 1.0])
            .put_count(1)
            .put_floats(&[0.1, 0.2, 0.3])
            .put_i32(9)
            .put_f32(0.02)
            .put_f32(0.25);
        if minor >= 6 {
            w.put_u16(0x0001);
        }
        w.put_count(0) // skeletons
            .put_count(1)
            .put_i32(0x0001_0003)
            .put_floats(&[4.0, 5.0, 6.0])
            .put_f32(0.014);
        if minor >= 6 {
            w.put_u16(0x0004);
        }
        w.put_u32(11).put_u32(0);
        if minor >= 7 {
            w.put_f64(1.5);
        } else {
            w.put_f32(1.5);
        }
        w.put_u16(0x0001);
        w.into_inner()
    }

    #[test]
    fn written_2x_frames_follow_minor_gates() {
        for (minor, len) in [(5u8, 118usize), (6, 122), (7, 126)] {
            let version = Version::bitstream(2, minor);
            let payload = written_2x_frame(minor);
            assert_eq!(payload.len(), len);

            let (consumed, frame) = decode_frame(&payload, version).unwrap();
            assert_eq!(consumed, len, "version {}", version);
            assert_eq!(frame.frame_number(), 77);

            let body = &frame.rigid_bodies[0];
            assert_eq!(body.id, 5);
            assert_eq!(body.position, [1.0, 2.0, 3.0]);
            assert_eq!(body.markers[0].id, Some(9));
            assert_eq!(body.markers[0].size, Some(0.02));
            assert_eq!(body.mean_error, 0.25);
            assert_eq!(body.tracking_valid, minor >= 6);

            let marker = &frame.labeled_markers[0];
            assert_eq!((marker.model_id(), marker.marker_id()), (1, 3));
            assert_eq!(marker.position, [4.0, 5.0, 6.0]);
            assert_eq!(marker.is_model_solved(), minor >= 6);

            assert_eq!(frame.suffix.timecode, 11);
            assert_eq!(frame.suffix.timestamp, 1.5);
            assert!(frame.suffix.precision_timestamps.is_none());
            assert!(frame.suffix.is_recording());
        }
    }

    #[test]
    fn written_2x_frames_do_not_fit_neighbouring_minors() {
        for (written, read) in [(5u8, 6u8), (6, 5), (6, 7), (7, 6)] {
            let payload = written_2x_frame(written);
            let fits = decode_frame(&payload, Version::bitstream(2, read))
                .map(|(consumed, _)| consumed == payload.len())
                .unwrap_or(false);
            assert!(!fits, "2.{} frame read as 2.{}", written, read);
        }
    }

    #[test]
    fn fixtures_consume_exactly_their_length() {
        for version in [
            Version::bitstream(2, 0),
            Version::bitstream(2, 6),
            Version::bitstream(2, 9),
            Version::bitstream(2, 11),
            Version::bitstream(3, 0),
            Version::bitstream(4, 0),
        ] {
            let payload = encode_frame(&sample_frame(version), version);
            let (consumed, _) = decode_frame(&payload, version).unwrap();
            assert_eq!(consumed, payload.len(), "version {}", version);
        }
    }

    #[test]
    fn fixtures_decode_to_their_source() {
        for version in [Version::bitstream(2, 11), Version::bitstream(3, 1), Version::bitstream(4, 1)]
        {
            let frame = sample_frame(version);
            let payload = encode_frame(&frame, version);
            let (_, decoded) = decode_frame(&payload, version).unwrap();
            assert_eq!(decoded, frame, "version {}", version);
        }
    }

    #[test]
    fn single_rigid_body_at_3_1() {
        let version = Version::bitstream(3, 1);
        let payload = FrameFixture::new(version)
            .frame_number(100)
            .rigid_body(1, [1.0, 2.0, 3.0], [1.0, 0.0, 0.0, 0.0], true)
            .build();

        let (consumed, frame) = decode_frame(&payload, version).unwrap();
        assert_eq!(consumed, payload.len());
        assert_eq!(frame.prefix.frame_number, 100);
        assert_eq!(frame.rigid_bodies.len(), 1);

        let body = &frame.rigid_bodies[0];
        assert_eq!(body.id, 1);
        assert_eq!(body.position, [1.0, 2.0, 3.0]);
        assert_eq!(body.orientation, [1.0, 0.0, 0.0, 0.0]);
        assert!(body.tracking_valid);
        assert!(body.markers.is_empty());
    }

    #[test]
    fn legacy_markers_carry_details_from_two() {
        let version = Version::bitstream(2, 5);
        let mut frame = sample_frame(version);
        frame.rigid_bodies[0].markers = vec![
            RigidBodyMarker { position: [0.1, 0.2, 0.3], id: Some(11), size: Some(0.014) },
            RigidBodyMarker { position: [0.4, 0.5, 0.6], id: Some(12), size: Some(0.016) },
        ];
        let payload = encode_frame(&frame, version);
        let (_, decoded) = decode_frame(&payload, version).unwrap();
        let markers = &decoded.rigid_bodies[0].markers;
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[1].id, Some(12));
        assert_eq!(markers[1].size, Some(0.016));
    }

    #[test]
    fn legacy_markers_are_positions_only_before_two() {
        let version = Version::bitstream(1, 4);
        let mut frame = sample_frame(version);
        frame.rigid_bodies[0].markers =
            vec![RigidBodyMarker { position: [0.1, 0.2, 0.3], id: None, size: None }];
        let payload = encode_frame(&frame, version);
        let (consumed, decoded) = decode_frame(&payload, version).unwrap();
        assert_eq!(consumed, payload.len());
        let marker = decoded.rigid_bodies[0].markers[0];
        assert_eq!(marker.position, [0.1, 0.2, 0.3]);
        assert_eq!(marker.id, None);
        assert_eq!(marker.size, None);
        assert_eq!(decoded.rigid_bodies[0].mean_error, 0.0);
    }

    #[test]
    fn three_and_newer_have_no_legacy_markers() {
        let version = Version::bitstream(3, 0);
        let (_, decoded) =
            decode_frame(&encode_frame(&sample_frame(version), version), version).unwrap();
        assert!(decoded.rigid_bodies.iter().all(|rb| rb.markers.is_empty()));
        assert!(decoded.suffix.precision_timestamps.is_some());
    }

    #[test]
    fn observer_sees_bones() {
        let version = Version::bitstream(3, 0);
        let frame = sample_frame(version);
        let expected = frame.rigid_bodies.len()
            + frame.skeletons.iter().map(|sk| sk.rigid_bodies.len()).sum::<usize>();
        let payload = encode_frame(&frame, version);

        let mut seen = Vec::new();
        let mut observer = |rb: &RigidBodyFrame| seen.push(rb.id);
        FrameDecoder::new(version).with_rigid_body_observer(&mut observer).decode(&payload).unwrap();
        assert_eq!(seen.len(), expected);
        assert!(expected > frame.rigid_bodies.len());
    }

    #[test]
    fn truncated_frames_fail() {
        let version = Version::bitstream(3, 0);
        let payload = encode_frame(&sample_frame(version), version);
        for cut in [0, 3, payload.len() / 2, payload.len() - 1] {
            let err = decode_frame(&payload[..cut], version).unwrap_err();
            assert!(err.is_decode_error(), "cut at {}: {}", cut, err);
        }
    }

    #[test]
    fn force_plates_decode_once_per_plate() {
        let version = Version::bitstream(3, 0);
        let mut frame = sample_frame(version);
        frame.force_plates = vec![ForcePlateFrame {
            id: 1,
            channels: vec![
                AnalogChannel { samples: vec![1.0, 2.0] },
                AnalogChannel { samples: vec![3.0] },
                AnalogChannel { samples: vec![] },
            ],
        }];
        let (_, decoded) = decode_frame(&encode_frame(&frame, version), version).unwrap();
        assert_eq!(decoded.force_plates.len(), 1);
        assert_eq!(decoded.force_plates[0].channels.len(), 3);
    }

    #[test]
    fn float_timestamp_before_2_7() {
        let version = Version::bitstream(2, 6);
        let mut frame = sample_frame(version);
        frame.suffix.timestamp = 12.5;
        let (_, decoded) = decode_frame(&encode_frame(&frame, version), version).unwrap();
        assert_eq!(decoded.suffix.timestamp, 12.5);
    }

    #[test]
    fn truncation_errors_name_the_frame() {
        let err = frame_error(NatNetError::truncated("timecode", 40, 4, 1), 44);
        assert!(err.to_string().contains("frame of data (44 bytes): timecode"));
    }
}
