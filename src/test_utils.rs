//! Synthetic NatNet packet builders for tests and benchmarks
//!
//! The encoders here mirror the decoders field for field, so a fixture built
//! for a given bitstream version is exactly what a server speaking that
//! version would send.

#![cfg(any(test, feature = "benchmark"))]

use crate::protocol::{ByteWriter, MessageId, PacketHeader, SERVER_NAME_LEN, Quat, Vec3, Version};
use crate::types::{
    AnalogChannel, CameraDescription, Description, DescriptionSet, DeviceDescription, DeviceFrame,
    FlagWord, ForcePlateDescription, ForcePlateFrame, Frame, FramePrefix, FrameSuffix,
    LabeledMarker, MarkerGroup, MarkerSetDescription, MarkerSetFrame, PrecisionTimestamps,
    RigidBodyDescription, RigidBodyFrame, RigidBodyMarker, RigidBodyMarkerDescription,
    SkeletonDescription, SkeletonFrame,
};

/// Wrap a payload in a `[u16 id][u16 len]` header.
pub fn packet(id: MessageId, payload: &[u8]) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(payload.len() + 4);
    PacketHeader::new(id, payload.len() as u16).write(&mut writer);
    writer.put_bytes(payload);
    writer.into_inner()
}

/// `ServerInfo` payload as sent by the server.
pub fn server_info_payload(name: &str, server_version: Version, stream_version: Version) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(SERVER_NAME_LEN + 8);
    writer
        .put_fixed_str(name, SERVER_NAME_LEN)
        .put_bytes(&server_version.to_bytes())
        .put_bytes(&stream_version.to_bytes());
    writer.into_inner()
}

/// Encode a frame the way a server speaking `version` would.
///
/// Fields the version does not carry are skipped.
pub fn encode_frame(frame: &Frame, version: Version) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(256);
    w.put_i32(frame.prefix.frame_number);

    w.put_count(frame.marker_sets.marker_sets.len());
    for group in &frame.marker_sets.marker_sets {
        w.put_cstr(&group.name);
        put_positions(&mut w, &group.positions);
    }
    put_positions(&mut w, &frame.marker_sets.unlabeled_markers);

    put_rigid_bodies(&mut w, &frame.rigid_bodies, version);

    if version.has_skeletons() {
        w.put_count(frame.skeletons.len());
        for skeleton in &frame.skeletons {
            w.put_i32(skeleton.id);
            put_rigid_bodies(&mut w, &skeleton.rigid_bodies, version);
        }
    }

    if version.has_labeled_markers() {
        w.put_count(frame.labeled_markers.len());
        for marker in &frame.labeled_markers {
            w.put_i32(marker.id).put_floats(&marker.position).put_f32(marker.size);
            if version.has_tracking_flags() {
                w.put_u16(marker.params.value());
            }
            if version.has_marker_residual() {
                w.put_f32(marker.residual);
            }
        }
    }

    if version.has_force_plates() {
        let plates: Vec<_> = frame.force_plates.iter().map(|fp| (fp.id, &fp.channels)).collect();
        put_analog(&mut w, &plates);
    }
    if version.has_devices() {
        let devices: Vec<_> = frame.devices.iter().map(|d| (d.id, &d.channels)).collect();
        put_analog(&mut w, &devices);
    }

    let suffix = &frame.suffix;
    w.put_u32(suffix.timecode).put_u32(suffix.timecode_sub);
    if version.has_double_timestamp() {
        w.put_f64(suffix.timestamp);
    } else {
        w.put_f32(suffix.timestamp as f32);
    }
    if version.has_precision_timestamps() {
        let stamps = suffix.precision_timestamps.unwrap_or_default();
        w.put_u64(stamps.camera_mid_exposure).put_u64(stamps.data_received).put_u64(stamps.transmit);
    }
    w.put_u16(suffix.params.value());
    w.into_inner()
}

fn put_positions(w: &mut ByteWriter, positions: &[Vec3]) {
    w.put_count(positions.len());
    for position in positions {
        w.put_floats(position);
    }
}

fn put_rigid_bodies(w: &mut ByteWriter, bodies: &[RigidBodyFrame], version: Version) {
    w.put_count(bodies.len());
    for body in bodies {
        w.put_i32(body.id).put_floats(&body.position).put_floats(&body.orientation);
        if version.has_rigid_body_markers() {
            w.put_count(body.markers.len());
            for marker in &body.markers {
                w.put_floats(&marker.position);
            }
            if version.has_rigid_body_marker_details() {
                for marker in &body.markers {
                    w.put_i32(marker.id.unwrap_or_default());
                }
                for marker in &body.markers {
                    w.put_f32(marker.size.unwrap_or_default());
                }
            }
        }
        if version.has_mean_error() {
            w.put_f32(body.mean_error);
        }
        if version.has_tracking_flags() {
            w.put_u16(u16::from(body.tracking_valid));
        }
    }
}

fn put_analog(w: &mut ByteWriter, entities: &[(i32, &Vec<AnalogChannel>)]) {
    w.put_count(entities.len());
    for (id, channels) in entities {
        w.put_i32(*id).put_count(channels.len());
        for channel in channels.iter() {
            w.put_count(channel.samples.len()).put_floats(&channel.samples);
        }
    }
}

/// A frame exercising every section `version` carries.
///
/// Values are chosen so the decoder reproduces the frame exactly.
pub fn sample_frame(version: Version) -> Frame {
    let body = |id: i32, x: f32| RigidBodyFrame {
        id,
        position: [x, x + 1.0, x + 2.0],
        orientation: [0.0, 0.0, 0.0, 1.0],
        markers: if version.has_rigid_body_markers() {
            let details = version.has_rigid_body_marker_details();
            vec![RigidBodyMarker {
                position: [x, 0.5, 0.25],
                id: details.then_some(id * 10),
                size: details.then_some(0.0125),
            }]
        } else {
            Vec::new()
        },
        mean_error: if version.has_mean_error() { 0.0005 } else { 0.0 },
        tracking_valid: version.has_tracking_flags(),
    };

    let mut frame = Frame {
        prefix: FramePrefix { frame_number: 4242 },
        marker_sets: MarkerSetFrame {
            marker_sets: vec![
                MarkerGroup { name: "Wand".into(), positions: vec![[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]] },
                MarkerGroup { name: "all".into(), positions: vec![[1.0, 1.5, 2.0]] },
            ],
            unlabeled_markers: vec![[9.0, 8.0, 7.0]],
        },
        rigid_bodies: vec![body(1, 1.0), body(2, 4.0)],
        suffix: FrameSuffix {
            timecode: 0x0102_0304,
            timecode_sub: 5,
            timestamp: 33.25,
            precision_timestamps: version.has_precision_timestamps().then_some(PrecisionTimestamps {
                camera_mid_exposure: 1_000_000,
                data_received: 1_000_500,
                transmit: 1_000_900,
            }),
            params: FlagWord(0b01),
        },
        ..Default::default()
    };

    if version.has_skeletons() {
        frame.skeletons =
            vec![SkeletonFrame { id: 1, rigid_bodies: vec![body(65537, 10.0), body(65538, 11.0)] }];
    }
    if version.has_labeled_markers() {
        frame.labeled_markers = vec![LabeledMarker {
            id: (1 << 16) | 3,
            position: [0.7, 0.8, 0.9],
            size: 0.015,
            params: if version.has_tracking_flags() { FlagWord(0b110) } else { FlagWord(0) },
            residual: if version.has_marker_residual() { 0.0002 } else { 0.0 },
        }];
    }
    if version.has_force_plates() {
        frame.force_plates = vec![ForcePlateFrame {
            id: 1,
            channels: vec![
                AnalogChannel { samples: vec![1.0, 2.0, 3.0] },
                AnalogChannel { samples: vec![-1.0] },
            ],
        }];
    }
    if version.has_devices() {
        frame.devices =
            vec![DeviceFrame { id: 7, channels: vec![AnalogChannel { samples: vec![0.5, 0.75] }] }];
    }
    frame
}

/// Builder for `FrameOfData` payloads.
#[derive(Debug, Clone)]
pub struct FrameFixture {
    version: Version,
    frame: Frame,
}

impl FrameFixture {
    /// Empty frame for `version`.
    pub fn new(version: Version) -> Self {
        Self { version, frame: Frame::default() }
    }

    pub fn frame_number(mut self, frame_number: i32) -> Self {
        self.frame.prefix.frame_number = frame_number;
        self
    }

    pub fn rigid_body(mut self, id: i32, position: Vec3, orientation: Quat, valid: bool) -> Self {
        self.frame.rigid_bodies.push(RigidBodyFrame {
            id,
            position,
            orientation,
            markers: Vec::new(),
            mean_error: 0.0,
            tracking_valid: valid,
        });
        self
    }

    pub fn timestamp(mut self, timestamp: f64) -> Self {
        self.frame.suffix.timestamp = timestamp;
        self
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Payload without header.
    pub fn build(&self) -> Vec<u8> {
        encode_frame(&self.frame, self.version)
    }

    /// Full datagram with header.
    pub fn build_packet(&self) -> Vec<u8> {
        packet(MessageId::FrameOfData, &self.build())
    }
}

/// Builder for `ModelDef` payloads.
#[derive(Debug, Clone)]
pub struct DescriptionFixture {
    version: Version,
    entries: ByteWriter,
    count: usize,
    declared_count: Option<usize>,
}

impl DescriptionFixture {
    pub fn new(version: Version) -> Self {
        Self { version, entries: ByteWriter::new(), count: 0, declared_count: None }
    }

    /// Encode every entry of `set`.
    pub fn from_set(set: &DescriptionSet, version: Version) -> Self {
        set.iter().fold(Self::new(version), |fixture, description| match description {
            Description::MarkerSet(ms) => {
                let names: Vec<&str> = ms.marker_names.iter().map(String::as_str).collect();
                fixture.marker_set(&ms.name, &names)
            }
            Description::RigidBody(rb) => fixture.rigid_body(rb),
            Description::Skeleton(sk) => fixture.skeleton(sk),
            Description::ForcePlate(fp) => fixture.force_plate(fp),
            Description::Device(dev) => fixture.device(dev),
            Description::Camera(cam) => fixture.camera(&cam.name, cam.position, cam.orientation),
        })
    }

    /// Override the entry count written at the start of the payload.
    pub fn with_declared_count(mut self, count: usize) -> Self {
        self.declared_count = Some(count);
        self
    }

    pub fn marker_set(mut self, name: &str, marker_names: &[&str]) -> Self {
        self.entries.put_u32(0).put_cstr(name).put_count(marker_names.len());
        for marker in marker_names {
            self.entries.put_cstr(marker);
        }
        self.count += 1;
        self
    }

    pub fn rigid_body(mut self, rb: &RigidBodyDescription) -> Self {
        self.entries.put_u32(1);
        put_rigid_body_description(&mut self.entries, rb, self.version);
        self.count += 1;
        self
    }

    pub fn skeleton(mut self, sk: &SkeletonDescription) -> Self {
        self.entries.put_u32(2).put_cstr(&sk.name).put_i32(sk.id).put_count(sk.rigid_bodies.len());
        for rb in &sk.rigid_bodies {
            put_rigid_body_description(&mut self.entries, rb, self.version);
        }
        self.count += 1;
        self
    }

    pub fn force_plate(mut self, fp: &ForcePlateDescription) -> Self {
        let w = &mut self.entries;
        w.put_u32(3)
            .put_i32(fp.id)
            .put_cstr(&fp.serial_number)
            .put_f32(fp.width)
            .put_f32(fp.length)
            .put_floats(&fp.origin);
        for row in &fp.calibration_matrix {
            w.put_floats(row);
        }
        for corner in &fp.corners {
            w.put_floats(corner);
        }
        w.put_i32(fp.plate_type).put_i32(fp.channel_data_type).put_count(fp.channel_names.len());
        for name in &fp.channel_names {
            w.put_cstr(name);
        }
        self.count += 1;
        self
    }

    pub fn device(mut self, dev: &DeviceDescription) -> Self {
        let w = &mut self.entries;
        w.put_u32(4)
            .put_i32(dev.id)
            .put_cstr(&dev.name)
            .put_cstr(&dev.serial_number)
            .put_i32(dev.device_type)
            .put_i32(dev.channel_data_type)
            .put_count(dev.channel_names.len());
        for name in &dev.channel_names {
            w.put_cstr(name);
        }
        self.count += 1;
        self
    }

    pub fn camera(mut self, name: &str, position: Vec3, orientation: Quat) -> Self {
        self.entries.put_u32(5).put_cstr(name).put_floats(&position).put_floats(&orientation);
        self.count += 1;
        self
    }

    /// Payload without header.
    pub fn build(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.entries.len() + 4);
        w.put_count(self.declared_count.unwrap_or(self.count)).put_bytes(self.entries.as_slice());
        w.into_inner()
    }

    /// Full datagram with header.
    pub fn build_packet(&self) -> Vec<u8> {
        packet(MessageId::ModelDef, &self.build())
    }
}

fn put_rigid_body_description(w: &mut ByteWriter, rb: &RigidBodyDescription, version: Version) {
    if version.describes_rigid_body_names() {
        w.put_cstr(&rb.name);
    }
    w.put_i32(rb.id).put_i32(rb.parent_id).put_floats(&rb.offset);
    if version.describes_rigid_body_markers() {
        w.put_count(rb.markers.len());
        for marker in &rb.markers {
            w.put_floats(&marker.offset);
        }
        for marker in &rb.markers {
            w.put_i32(marker.active_label);
        }
        if version.describes_rigid_body_marker_names() {
            for marker in &rb.markers {
                w.put_cstr(&marker.name);
            }
        }
    }
}

/// A description set covering every kind `version` can describe.
pub fn sample_descriptions(version: Version) -> DescriptionSet {
    let rigid_body = |name: &str, id: i32, parent_id: i32| RigidBodyDescription {
        name: if version.describes_rigid_body_names() { name.to_string() } else { String::new() },
        id,
        parent_id,
        offset: [0.0, 0.1, 0.2],
        markers: if version.describes_rigid_body_markers() {
            (1..=3)
                .map(|label| RigidBodyMarkerDescription {
                    offset: [label as f32 * 0.01, 0.0, -0.02],
                    active_label: label,
                    name: if version.describes_rigid_body_marker_names() {
                        format!("{}_{}", name, label)
                    } else {
                        String::new()
                    },
                })
                .collect()
        } else {
            Vec::new()
        },
    };

    let mut set = DescriptionSet::new();
    set.push(Description::MarkerSet(MarkerSetDescription {
        name: "Wand".into(),
        marker_names: vec!["Wand_1".into(), "Wand_2".into(), "Wand_3".into()],
    }));
    set.push(Description::RigidBody(rigid_body("Wand", 1, -1)));
    set.push(Description::Skeleton(SkeletonDescription {
        name: "Actor".into(),
        id: 1,
        rigid_bodies: vec![rigid_body("Hip", 65537, -1), rigid_body("Spine", 65538, 65537)],
    }));

    if version.describes_instruments() {
        let mut calibration_matrix = [[0f32; 12]; 12];
        for (i, row) in calibration_matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        set.push(Description::ForcePlate(ForcePlateDescription {
            id: 1,
            serial_number: "FP-0001".into(),
            width: 0.6,
            length: 0.4,
            origin: [0.0, 0.0, -0.04],
            calibration_matrix,
            corners: [[0.3, 0.0, 0.2], [-0.3, 0.0, 0.2], [-0.3, 0.0, -0.2], [0.3, 0.0, -0.2]],
            plate_type: 2,
            channel_data_type: 0,
            channel_names: vec!["Fx".into(), "Fy".into(), "Fz".into()],
        }));
        set.push(Description::Device(DeviceDescription {
            id: 7,
            name: "NI-DAQ".into(),
            serial_number: "DAQ-42".into(),
            device_type: 1,
            channel_data_type: 0,
            channel_names: vec!["ai0".into(), "ai1".into()],
        }));
    }

    set.push(Description::Camera(CameraDescription {
        name: "Cam 01".into(),
        position: [1.0, 2.5, -3.0],
        orientation: [0.0, 0.7071, 0.0, 0.7071],
    }));
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_carry_declared_length() {
        let bytes = packet(MessageId::MessageString, b"hi\0");
        assert_eq!(bytes, vec![8, 0, 3, 0, b'h', b'i', 0]);
    }

    #[test]
    fn sample_frames_respect_version_gates() {
        let old = sample_frame(Version::bitstream(2, 0));
        assert!(old.skeletons.is_empty());
        assert!(old.labeled_markers.is_empty());
        assert!(!old.rigid_bodies[0].markers.is_empty());

        let new = sample_frame(Version::bitstream(4, 0));
        assert!(!new.skeletons.is_empty());
        assert!(!new.devices.is_empty());
        assert!(new.rigid_bodies[0].markers.is_empty());
    }
}
