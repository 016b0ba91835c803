//! EBML element writing.
//!
//! Element IDs are written as-is (they carry their own length marker); sizes
//! are variable-length integers using the shortest encoding.

use bytes::{BufMut, BytesMut};

// EBML header
pub const EBML: u32 = 0x1A45_DFA3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// Segment
pub const SEGMENT: u32 = 0x1853_8067;
pub const INFO: u32 = 0x1549_A966;
pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;

// Tracks
pub const TRACKS: u32 = 0x1654_AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const FLAG_LACING: u32 = 0x9C;
pub const LANGUAGE: u32 = 0x22_B59C;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
pub const DEFAULT_DURATION: u32 = 0x23_E383;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const AUDIO: u32 = 0xE1;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;
pub const BIT_DEPTH: u32 = 0x6264;

// Clusters
pub const CLUSTER: u32 = 0x1F43_B675;
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Reserved "unknown size" value, 8-byte form.
const UNKNOWN_SIZE: u64 = 0x01FF_FFFF_FFFF_FFFF;

/// Write an element ID.
pub fn write_id(buf: &mut BytesMut, id: u32) {
    let len = match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    };
    buf.put_uint(u64::from(id), len);
}

/// Write an element data size as a variable-length integer.
pub fn write_size(buf: &mut BytesMut, size: u64) {
    // All-ones is reserved for "unknown", hence the `- 1`
    let len = (1..=8usize)
        .find(|n| size < (1u64 << (7 * n)) - 1)
        .unwrap_or(8);
    let marker = 1u64 << (7 * len);
    buf.put_uint(size | marker, len);
}

/// Header of a master element whose size is not known up front.
pub fn write_unknown_size_header(buf: &mut BytesMut, id: u32) {
    write_id(buf, id);
    buf.put_u64(UNKNOWN_SIZE);
}

pub fn write_uint(buf: &mut BytesMut, id: u32, value: u64) {
    let len = (1..=8usize)
        .find(|n| *n == 8 || value >> (8 * n) == 0)
        .unwrap_or(8);
    write_id(buf, id);
    write_size(buf, len as u64);
    buf.put_uint(value, len);
}

pub fn write_float(buf: &mut BytesMut, id: u32, value: f64) {
    write_id(buf, id);
    write_size(buf, 8);
    buf.put_f64(value);
}

pub fn write_string(buf: &mut BytesMut, id: u32, value: &str) {
    write_binary(buf, id, value.as_bytes());
}

pub fn write_binary(buf: &mut BytesMut, id: u32, value: &[u8]) {
    write_id(buf, id);
    write_size(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Write a master element whose children are produced by `body`.
pub fn write_master(buf: &mut BytesMut, id: u32, body: impl FnOnce(&mut BytesMut)) {
    let mut children = BytesMut::new();
    body(&mut children);
    write_id(buf, id);
    write_size(buf, children.len() as u64);
    buf.put_slice(&children);
}
