//! Core type definitions for streams and packets.
//!
//! Demuxers describe their elementary streams with [`StreamDescriptor`] and
//! emit [`Packet`]s; muxers consume both. Timestamps are in microseconds.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamps and durations are expressed in this many ticks per second.
pub const TIME_BASE: i64 = 1_000_000;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
    /// Subtitle stream.
    Subtitle,
    /// Anything else (data, attachments).
    Data,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// Codec carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Aac,
    Mp3,
    Opus,
    Vorbis,
    Flac,
    Ac3,
    /// Signed 16-bit little-endian PCM.
    PcmS16Le,
    Subrip,
    /// Codec we can pass through but not describe further.
    Unknown,
}

impl Codec {
    /// The stream kind this codec belongs to.
    #[must_use]
    pub fn kind(self) -> StreamKind {
        match self {
            Self::H264 | Self::Hevc | Self::Vp8 | Self::Vp9 | Self::Av1 => StreamKind::Video,
            Self::Aac
            | Self::Mp3
            | Self::Opus
            | Self::Vorbis
            | Self::Flac
            | Self::Ac3
            | Self::PcmS16Le => StreamKind::Audio,
            Self::Subrip => StreamKind::Subtitle,
            Self::Unknown => StreamKind::Data,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Flac => "flac",
            Self::Ac3 => "ac3",
            Self::PcmS16Le => "pcm_s16le",
            Self::Subrip => "subrip",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Description of one elementary stream exposed by a demuxer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Position in the demuxer's stream list.
    pub index: usize,
    /// Stream id, unique within one demuxer.
    pub id: u32,
    /// Id of the (sub-)demuxer owning the stream.
    pub demuxer_id: i32,
    pub kind: StreamKind,
    pub codec: Codec,
    /// Out-of-band codec configuration (avcC, AudioSpecificConfig, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codec_private: Vec<u8>,
    /// ISO 639-2 language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Frame rate numerator.
    #[serde(default)]
    pub fps_rate: u32,
    /// Frame rate denominator.
    #[serde(default)]
    pub fps_scale: u32,
    #[serde(default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u32,
    #[serde(default)]
    pub bits_per_sample: u32,
    /// Bits per second, 0 when unknown.
    #[serde(default)]
    pub bit_rate: u32,
}

impl StreamDescriptor {
    /// Minimal descriptor for `codec`; remaining fields are zero.
    pub fn new(index: usize, id: u32, codec: Codec) -> Self {
        Self {
            index,
            id,
            demuxer_id: -1,
            kind: codec.kind(),
            codec,
            codec_private: Vec::new(),
            language: None,
            width: 0,
            height: 0,
            fps_rate: 0,
            fps_scale: 0,
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
            bit_rate: 0,
        }
    }

    /// Check if this is a video stream.
    pub fn is_video(&self) -> bool {
        self.kind == StreamKind::Video
    }

    /// Check if this is an audio stream.
    pub fn is_audio(&self) -> bool {
        self.kind == StreamKind::Audio
    }

    /// Frame duration in microseconds, if the frame rate is known.
    pub fn frame_duration(&self) -> Option<i64> {
        if self.fps_rate == 0 || self.fps_scale == 0 {
            return None;
        }
        Some(TIME_BASE * i64::from(self.fps_scale) / i64::from(self.fps_rate))
    }
}

/// One demuxed packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_id: u32,
    pub demuxer_id: i32,
    /// Decode timestamp in microseconds.
    pub dts: Option<i64>,
    /// Presentation timestamp in microseconds.
    pub pts: Option<i64>,
    /// Duration in microseconds.
    pub duration: Option<i64>,
    pub keyframe: bool,
    pub data: Bytes,
}

impl Packet {
    /// Packet for `stream_id` with no timing information.
    pub fn new(stream_id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            demuxer_id: -1,
            dts: None,
            pts: None,
            duration: None,
            keyframe: false,
            data: data.into(),
        }
    }

    /// Best timestamp for ordering: dts, falling back to pts.
    pub fn timestamp(&self) -> Option<i64> {
        self.dts.or(self.pts)
    }

    /// Check if the packet carries no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
