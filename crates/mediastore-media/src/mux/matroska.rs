//! Live Matroska muxer.
//!
//! The Segment and every Cluster are written with unknown size, so the output
//! is valid at any prefix and needs no trailer or seeking. Timecodes are in
//! milliseconds (TimecodeScale 1 000 000 ns) relative to the first packet.

use bytes::BufMut;
use mediastore_common::{Codec, Packet, StreamDescriptor, StreamKind};
use std::sync::Arc;

use super::ebml::{self, write_binary, write_float, write_master, write_string, write_uint};
use super::sink::{OutputSink, SinkWriter};
use super::{MuxState, Muxer, MUXING_APP};
use crate::error::{Error, Result};

const TIMECODE_SCALE_NS: u64 = 1_000_000;

/// Start a new cluster at a video keyframe once the current one is this long.
const CLUSTER_KEYFRAME_MS: i64 = 1_000;
/// Start a new cluster regardless of keyframes once the current one is this long.
const CLUSTER_MAX_MS: i64 = 5_000;

const MAX_TRACKS: usize = 126;

const TRACK_TYPE_VIDEO: u64 = 1;
const TRACK_TYPE_AUDIO: u64 = 2;
const TRACK_TYPE_SUBTITLE: u64 = 0x11;

struct Track {
    number: u8,
    demuxer_id: i32,
    stream_id: u32,
    is_video: bool,
}

/// Muxer producing Matroska (`.mkv`) or audio-only Matroska (`.mka`).
pub struct MatroskaMuxer {
    out: SinkWriter,
    audio_only: bool,
    state: MuxState,
    header_flushed: bool,
    tracks: Vec<Track>,
    /// Timestamp (ms) mapped to timecode 0.
    base_ms: Option<i64>,
    /// Timecode (ms) of the open cluster.
    cluster_ms: Option<i64>,
    last_ms: i64,
}

fn codec_id(codec: Codec) -> Option<&'static str> {
    Some(match codec {
        Codec::H264 => "V_MPEG4/ISO/AVC",
        Codec::Hevc => "V_MPEGH/ISO/HEVC",
        Codec::Vp8 => "V_VP8",
        Codec::Vp9 => "V_VP9",
        Codec::Av1 => "V_AV1",
        Codec::Aac => "A_AAC",
        Codec::Mp3 => "A_MPEG/L3",
        Codec::Opus => "A_OPUS",
        Codec::Vorbis => "A_VORBIS",
        Codec::Flac => "A_FLAC",
        Codec::Ac3 => "A_AC3",
        Codec::PcmS16Le => "A_PCM/INT/LIT",
        Codec::Subrip => "S_TEXT/UTF8",
        Codec::Unknown => return None,
    })
}

impl MatroskaMuxer {
    pub fn new(sink: Arc<dyn OutputSink>, block_size: usize) -> Self {
        Self {
            out: SinkWriter::new(sink, block_size),
            audio_only: false,
            state: MuxState::Idle,
            header_flushed: false,
            tracks: Vec::new(),
            base_ms: None,
            cluster_ms: None,
            last_ms: 0,
        }
    }

    /// Muxer that only accepts audio streams.
    pub fn audio_only(sink: Arc<dyn OutputSink>, block_size: usize) -> Self {
        Self {
            audio_only: true,
            ..Self::new(sink, block_size)
        }
    }

    fn accepts(&self, stream: &StreamDescriptor) -> bool {
        if codec_id(stream.codec).is_none() {
            return false;
        }
        match stream.kind {
            StreamKind::Audio => true,
            StreamKind::Video | StreamKind::Subtitle => !self.audio_only,
            StreamKind::Data => false,
        }
    }

    fn write_ebml_header(&mut self) {
        write_master(self.out.buffer(), ebml::EBML, |b| {
            write_uint(b, ebml::EBML_VERSION, 1);
            write_uint(b, ebml::EBML_READ_VERSION, 1);
            write_uint(b, ebml::EBML_MAX_ID_LENGTH, 4);
            write_uint(b, ebml::EBML_MAX_SIZE_LENGTH, 8);
            write_string(b, ebml::DOC_TYPE, "matroska");
            write_uint(b, ebml::DOC_TYPE_VERSION, 4);
            write_uint(b, ebml::DOC_TYPE_READ_VERSION, 2);
        });
    }

    fn write_info(&mut self) {
        write_master(self.out.buffer(), ebml::INFO, |b| {
            write_uint(b, ebml::TIMECODE_SCALE, TIMECODE_SCALE_NS);
            write_string(b, ebml::MUXING_APP, MUXING_APP);
            write_string(b, ebml::WRITING_APP, MUXING_APP);
        });
    }

    fn write_tracks(&mut self, streams: &[&StreamDescriptor]) {
        write_master(self.out.buffer(), ebml::TRACKS, |b| {
            for (i, stream) in streams.iter().enumerate() {
                let number = (i + 1) as u64;
                write_master(b, ebml::TRACK_ENTRY, |t| write_track_entry(t, number, stream));
            }
        });
    }

    fn needs_new_cluster(&self, timecode: i64, video_keyframe: bool) -> bool {
        let Some(cluster) = self.cluster_ms else {
            return true;
        };
        let delta = timecode - cluster;
        (video_keyframe && delta >= CLUSTER_KEYFRAME_MS)
            || delta >= CLUSTER_MAX_MS
            || delta > i64::from(i16::MAX)
            || delta < i64::from(i16::MIN)
    }
}

fn write_track_entry(t: &mut bytes::BytesMut, number: u64, stream: &StreamDescriptor) {
    let track_type = match stream.kind {
        StreamKind::Video => TRACK_TYPE_VIDEO,
        StreamKind::Audio => TRACK_TYPE_AUDIO,
        _ => TRACK_TYPE_SUBTITLE,
    };

    write_uint(t, ebml::TRACK_NUMBER, number);
    write_uint(t, ebml::TRACK_UID, number);
    write_uint(t, ebml::TRACK_TYPE, track_type);
    write_uint(t, ebml::FLAG_LACING, 0);
    write_string(t, ebml::LANGUAGE, stream.language.as_deref().unwrap_or("und"));
    if let Some(id) = codec_id(stream.codec) {
        write_string(t, ebml::CODEC_ID, id);
    }
    if !stream.codec_private.is_empty() {
        write_binary(t, ebml::CODEC_PRIVATE, &stream.codec_private);
    }

    match stream.kind {
        StreamKind::Video => {
            if let Some(frame_us) = stream.frame_duration() {
                write_uint(t, ebml::DEFAULT_DURATION, frame_us as u64 * 1000);
            }
            write_master(t, ebml::VIDEO, |v| {
                write_uint(v, ebml::PIXEL_WIDTH, u64::from(stream.width));
                write_uint(v, ebml::PIXEL_HEIGHT, u64::from(stream.height));
            });
        }
        StreamKind::Audio => {
            write_master(t, ebml::AUDIO, |a| {
                let rate = if stream.sample_rate > 0 {
                    stream.sample_rate
                } else {
                    8000
                };
                write_float(a, ebml::SAMPLING_FREQUENCY, f64::from(rate));
                write_uint(a, ebml::CHANNELS, u64::from(stream.channels.max(1)));
                if stream.bits_per_sample > 0 {
                    write_uint(a, ebml::BIT_DEPTH, u64::from(stream.bits_per_sample));
                }
            });
        }
        _ => {}
    }
}

impl Muxer for MatroskaMuxer {
    fn format(&self) -> &'static str {
        "matroska"
    }

    fn mime_type(&self) -> &'static str {
        if self.audio_only {
            "audio/x-matroska"
        } else {
            "video/x-matroska"
        }
    }

    fn open(&mut self, streams: &[StreamDescriptor]) -> Result<()> {
        if self.state != MuxState::Idle {
            return Err(Error::invalid_data("matroska muxer already opened"));
        }

        let mut accepted: Vec<&StreamDescriptor> = streams
            .iter()
            .filter(|s| {
                let ok = self.accepts(s);
                if !ok {
                    tracing::debug!(stream = s.id, codec = %s.codec, "Skipping stream for matroska");
                }
                ok
            })
            .collect();
        // Track numbers are written as single-byte block headers
        accepted.truncate(MAX_TRACKS);
        if accepted.is_empty() {
            return Err(Error::NoStreams("matroska"));
        }

        self.tracks = accepted
            .iter()
            .enumerate()
            .map(|(i, s)| Track {
                number: (i + 1) as u8,
                demuxer_id: s.demuxer_id,
                stream_id: s.id,
                is_video: s.is_video(),
            })
            .collect();

        self.write_ebml_header();
        ebml::write_unknown_size_header(self.out.buffer(), ebml::SEGMENT);
        self.write_info();
        self.write_tracks(&accepted);

        self.state = MuxState::Open;
        Ok(())
    }

    fn write(&mut self, packet: &Packet, stream: &StreamDescriptor) -> Result<()> {
        if self.state != MuxState::Open {
            return Err(Error::NotOpen);
        }
        let Some(track) = self
            .tracks
            .iter()
            .find(|t| t.stream_id == stream.id && t.demuxer_id == stream.demuxer_id)
        else {
            return Ok(());
        };
        let number = track.number;
        let video_keyframe = track.is_video && packet.keyframe;

        let ts_ms = packet
            .pts
            .or(packet.dts)
            .map(|us| us / 1000)
            .unwrap_or(self.last_ms);
        let base = *self.base_ms.get_or_insert(ts_ms);
        let timecode = (ts_ms - base).max(0);

        let written_before = self.out.written();
        let mark = self.out.buffer().len();
        let previous_cluster = self.cluster_ms;

        if self.needs_new_cluster(timecode, video_keyframe) {
            let buf = self.out.buffer();
            ebml::write_unknown_size_header(buf, ebml::CLUSTER);
            write_uint(buf, ebml::TIMECODE, timecode as u64);
            self.cluster_ms = Some(timecode);
        }
        let relative = (timecode - self.cluster_ms.unwrap_or(timecode)) as i16;

        let buf = self.out.buffer();
        ebml::write_id(buf, ebml::SIMPLE_BLOCK);
        ebml::write_size(buf, 4 + packet.data.len() as u64);
        buf.put_u8(0x80 | number);
        buf.put_i16(relative);
        buf.put_u8(if packet.keyframe { 0x80 } else { 0x00 });
        buf.put_slice(&packet.data);

        if let Err(e) = self.out.flush() {
            if self.out.written() == written_before {
                // Nothing reached the sink: drop just this packet
                self.out.truncate(mark);
                self.cluster_ms = previous_cluster;
            } else {
                // Torn block: restart with a fresh cluster
                self.out.discard();
                self.cluster_ms = None;
            }
            return Err(e);
        }
        self.last_ms = ts_ms;
        self.header_flushed = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state != MuxState::Open {
            return Ok(());
        }
        self.state = MuxState::Closed;
        if !self.header_flushed {
            tracing::debug!("Closing matroska output without packets");
        }
        self.out.flush()
    }
}
