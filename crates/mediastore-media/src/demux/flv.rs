//! FLV demuxer.
//!
//! ```text
//! Header:  "FLV" | version(1) | flags(1) | data offset(4) | PreviousTagSize0(4)
//! Tag:     type(1) | size(3) | timestamp(3) | timestamp ext(1) | stream id(3) | data | PreviousTagSize(4)
//! ```
//!
//! Streams are discovered by reading ahead until every stream announced in the
//! header flags has shown up (with its sequence header, for AVC/HEVC/AAC).
//! Packets read during discovery are queued and returned first.
//!
//! A tag that is only partially present is not consumed: the input is rewound
//! to the start of the tag and `read` reports that nothing is available yet, so
//! a file that is still growing can be followed.

use bytes::Bytes;
use mediastore_common::{Codec, Packet, StreamDescriptor, StreamKind};
use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};

use super::Demuxer;
use crate::amf0::{self, AmfValue};
use crate::error::{Error, Result};
use crate::io::{AbortHandle, InputStream};

pub(crate) const FLV_SIGNATURE: &[u8; 3] = b"FLV";
const FLV_HEADER_SIZE: usize = 9;
const TAG_HEADER_SIZE: usize = 11;
const PREVIOUS_TAG_SIZE: usize = 4;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

const CODEC_ID_AVC: u8 = 7;
const CODEC_ID_HEVC: u8 = 12;

const SOUND_FORMAT_PCM_PLATFORM: u8 = 0;
const SOUND_FORMAT_MP3: u8 = 2;
const SOUND_FORMAT_PCM_LE: u8 = 3;
const SOUND_FORMAT_AAC: u8 = 10;
const SOUND_FORMAT_MP3_8K: u8 = 14;

const VIDEO_STREAM_ID: u32 = 0;
const AUDIO_STREAM_ID: u32 = 1;

/// Tags read ahead while discovering streams.
const PROBE_TAG_LIMIT: usize = 64;

const FLV_SAMPLE_RATES: [u32; 4] = [5512, 11025, 22050, 44100];

const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

struct Tag {
    tag_type: u8,
    /// Milliseconds.
    timestamp: i64,
    data: Bytes,
}

/// Values from the `onMetaData` script tag.
#[derive(Debug, Default, Clone)]
struct FlvMetadata {
    duration: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    framerate: Option<f64>,
    video_data_rate: Option<f64>,
    audio_data_rate: Option<f64>,
}

impl FlvMetadata {
    fn from_amf(value: &AmfValue) -> Self {
        Self {
            duration: value.get_number("duration").filter(|d| *d > 0.0),
            width: value.get_number("width"),
            height: value.get_number("height"),
            framerate: value.get_number("framerate"),
            video_data_rate: value.get_number("videodatarate"),
            audio_data_rate: value.get_number("audiodatarate"),
        }
    }

    fn apply(&self, stream: &mut StreamDescriptor) {
        match stream.kind {
            StreamKind::Video => {
                if let (Some(w), Some(h)) = (self.width, self.height) {
                    stream.width = w as u32;
                    stream.height = h as u32;
                }
                if let Some(fps) = self.framerate.filter(|f| *f > 0.0) {
                    stream.fps_rate = (fps * 1000.0).round() as u32;
                    stream.fps_scale = 1000;
                }
                if let Some(kbps) = self.video_data_rate {
                    stream.bit_rate = (kbps * 1000.0) as u32;
                }
            }
            StreamKind::Audio => {
                if let Some(kbps) = self.audio_data_rate {
                    stream.bit_rate = (kbps * 1000.0) as u32;
                }
            }
            _ => {}
        }
    }
}

/// Demuxer for FLV files.
pub struct FlvDemuxer {
    input: Box<dyn InputStream>,
    abort: AbortHandle,
    expect_audio: bool,
    expect_video: bool,
    streams: Vec<StreamDescriptor>,
    metadata: FlvMetadata,
    pending: VecDeque<Packet>,
    /// Offset of the next unread tag.
    position: u64,
}

impl FlvDemuxer {
    /// Parse the FLV header and discover streams.
    pub fn open(mut input: Box<dyn InputStream>) -> Result<Self> {
        let abort = input.abort_handle();

        input.seek(SeekFrom::Start(0)).map_err(|e| map_io(&abort, e))?;
        let mut header = [0u8; FLV_HEADER_SIZE];
        if !read_full(&mut *input, &abort, &mut header)? {
            return Err(Error::invalid_data("truncated FLV header"));
        }
        if &header[..3] != FLV_SIGNATURE {
            return Err(Error::invalid_data("missing FLV signature"));
        }

        let flags = header[4];
        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);

        let mut demuxer = Self {
            input,
            abort,
            expect_audio: flags & FLAG_AUDIO != 0,
            expect_video: flags & FLAG_VIDEO != 0,
            streams: Vec::new(),
            metadata: FlvMetadata::default(),
            pending: VecDeque::new(),
            position: u64::from(data_offset) + PREVIOUS_TAG_SIZE as u64,
        };
        demuxer.probe()?;

        tracing::debug!(
            path = %demuxer.input.path().display(),
            streams = demuxer.streams.len(),
            queued = demuxer.pending.len(),
            "Opened FLV demuxer"
        );
        Ok(demuxer)
    }

    fn probe(&mut self) -> Result<()> {
        for _ in 0..PROBE_TAG_LIMIT {
            if self.streams_ready() {
                break;
            }
            let Some(tag) = self.read_tag()? else {
                break;
            };
            if let Some(packet) = self.handle_tag(tag)? {
                self.pending.push_back(packet);
            }
        }
        Ok(())
    }

    fn streams_ready(&self) -> bool {
        let ready = |kind: StreamKind| {
            self.streams.iter().any(|s| {
                s.kind == kind
                    && (!matches!(s.codec, Codec::H264 | Codec::Hevc | Codec::Aac)
                        || !s.codec_private.is_empty())
            })
        };
        if !self.expect_audio && !self.expect_video {
            return false;
        }
        (!self.expect_video || ready(StreamKind::Video))
            && (!self.expect_audio || ready(StreamKind::Audio))
    }

    /// Read the next complete tag, or `None` if it is not fully written yet.
    fn read_tag(&mut self) -> Result<Option<Tag>> {
        self.abort.check()?;
        self.input
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| map_io(&self.abort, e))?;

        let mut header = [0u8; TAG_HEADER_SIZE];
        if !read_full(&mut *self.input, &self.abort, &mut header)? {
            return Ok(None);
        }

        let tag_type = header[0] & 0x1F;
        let data_size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        if header[0] & 0x20 != 0 {
            // Step over it so the next read moves on
            self.position += (TAG_HEADER_SIZE + data_size + PREVIOUS_TAG_SIZE) as u64;
            return Err(Error::unsupported("encrypted FLV tags"));
        }
        let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]) as i32;

        let mut body = vec![0u8; data_size + PREVIOUS_TAG_SIZE];
        if !read_full(&mut *self.input, &self.abort, &mut body)? {
            return Ok(None);
        }
        body.truncate(data_size);

        self.position += (TAG_HEADER_SIZE + data_size + PREVIOUS_TAG_SIZE) as u64;

        Ok(Some(Tag {
            tag_type,
            timestamp: i64::from(timestamp),
            data: Bytes::from(body),
        }))
    }

    fn handle_tag(&mut self, tag: Tag) -> Result<Option<Packet>> {
        match tag.tag_type {
            TAG_SCRIPT => {
                self.handle_script(tag.data);
                Ok(None)
            }
            TAG_VIDEO => Ok(self.handle_video(tag)),
            TAG_AUDIO => Ok(self.handle_audio(tag)),
            other => {
                tracing::trace!(tag_type = other, "Skipping unknown FLV tag");
                Ok(None)
            }
        }
    }

    fn handle_script(&mut self, mut data: Bytes) {
        let name = match amf0::decode(&mut data) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring undecodable script tag");
                return;
            }
        };
        if name.as_str() != Some("onMetaData") {
            return;
        }
        match amf0::decode(&mut data) {
            Ok(value) => {
                self.metadata = FlvMetadata::from_amf(&value);
                let metadata = self.metadata.clone();
                for stream in &mut self.streams {
                    metadata.apply(stream);
                }
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring malformed onMetaData"),
        }
    }

    fn ensure_stream(&mut self, id: u32, codec: Codec) -> &mut StreamDescriptor {
        let index = match self.streams.iter().position(|s| s.id == id) {
            Some(index) => index,
            None => {
                let index = self.streams.len();
                let mut stream = StreamDescriptor::new(index, id, codec);
                self.metadata.apply(&mut stream);
                tracing::debug!(id, codec = %codec, "Discovered FLV stream");
                self.streams.push(stream);
                index
            }
        };
        &mut self.streams[index]
    }

    fn handle_video(&mut self, tag: Tag) -> Option<Packet> {
        let data = tag.data;
        let first = *data.first()?;
        let frame_type = first >> 4;
        // Video info/command frames carry no picture
        if frame_type == 5 {
            return None;
        }

        let codec = match first & 0x0F {
            CODEC_ID_AVC => Codec::H264,
            CODEC_ID_HEVC => Codec::Hevc,
            _ => Codec::Unknown,
        };
        let dts = tag.timestamp;
        let mut pts = dts;

        let payload = if matches!(codec, Codec::H264 | Codec::Hevc) {
            if data.len() < 5 {
                return None;
            }
            let packet_type = data[1];
            let cts = sign_extend_24(u32::from_be_bytes([0, data[2], data[3], data[4]]));
            let payload = data.slice(5..);
            match packet_type {
                0 => {
                    self.ensure_stream(VIDEO_STREAM_ID, codec).codec_private = payload.to_vec();
                    return None;
                }
                1 => {
                    pts = dts + i64::from(cts);
                    payload
                }
                _ => return None,
            }
        } else {
            data.slice(1..)
        };

        let stream = self.ensure_stream(VIDEO_STREAM_ID, codec);
        let mut packet = Packet::new(stream.id, payload);
        packet.demuxer_id = stream.demuxer_id;
        packet.dts = Some(dts * 1000);
        packet.pts = Some(pts * 1000);
        packet.keyframe = frame_type == 1 || frame_type == 4;
        Some(packet)
    }

    fn handle_audio(&mut self, tag: Tag) -> Option<Packet> {
        let data = tag.data;
        let first = *data.first()?;
        let format = first >> 4;
        let rate_index = ((first >> 2) & 0x03) as usize;
        let sixteen_bit = first & 0x02 != 0;
        let stereo = first & 0x01 != 0;

        let codec = match format {
            SOUND_FORMAT_AAC => Codec::Aac,
            SOUND_FORMAT_MP3 | SOUND_FORMAT_MP3_8K => Codec::Mp3,
            SOUND_FORMAT_PCM_LE | SOUND_FORMAT_PCM_PLATFORM if sixteen_bit => Codec::PcmS16Le,
            _ => Codec::Unknown,
        };

        let stream = self.ensure_stream(AUDIO_STREAM_ID, codec);
        if stream.sample_rate == 0 {
            stream.sample_rate = if format == SOUND_FORMAT_MP3_8K {
                8000
            } else {
                FLV_SAMPLE_RATES[rate_index]
            };
            stream.channels = if stereo { 2 } else { 1 };
            stream.bits_per_sample = if sixteen_bit { 16 } else { 8 };
        }

        let payload = if codec == Codec::Aac {
            if data.len() < 2 {
                return None;
            }
            let payload = data.slice(2..);
            if data[1] == 0 {
                if let Some((rate, channels)) = parse_audio_specific_config(&payload) {
                    stream.sample_rate = rate;
                    stream.channels = channels;
                }
                stream.codec_private = payload.to_vec();
                return None;
            }
            payload
        } else {
            data.slice(1..)
        };

        let mut packet = Packet::new(stream.id, payload);
        packet.demuxer_id = stream.demuxer_id;
        packet.dts = Some(tag.timestamp * 1000);
        packet.pts = packet.dts;
        packet.keyframe = true;
        Some(packet)
    }
}

impl Demuxer for FlvDemuxer {
    fn format(&self) -> &'static str {
        "flv"
    }

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read(&mut self) -> Result<Option<Packet>> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(Some(packet));
        }
        while let Some(tag) = self.read_tag()? {
            if let Some(packet) = self.handle_tag(tag)? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    fn duration(&self) -> Option<i64> {
        self.metadata
            .duration
            .map(|secs| (secs * mediastore_common::TIME_BASE as f64) as i64)
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

fn sign_extend_24(value: u32) -> i32 {
    ((value << 8) as i32) >> 8
}

/// Sample rate and channel count from an AAC AudioSpecificConfig.
fn parse_audio_specific_config(asc: &[u8]) -> Option<(u32, u32)> {
    if asc.len() < 2 {
        return None;
    }
    let freq_index = ((asc[0] & 0x07) << 1) | (asc[1] >> 7);
    let channels = (asc[1] >> 3) & 0x0F;
    let rate = *AAC_SAMPLE_RATES.get(freq_index as usize)?;
    Some((rate, u32::from(channels)))
}

fn map_io(abort: &AbortHandle, err: io::Error) -> Error {
    if abort.is_aborted() || err.kind() == io::ErrorKind::ConnectionAborted {
        Error::Aborted
    } else {
        Error::Io(err)
    }
}

/// Fill `buf` completely. `Ok(false)` if the input ended first.
fn read_full(input: &mut dyn InputStream, abort: &AbortHandle, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io(abort, e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::FileInputStream;
    use bytes::{BufMut, BytesMut};
    use std::io::Write;
    use std::path::Path;

    pub(crate) const AVCC: &[u8] = &[0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x00];
    /// AAC LC, 44.1 kHz, stereo.
    pub(crate) const ASC: &[u8] = &[0x12, 0x10];

    pub(crate) fn flv_header(flags: u8) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_slice(FLV_SIGNATURE);
        buf.put_u8(1);
        buf.put_u8(flags);
        buf.put_u32(FLV_HEADER_SIZE as u32);
        buf.put_u32(0);
        buf.to_vec()
    }

    pub(crate) fn flv_tag(tag_type: u8, timestamp: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(tag_type);
        buf.put_uint(data.len() as u64, 3);
        buf.put_uint(u64::from(timestamp & 0x00FF_FFFF), 3);
        buf.put_u8((timestamp >> 24) as u8);
        buf.put_uint(0, 3);
        buf.put_slice(data);
        buf.put_u32((TAG_HEADER_SIZE + data.len()) as u32);
        buf.to_vec()
    }

    fn video_tag(timestamp: u32, keyframe: bool, packet_type: u8, cts: i32, body: &[u8]) -> Vec<u8> {
        let mut data = vec![if keyframe { 0x17 } else { 0x27 }, packet_type];
        data.extend_from_slice(&(cts as u32).to_be_bytes()[1..]);
        data.extend_from_slice(body);
        flv_tag(TAG_VIDEO, timestamp, &data)
    }

    fn aac_tag(timestamp: u32, packet_type: u8, body: &[u8]) -> Vec<u8> {
        let mut data = vec![0xAF, packet_type];
        data.extend_from_slice(body);
        flv_tag(TAG_AUDIO, timestamp, &data)
    }

    fn metadata_tag() -> Vec<u8> {
        let mut buf = BytesMut::new();
        amf0::encode(&mut buf, &AmfValue::String("onMetaData".into()));
        amf0::encode(
            &mut buf,
            &AmfValue::Object(vec![
                ("duration".into(), AmfValue::Number(10.0)),
                ("width".into(), AmfValue::Number(1280.0)),
                ("height".into(), AmfValue::Number(720.0)),
                ("framerate".into(), AmfValue::Number(25.0)),
            ]),
        );
        flv_tag(TAG_SCRIPT, 0, &buf)
    }

    fn sample_file() -> Vec<u8> {
        let mut file = flv_header(FLAG_AUDIO | FLAG_VIDEO);
        file.extend(metadata_tag());
        file.extend(video_tag(0, true, 0, 0, AVCC));
        file.extend(aac_tag(0, 0, ASC));
        file.extend(video_tag(0, true, 1, 80, &[0, 0, 0, 2, 0x65, 0x88]));
        file.extend(aac_tag(23, 1, &[0x21, 0x10]));
        file.extend(video_tag(40, false, 1, 40, &[0, 0, 0, 2, 0x41, 0x9A]));
        file
    }

    fn open(path: &Path) -> FlvDemuxer {
        let mut input = FileInputStream::new(path);
        input.open().unwrap();
        FlvDemuxer::open(Box::new(input)).unwrap()
    }

    #[test]
    fn test_discovers_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flv");
        std::fs::write(&path, sample_file()).unwrap();

        let demuxer = open(&path);
        assert_eq!(demuxer.format(), "flv");
        assert_eq!(demuxer.duration(), Some(10_000_000));

        let streams = demuxer.streams();
        assert_eq!(streams.len(), 2);

        let video = demuxer.stream(-1, VIDEO_STREAM_ID).unwrap();
        assert_eq!(video.codec, Codec::H264);
        assert_eq!(video.codec_private, AVCC);
        assert_eq!((video.width, video.height), (1280, 720));
        assert_eq!(video.frame_duration(), Some(40_000));

        let audio = demuxer.stream(-1, AUDIO_STREAM_ID).unwrap();
        assert_eq!(audio.codec, Codec::Aac);
        assert_eq!(audio.codec_private, ASC);
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_reads_packets_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flv");
        std::fs::write(&path, sample_file()).unwrap();

        let mut demuxer = open(&path);

        let first = demuxer.read().unwrap().unwrap();
        assert_eq!(first.stream_id, VIDEO_STREAM_ID);
        assert!(first.keyframe);
        assert_eq!(first.dts, Some(0));
        assert_eq!(first.pts, Some(80_000));
        assert_eq!(&first.data[..], &[0, 0, 0, 2, 0x65, 0x88]);

        let second = demuxer.read().unwrap().unwrap();
        assert_eq!(second.stream_id, AUDIO_STREAM_ID);
        assert_eq!(second.dts, Some(23_000));
        assert_eq!(&second.data[..], &[0x21, 0x10]);

        let third = demuxer.read().unwrap().unwrap();
        assert!(!third.keyframe);
        assert_eq!(third.pts, Some(80_000));

        assert!(demuxer.read().unwrap().is_none());
    }

    #[test]
    fn test_follows_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.flv");
        std::fs::write(&path, sample_file()).unwrap();

        let mut demuxer = open(&path);
        while demuxer.read().unwrap().is_some() {}

        // Append half a tag: nothing is available yet
        let tag = video_tag(80, true, 1, 0, &[0, 0, 0, 1, 0x65]);
        let (head, tail) = tag.split_at(8);
        let mut writer = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writer.write_all(head).unwrap();
        writer.flush().unwrap();
        assert!(demuxer.read().unwrap().is_none());

        writer.write_all(tail).unwrap();
        writer.flush().unwrap();
        let packet = demuxer.read().unwrap().unwrap();
        assert_eq!(packet.dts, Some(80_000));
        assert!(packet.keyframe);
    }

    #[test]
    fn test_skips_encrypted_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flv");
        let mut file = sample_file();
        file.extend(flv_tag(TAG_VIDEO | 0x20, 60, &[0x17, 1, 0, 0, 0, 0xEE]));
        file.extend(aac_tag(70, 1, &[0x21, 0x20]));
        std::fs::write(&path, file).unwrap();

        let mut demuxer = open(&path);
        for _ in 0..3 {
            demuxer.read().unwrap().unwrap();
        }
        assert!(matches!(demuxer.read(), Err(Error::Unsupported(_))));

        let next = demuxer.read().unwrap().unwrap();
        assert_eq!(next.stream_id, AUDIO_STREAM_ID);
        assert_eq!(next.dts, Some(70_000));
        assert!(demuxer.read().unwrap().is_none());
    }

    #[test]
    fn test_abort_interrupts_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flv");
        std::fs::write(&path, sample_file()).unwrap();

        let mut demuxer = open(&path);
        while demuxer.read().unwrap().is_some() {}
        demuxer.abort_handle().abort();
        assert!(matches!(demuxer.read(), Err(Error::Aborted)));
    }

    #[test]
    fn test_rejects_non_flv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ts");
        std::fs::write(&path, [0x47u8; 188]).unwrap();

        let mut input = FileInputStream::new(&path);
        input.open().unwrap();
        assert!(matches!(
            crate::demux::open_demuxer(Box::new(input)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_open_demuxer_probes_flv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        std::fs::write(&path, sample_file()).unwrap();

        let mut input = FileInputStream::new(&path);
        input.open().unwrap();
        let demuxer = crate::demux::open_demuxer(Box::new(input)).unwrap();
        assert_eq!(demuxer.format(), "flv");
        assert_eq!(demuxer.streams().len(), 2);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(sign_extend_24(0x00_0050), 80);
        assert_eq!(sign_extend_24(0xFF_FFFF), -1);
        assert_eq!(parse_audio_specific_config(ASC), Some((44100, 2)));
        assert_eq!(parse_audio_specific_config(&[0x11, 0x90]), Some((48000, 2)));
        assert_eq!(parse_audio_specific_config(&[0x12]), None);
    }
}
