//! FLV muxer.
//!
//! Carries at most one video stream (H.264) and one audio stream (AAC, MP3 or
//! 16-bit little-endian PCM). Timestamps are milliseconds relative to the first
//! packet, split into the 24-bit field plus the extension byte.

use bytes::{BufMut, BytesMut};
use mediastore_common::{Codec, Packet, StreamDescriptor};
use std::sync::Arc;

use super::sink::{OutputSink, SinkWriter};
use super::{MuxState, Muxer, MUXING_APP};
use crate::amf0::{self, AmfValue};
use crate::error::{Error, Result};

const FLV_SIGNATURE: &[u8; 3] = b"FLV";
const FLV_VERSION: u8 = 0x01;
const FLV_HEADER_SIZE: u32 = 9;
const TAG_HEADER_SIZE: usize = 11;
/// Largest body the 24-bit DataSize field can describe.
const MAX_TAG_DATA_SIZE: usize = 0x00FF_FFFF;

const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

const CODEC_ID_AVC: u8 = 7;
const SOUND_FORMAT_MP3: u8 = 2;
const SOUND_FORMAT_PCM_LE: u8 = 3;
const SOUND_FORMAT_AAC: u8 = 10;

/// AVC/AAC packet types.
const SEQUENCE_HEADER: u8 = 0;
const RAW_DATA: u8 = 1;

struct FlvTrack {
    demuxer_id: i32,
    stream_id: u32,
    codec: Codec,
    /// First byte of every audio tag body.
    sound_header: u8,
}

impl FlvTrack {
    fn matches(&self, stream: &StreamDescriptor) -> bool {
        self.stream_id == stream.id && self.demuxer_id == stream.demuxer_id
    }
}

/// Muxer producing FLV.
pub struct FlvMuxer {
    out: SinkWriter,
    state: MuxState,
    video: Option<FlvTrack>,
    audio: Option<FlvTrack>,
    base_ms: Option<i64>,
}

fn sound_rate_index(sample_rate: u32) -> u8 {
    match sample_rate {
        0..=8000 => 0,
        8001..=11025 => 1,
        11026..=22050 => 2,
        _ => 3,
    }
}

fn sound_header(stream: &StreamDescriptor) -> u8 {
    let stereo = u8::from(stream.channels >= 2);
    match stream.codec {
        // AAC is always signalled as 44 kHz, 16-bit, stereo
        Codec::Aac => (SOUND_FORMAT_AAC << 4) | 0x0F,
        Codec::Mp3 => (SOUND_FORMAT_MP3 << 4) | (sound_rate_index(stream.sample_rate) << 2) | 0x02 | stereo,
        _ => {
            (SOUND_FORMAT_PCM_LE << 4) | (sound_rate_index(stream.sample_rate) << 2) | 0x02 | stereo
        }
    }
}

fn write_tag(buf: &mut BytesMut, tag_type: u8, timestamp_ms: i64, body: &[u8]) {
    let timestamp = timestamp_ms.clamp(0, i64::from(u32::MAX)) as u32;
    buf.put_u8(tag_type);
    buf.put_uint(body.len() as u64, 3);
    buf.put_uint(u64::from(timestamp & 0x00FF_FFFF), 3);
    buf.put_u8((timestamp >> 24) as u8);
    buf.put_uint(0, 3);
    buf.put_slice(body);
    buf.put_u32((TAG_HEADER_SIZE + body.len()) as u32);
}

impl FlvMuxer {
    pub fn new(sink: Arc<dyn OutputSink>, block_size: usize) -> Self {
        Self {
            out: SinkWriter::new(sink, block_size),
            state: MuxState::Idle,
            video: None,
            audio: None,
            base_ms: None,
        }
    }

    fn metadata(&self, video: Option<&StreamDescriptor>, audio: Option<&StreamDescriptor>) -> Vec<u8> {
        let mut props = vec![("duration".to_string(), AmfValue::Number(0.0))];
        if let Some(v) = video {
            props.push(("width".into(), AmfValue::Number(f64::from(v.width))));
            props.push(("height".into(), AmfValue::Number(f64::from(v.height))));
            if v.fps_rate > 0 && v.fps_scale > 0 {
                let fps = f64::from(v.fps_rate) / f64::from(v.fps_scale);
                props.push(("framerate".into(), AmfValue::Number(fps)));
            }
            props.push(("videocodecid".into(), AmfValue::Number(f64::from(CODEC_ID_AVC))));
            if v.bit_rate > 0 {
                props.push((
                    "videodatarate".into(),
                    AmfValue::Number(f64::from(v.bit_rate) / 1000.0),
                ));
            }
        }
        if let Some(a) = audio {
            let header = sound_header(a);
            props.push(("audiocodecid".into(), AmfValue::Number(f64::from(header >> 4))));
            props.push(("audiosamplerate".into(), AmfValue::Number(f64::from(a.sample_rate))));
            props.push(("audiosamplesize".into(), AmfValue::Number(16.0)));
            props.push(("stereo".into(), AmfValue::Boolean(a.channels >= 2)));
            if a.bit_rate > 0 {
                props.push((
                    "audiodatarate".into(),
                    AmfValue::Number(f64::from(a.bit_rate) / 1000.0),
                ));
            }
        }
        props.push(("encoder".into(), AmfValue::String(MUXING_APP.into())));

        let mut body = BytesMut::new();
        amf0::encode(&mut body, &AmfValue::String("onMetaData".into()));
        amf0::encode(&mut body, &AmfValue::Object(props));
        body.to_vec()
    }

    fn relative_ms(&mut self, timestamp_us: i64) -> i64 {
        let ms = timestamp_us / 1000;
        let base = *self.base_ms.get_or_insert(ms);
        (ms - base).max(0)
    }
}

impl Muxer for FlvMuxer {
    fn format(&self) -> &'static str {
        "flv"
    }

    fn mime_type(&self) -> &'static str {
        "video/x-flv"
    }

    fn open(&mut self, streams: &[StreamDescriptor]) -> Result<()> {
        if self.state != MuxState::Idle {
            return Err(Error::invalid_data("flv muxer already opened"));
        }

        let mut video = None;
        let mut audio = None;
        for stream in streams {
            match stream.codec {
                Codec::H264 if video.is_none() => video = Some(stream),
                Codec::Aac | Codec::Mp3 | Codec::PcmS16Le if audio.is_none() => audio = Some(stream),
                _ => tracing::debug!(stream = stream.id, codec = %stream.codec, "Skipping stream for flv"),
            }
        }
        if video.is_none() && audio.is_none() {
            return Err(Error::NoStreams("flv"));
        }

        let mut flags = 0;
        if video.is_some() {
            flags |= FLAG_VIDEO;
        }
        if audio.is_some() {
            flags |= FLAG_AUDIO;
        }

        let metadata = self.metadata(video, audio);
        let buf = self.out.buffer();
        buf.put_slice(FLV_SIGNATURE);
        buf.put_u8(FLV_VERSION);
        buf.put_u8(flags);
        buf.put_u32(FLV_HEADER_SIZE);
        buf.put_u32(0);
        write_tag(buf, TAG_SCRIPT, 0, &metadata);

        if let Some(v) = video.filter(|v| !v.codec_private.is_empty()) {
            let mut body = vec![0x10 | CODEC_ID_AVC, SEQUENCE_HEADER, 0, 0, 0];
            body.extend_from_slice(&v.codec_private);
            write_tag(buf, TAG_VIDEO, 0, &body);
        }
        if let Some(a) = audio.filter(|a| a.codec == Codec::Aac && !a.codec_private.is_empty()) {
            let mut body = vec![sound_header(a), SEQUENCE_HEADER];
            body.extend_from_slice(&a.codec_private);
            write_tag(buf, TAG_AUDIO, 0, &body);
        }

        self.video = video.map(|s| FlvTrack {
            demuxer_id: s.demuxer_id,
            stream_id: s.id,
            codec: s.codec,
            sound_header: 0,
        });
        self.audio = audio.map(|s| FlvTrack {
            demuxer_id: s.demuxer_id,
            stream_id: s.id,
            codec: s.codec,
            sound_header: sound_header(s),
        });

        self.state = MuxState::Open;
        Ok(())
    }

    fn write(&mut self, packet: &Packet, stream: &StreamDescriptor) -> Result<()> {
        if self.state != MuxState::Open {
            return Err(Error::NotOpen);
        }

        let dts = packet.dts.or(packet.pts).unwrap_or(0);
        let pts = packet.pts.unwrap_or(dts);

        let (tag_type, body) = if self.video.as_ref().is_some_and(|t| t.matches(stream)) {
            let cts = ((pts - dts) / 1000).clamp(-0x80_0000, 0x7F_FFFF) as i32;
            let frame_type = if packet.keyframe { 1 } else { 2 };
            let mut body = Vec::with_capacity(5 + packet.data.len());
            body.push((frame_type << 4) | CODEC_ID_AVC);
            body.push(RAW_DATA);
            body.extend_from_slice(&(cts as u32).to_be_bytes()[1..]);
            body.extend_from_slice(&packet.data);
            (TAG_VIDEO, body)
        } else if let Some(track) = self.audio.as_ref().filter(|t| t.matches(stream)) {
            let mut body = Vec::with_capacity(2 + packet.data.len());
            body.push(track.sound_header);
            if track.codec == Codec::Aac {
                body.push(RAW_DATA);
            }
            body.extend_from_slice(&packet.data);
            (TAG_AUDIO, body)
        } else {
            return Ok(());
        };

        if body.len() > MAX_TAG_DATA_SIZE {
            return Err(Error::invalid_data(format!(
                "packet of {} bytes does not fit in an FLV tag",
                packet.data.len()
            )));
        }

        let timestamp = self.relative_ms(dts);
        let written_before = self.out.written();
        let mark = self.out.buffer().len();
        write_tag(self.out.buffer(), tag_type, timestamp, &body);

        if let Err(e) = self.out.flush() {
            if self.out.written() == written_before {
                self.out.truncate(mark);
            } else {
                self.out.discard();
            }
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state != MuxState::Open {
            return Ok(());
        }
        self.state = MuxState::Closed;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::super::sink::tests::MemorySink;
    use super::*;
    use crate::demux::{Demuxer, FlvDemuxer};
    use crate::io::{FileInputStream, InputStream};

    fn streams() -> Vec<StreamDescriptor> {
        let mut video = StreamDescriptor::new(0, 0, Codec::H264);
        video.codec_private = vec![0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x00];
        video.width = 640;
        video.height = 360;
        video.fps_rate = 30;
        video.fps_scale = 1;

        let mut audio = StreamDescriptor::new(1, 1, Codec::Aac);
        audio.codec_private = vec![0x12, 0x10];
        audio.sample_rate = 44100;
        audio.channels = 2;

        let subtitle = StreamDescriptor::new(2, 2, Codec::Subrip);
        vec![video, audio, subtitle]
    }

    fn packet(stream_id: u32, dts_ms: i64, pts_ms: i64, keyframe: bool, data: &[u8]) -> Packet {
        let mut pkt = Packet::new(stream_id, data.to_vec());
        pkt.dts = Some(dts_ms * 1000);
        pkt.pts = Some(pts_ms * 1000);
        pkt.keyframe = keyframe;
        pkt
    }

    #[test]
    fn test_output_demuxes_back() {
        let sink = Arc::new(MemorySink::new("/c/out.flv"));
        let mut muxer = FlvMuxer::new(sink.clone(), 4096);
        let streams = streams();
        muxer.open(&streams).unwrap();
        assert!(sink.bytes().is_empty());

        muxer
            .write(&packet(0, 1000, 1080, true, &[0, 0, 0, 1, 0x65]), &streams[0])
            .unwrap();
        muxer.write(&packet(1, 1010, 1010, true, &[0x21, 0x00]), &streams[1]).unwrap();
        muxer.write(&packet(2, 1020, 1020, true, b"hello"), &streams[2]).unwrap();
        muxer
            .write(&packet(0, 1033, 1033, false, &[0, 0, 0, 1, 0x41]), &streams[0])
            .unwrap();
        muxer.close().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.flv");
        std::fs::write(&path, sink.bytes()).unwrap();

        let mut input = FileInputStream::new(&path);
        input.open().unwrap();
        let mut demuxer = FlvDemuxer::open(Box::new(input)).unwrap();

        let found = demuxer.streams();
        assert_eq!(found.len(), 2);
        let video = found.iter().find(|s| s.codec == Codec::H264).unwrap();
        assert_eq!(video.codec_private, streams[0].codec_private);
        assert_eq!((video.width, video.height), (640, 360));
        let audio = found.iter().find(|s| s.codec == Codec::Aac).unwrap();
        assert_eq!(audio.codec_private, streams[1].codec_private);
        assert_eq!(audio.sample_rate, 44100);

        let first = demuxer.read().unwrap().unwrap();
        assert!(first.keyframe);
        assert_eq!(first.dts, Some(0));
        assert_eq!(first.pts, Some(80_000));
        assert_eq!(&first.data[..], &[0, 0, 0, 1, 0x65]);

        let second = demuxer.read().unwrap().unwrap();
        assert_eq!(second.dts, Some(10_000));
        assert_eq!(&second.data[..], &[0x21, 0x00]);

        let third = demuxer.read().unwrap().unwrap();
        assert!(!third.keyframe);
        assert_eq!(third.dts, Some(33_000));

        assert!(demuxer.read().unwrap().is_none());
    }

    #[test]
    fn test_rejects_oversized_tag() {
        let sink = Arc::new(MemorySink::new("/c/out.flv"));
        let mut muxer = FlvMuxer::new(sink.clone(), 4096);
        let streams = streams();
        muxer.open(&streams).unwrap();

        let huge = packet(1, 0, 0, true, &vec![0u8; MAX_TAG_DATA_SIZE]);
        assert!(matches!(
            muxer.write(&huge, &streams[1]),
            Err(Error::InvalidData(_))
        ));
        assert!(sink.bytes().is_empty());

        // The muxer stays usable
        muxer.write(&packet(1, 10, 10, true, &[0x21, 0x00]), &streams[1]).unwrap();
        muxer.close().unwrap();
        assert_eq!(&sink.bytes()[..3], b"FLV");
        assert!(sink.bytes().len() < 1024);
    }

    #[test]
    fn test_header_flags() {
        let sink = Arc::new(MemorySink::new("/c/out.flv"));
        let mut muxer = FlvMuxer::new(sink.clone(), 4096);
        let audio_only = vec![streams().remove(1)];
        muxer.open(&audio_only).unwrap();
        muxer.close().unwrap();

        let out = sink.bytes();
        assert_eq!(&out[..3], b"FLV");
        assert_eq!(out[4], FLAG_AUDIO);
    }

    #[test]
    fn test_no_usable_streams() {
        let sink = Arc::new(MemorySink::new("/c/out.flv"));
        let mut muxer = FlvMuxer::new(sink, 4096);
        let only_subs = vec![StreamDescriptor::new(0, 0, Codec::Subrip)];
        assert!(matches!(muxer.open(&only_subs), Err(Error::NoStreams("flv"))));
    }

    #[test]
    fn test_extended_timestamp() {
        let mut buf = BytesMut::new();
        write_tag(&mut buf, TAG_VIDEO, 0x0123_4567, &[]);
        assert_eq!(&buf[4..8], &[0x23, 0x45, 0x67, 0x01]);
    }

    #[test]
    fn test_sound_header() {
        let mut mp3 = StreamDescriptor::new(0, 0, Codec::Mp3);
        mp3.sample_rate = 22050;
        mp3.channels = 1;
        assert_eq!(sound_header(&mp3), 0x2A);

        let aac = StreamDescriptor::new(0, 0, Codec::Aac);
        assert_eq!(sound_header(&aac), 0xAF);
    }
}
