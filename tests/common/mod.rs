//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], a [`MediaStore`] over an in-memory catalog and a
//! temporary cache directory, whose sources are fed packet by packet from the
//! test through [`ChannelSources`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mediastore::config::{Config, StoreConfig};
use mediastore::{MediaStore, SourceFactory};
use mediastore_common::{Codec, Packet, Result, StreamDescriptor};
use mediastore_db::MediaCatalog;
use mediastore_media::{AbortHandle, Demuxer, InputStream};
use tempfile::TempDir;

/// Input with no bytes of its own; the paired demuxer gets packets from a
/// channel.
pub struct ChannelInput {
    path: PathBuf,
    abort: AbortHandle,
}

impl Read for ChannelInput {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Seek for ChannelInput {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

impl InputStream for ChannelInput {
    fn open(&mut self) -> mediastore_media::Result<()> {
        Ok(())
    }

    fn length(&self) -> Option<u64> {
        None
    }

    fn block_size(&self) -> u32 {
        4096
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Demuxer that blocks on its channel until a packet arrives or it is
/// aborted.
pub struct ChannelDemuxer {
    streams: Vec<StreamDescriptor>,
    packets: Receiver<Packet>,
    abort: AbortHandle,
    /// Uninterruptible stall before every read.
    read_delay: Option<Duration>,
}

impl Demuxer for ChannelDemuxer {
    fn format(&self) -> &'static str {
        "channel"
    }

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read(&mut self) -> mediastore_media::Result<Option<Packet>> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        loop {
            self.abort.check()?;
            match self.packets.recv_timeout(Duration::from_millis(5)) {
                Ok(packet) => return Ok(Some(packet)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

/// Source factory handing out channel-fed demuxers, one channel per open.
#[derive(Default)]
pub struct ChannelSources {
    feeds: Mutex<HashMap<String, Sender<Packet>>>,
    pending: Mutex<HashMap<String, Receiver<Packet>>>,
    aborts: Mutex<Vec<AbortHandle>>,
    opens: AtomicUsize,
    read_delay: Option<Duration>,
}

impl ChannelSources {
    /// Sources whose demuxers stall for `delay` on every read, ignoring abort.
    pub fn slow(delay: Duration) -> Self {
        Self {
            read_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Sender feeding the most recent open of `path`.
    pub fn feed(&self, path: &str) -> Sender<Packet> {
        self.feeds
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .expect("source was never opened")
    }

    /// Number of inputs created so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Whether every input handed out so far has been aborted.
    pub fn all_aborted(&self) -> bool {
        self.aborts.lock().unwrap().iter().all(|a| a.is_aborted())
    }
}

impl SourceFactory for ChannelSources {
    fn create_input(&self, path: &str) -> Result<Box<dyn InputStream>> {
        let (tx, rx) = mpsc::channel();
        self.feeds.lock().unwrap().insert(path.to_string(), tx);
        self.pending.lock().unwrap().insert(path.to_string(), rx);
        self.opens.fetch_add(1, Ordering::SeqCst);

        let abort = AbortHandle::new();
        self.aborts.lock().unwrap().push(abort.clone());
        Ok(Box::new(ChannelInput {
            path: PathBuf::from(path),
            abort,
        }))
    }

    fn create_demuxer(&self, input: Box<dyn InputStream>) -> Result<Box<dyn Demuxer>> {
        let path = input.path().to_string_lossy().into_owned();
        let packets = self
            .pending
            .lock()
            .unwrap()
            .remove(&path)
            .expect("demuxer without input");
        Ok(Box::new(ChannelDemuxer {
            streams: vec![pcm_stream()],
            packets,
            abort: input.abort_handle(),
            read_delay: self.read_delay,
        }))
    }
}

/// Stereo 16-bit PCM at 48 kHz, stream id 0.
pub fn pcm_stream() -> StreamDescriptor {
    let mut stream = StreamDescriptor::new(0, 0, Codec::PcmS16Le);
    stream.sample_rate = 48_000;
    stream.channels = 2;
    stream.bits_per_sample = 16;
    stream
}

/// A keyframe packet on stream 0 with `len` bytes of payload.
pub fn pcm_packet(ts_us: i64, len: usize) -> Packet {
    let mut packet = Packet::new(0, vec![0x5Au8; len]);
    packet.dts = Some(ts_us);
    packet.pts = Some(ts_us);
    packet.duration = Some(20_000);
    packet.keyframe = true;
    packet
}

/// Poll `condition` until it holds, failing after five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Media store over an in-memory catalog and channel-fed sources.
pub struct TestHarness {
    pub dir: TempDir,
    pub sources: Arc<ChannelSources>,
    pub store: MediaStore,
}

impl TestHarness {
    /// Create a new harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a new harness, letting `customize` adjust the configuration.
    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        Self::with_sources(ChannelSources::default(), customize)
    }

    /// Create a new harness over `sources`.
    pub fn with_sources(sources: ChannelSources, customize: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = Config {
            store: StoreConfig::in_dir(dir.path()),
            ..Config::default()
        };
        config.pipeline.poll_interval_ms = 5;
        customize(&mut config);

        let sources = Arc::new(sources);
        let store = MediaStore::new(config, MediaCatalog::in_memory(), sources.clone());
        store.initialize().expect("failed to initialize store");

        Self {
            dir,
            sources,
            store,
        }
    }
}
