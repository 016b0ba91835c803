//! Media store integration tests: pinning, live reads and stream lifecycle.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use common::{pcm_packet, pcm_stream, wait_until, ChannelSources, TestHarness};
use mediastore::cache::DiskCache;
use mediastore::config::{CacheConfig, Config, PipelineConfig, StoreConfig};
use mediastore::pipeline::Pipeline;
use mediastore::{FileHandle, IoControl, IoControlResponse, MediaFile, MediaStore, StreamState};
use mediastore_common::{Error, MediaId, Packet, StreamDescriptor};
use mediastore_media::{AbortHandle, Demuxer, Muxer};

#[test]
fn test_pin_read_unpin_lifecycle() {
    let h = TestHarness::new();

    let id = h.store.pin_media("/media/show.ts").unwrap();
    assert_eq!(id, MediaId::new(1));
    assert_eq!(h.store.pin_media("/media/show.ts").unwrap(), id);
    assert!(h.store.is_pinned(id));

    let stream = h.store.open(id).expect("stream should open");
    assert_eq!(stream.state(), StreamState::Open);

    let mut buf = [0u8; 100];
    assert_matches!(
        stream.read(0, &mut buf),
        Err(Error::NotYetAvailable { position: 0, .. })
    );

    let feed = h.sources.feed("/media/show.ts");
    for i in 0..20 {
        feed.send(pcm_packet(i * 20_000, 256)).unwrap();
    }
    wait_until(|| stream.length() >= 4096);

    assert_eq!(stream.read(0, &mut buf).unwrap(), 100);
    // Matroska EBML magic
    assert_eq!(&buf[..4], &[0x1A, 0x45, 0xDF, 0xA3]);

    let container = stream.container().unwrap();
    assert_eq!(container.mime_type, "video/x-matroska");
    wait_until(|| stream.container().unwrap().max_timestamp == Some(19 * 20_000));

    assert!(h.store.unpin_media(id).unwrap());
    assert!(!h.store.is_pinned(id));
    assert!(!h.store.is_path_pinned("/media/show.ts"));
    assert_eq!(stream.state(), StreamState::Closed);
    assert!(h.store.open(id).is_none());

    // Pinning again hands out a new id and a fresh stream
    let again = h.store.pin_media("/media/show.ts").unwrap();
    assert_eq!(again, MediaId::new(2));
    let fresh = h.store.open(again).unwrap();
    assert!(!Arc::ptr_eq(&stream, &fresh));
    assert_eq!(fresh.state(), StreamState::Open);
    assert_matches!(fresh.read(0, &mut buf), Err(Error::NotYetAvailable { .. }));
}

#[test]
fn test_open_returns_shared_stream() {
    let h = TestHarness::new();
    let id = h.store.pin_media("/media/a.ts").unwrap();

    let first = h.store.open(id).unwrap();
    let second = h.store.open(id).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.sources.opens(), 1);
}

#[test]
fn test_concurrent_opens_start_one_pipeline() {
    let h = Arc::new(TestHarness::with_config(|c| c.store.open_on_pin = false));
    let id = h.store.pin_media("/media/race.ts").unwrap();
    assert_eq!(h.sources.opens(), 0);

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                h.store.open(id).unwrap()
            })
        })
        .collect();

    let streams: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    assert!(streams.iter().all(|s| Arc::ptr_eq(s, &streams[0])));
    assert_eq!(h.sources.opens(), 1);
    assert_eq!(h.store.open_streams(), 1);
}

#[test]
fn test_unpin_aborts_blocked_source() {
    let h = TestHarness::new();
    let id = h.store.pin_media("/media/stalled.ts").unwrap();
    let stream = h.store.stream(id).unwrap();
    assert!(stream.is_converting());

    // The source is blocked waiting for packets that never come
    let started = Instant::now();
    h.store.unpin_media(id).unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(h.sources.all_aborted());
    assert!(!stream.is_converting());
}

#[test]
fn test_deinitialize_closes_streams() {
    let h = TestHarness::new();
    let a = h.store.pin_media("/media/a.ts").unwrap();
    let b = h.store.pin_media("/media/b.ts").unwrap();
    assert_eq!(h.store.open_streams(), 2);

    let stream = h.store.stream(a).unwrap();
    h.store.deinitialize().unwrap();
    assert_eq!(h.store.open_streams(), 0);
    assert_eq!(stream.state(), StreamState::Closed);
    // Catalog entries stay pinned
    assert!(h.store.is_pinned(a) && h.store.is_pinned(b));
}

#[test]
fn test_media_file_reads_through_cursor() {
    let h = TestHarness::with_config(|c| c.store.container = "mka".to_string());
    let id = h.store.pin_media("/media/song.ts").unwrap();
    let url = id.store_path();
    assert!(MediaFile::exists(&h.store, &url));

    let mut file = MediaFile::open(&h.store, &url).unwrap();
    assert_eq!(file.content().as_deref(), Some("audio/x-matroska"));
    assert_eq!(
        file.io_control(IoControl::SeekPossible).unwrap(),
        IoControlResponse::SeekPossible(true)
    );

    let mut buf = [0u8; 64];
    assert_matches!(file.read(&mut buf), Err(e) if e.is_retryable());
    assert_eq!(file.position(), 0);

    let feed = h.sources.feed("/media/song.ts");
    for i in 0..4 {
        feed.send(pcm_packet(i * 20_000, 512)).unwrap();
    }
    wait_until(|| file.length() > 2048);

    assert_eq!(file.read(&mut buf).unwrap(), 64);
    assert_eq!(file.position(), 64);

    assert_eq!(file.seek(std::io::SeekFrom::Current(-32)).unwrap(), 32);
    assert_matches!(
        file.seek(std::io::SeekFrom::Current(-100)),
        Err(Error::InvalidInput(_))
    );
    assert_eq!(file.position(), 32);
    let end = file.seek(std::io::SeekFrom::End(0)).unwrap();
    assert_eq!(end, file.length());

    match file.io_control(IoControl::CacheStatus).unwrap() {
        IoControlResponse::CacheStatus(status) => assert!(status.level >= 0.0),
        other => panic!("unexpected response: {other:?}"),
    }
    assert_eq!(
        file.io_control(IoControl::SetCacheRate(1024)).unwrap(),
        IoControlResponse::RateSet(true)
    );
    file.close();
}

#[test]
fn test_file_handle_maps_not_yet_available() {
    use std::io::Read;

    let h = TestHarness::new();
    let id = h.store.pin_media("/media/show.ts").unwrap();

    let mut handle = FileHandle::open(&h.store, &id.store_path()).unwrap();
    assert!(handle.is_media());
    let mut buf = [0u8; 16];
    let err = handle.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

#[test]
fn test_malformed_store_paths() {
    let h = TestHarness::new();
    for url in ["mediastore://", "mediastore://x1", "mediastore://-3", "/media/show.ts"] {
        assert!(MediaId::from_store_path(url).is_none(), "{url}");
        assert!(!MediaFile::exists(&h.store, url));
    }
}

#[test]
fn test_catalog_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config {
        store: StoreConfig::in_dir(dir.path()),
        ..Config::default()
    };
    config.store.open_on_pin = false;

    {
        let store = MediaStore::open_default(config.clone()).unwrap();
        store.initialize().unwrap();
        assert_eq!(store.pin_media("/media/a.ts").unwrap(), MediaId::new(1));
        assert_eq!(store.pin_media("/media/b.ts").unwrap(), MediaId::new(2));
        store.unpin_media(MediaId::new(2)).unwrap();
        store.deinitialize().unwrap();
    }

    let store = MediaStore::open_default(config).unwrap();
    store.initialize().unwrap();
    assert!(store.is_pinned(MediaId::new(1)));
    assert_eq!(store.media_id("/media/a.ts"), MediaId::new(1));
    assert!(!store.is_pinned(MediaId::new(2)));
    // Unpinned ids are never handed out again
    assert_eq!(store.pin_media("/media/c.ts").unwrap(), MediaId::new(3));
    assert_eq!(store.list().len(), 2);
}

/// Muxer that fails every write of a packet with an empty payload.
struct PickyMuxer {
    written: Arc<AtomicUsize>,
}

impl Muxer for PickyMuxer {
    fn format(&self) -> &'static str {
        "picky"
    }

    fn mime_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn open(&mut self, _streams: &[StreamDescriptor]) -> mediastore_media::Result<()> {
        Ok(())
    }

    fn write(
        &mut self,
        packet: &Packet,
        _stream: &StreamDescriptor,
    ) -> mediastore_media::Result<()> {
        if packet.is_empty() {
            return Err(mediastore_media::Error::InvalidData("empty packet".into()));
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> mediastore_media::Result<()> {
        Ok(())
    }
}

/// Demuxer replaying a fixed list of packets.
struct ListDemuxer {
    streams: Vec<StreamDescriptor>,
    packets: Arc<Mutex<Vec<Packet>>>,
    abort: AbortHandle,
}

impl Demuxer for ListDemuxer {
    fn format(&self) -> &'static str {
        "list"
    }

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read(&mut self) -> mediastore_media::Result<Option<Packet>> {
        self.abort.check()?;
        let mut packets = self.packets.lock().unwrap();
        if packets.is_empty() {
            Ok(None)
        } else {
            Ok(Some(packets.remove(0)))
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

#[test]
fn test_failed_mux_write_keeps_pipeline_running() {
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new(
        dir.path().join("out.mkv"),
        &CacheConfig::default(),
    ));
    cache.open().unwrap();

    let packets = Arc::new(Mutex::new(vec![
        pcm_packet(0, 16),
        Packet::new(0, Vec::new()),
        pcm_packet(20_000, 16),
    ]));
    let written = Arc::new(AtomicUsize::new(0));
    let input_abort = AbortHandle::new();

    let mut pipeline = Pipeline::start(
        MediaId::new(9),
        Box::new(ListDemuxer {
            streams: vec![pcm_stream()],
            packets: Arc::clone(&packets),
            abort: AbortHandle::new(),
        }),
        Box::new(PickyMuxer {
            written: Arc::clone(&written),
        }),
        cache,
        input_abort.clone(),
        &PipelineConfig {
            poll_interval_ms: 5,
            ..PipelineConfig::default()
        },
    )
    .unwrap();

    // The failing packet ends one pass; the next pass picks up the rest
    wait_until(|| written.load(Ordering::SeqCst) == 2);
    assert!(pipeline.is_running());

    packets.lock().unwrap().push(pcm_packet(40_000, 16));
    wait_until(|| written.load(Ordering::SeqCst) == 3);

    pipeline.close();
    assert!(input_abort.is_aborted());
    assert!(!pipeline.is_running());
}

#[test]
fn test_registry_reopen_after_close_is_fresh() {
    use mediastore::registry::StreamRegistry;

    let h = TestHarness::new();
    let config = Config {
        store: StoreConfig::in_dir(h.dir.path()),
        ..Config::default()
    };
    let registry = StreamRegistry::new(config, h.sources.clone());
    let id = MediaId::new(1);

    let first = registry.open(id, "/media/show.ts").unwrap();
    let feed = h.sources.feed("/media/show.ts");
    feed.send(pcm_packet(0, 512)).unwrap();
    wait_until(|| first.length() > 0);

    assert!(registry.close(id));
    assert!(registry.get_stream(id).is_none());
    assert_eq!(first.state(), StreamState::Closed);

    let second = registry.open(id, "/media/show.ts").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.length(), 0);
    assert_eq!(h.sources.opens(), 2);
}

#[test]
fn test_open_racing_unpin_does_not_revive_stream() {
    let h = Arc::new(TestHarness::with_sources(
        ChannelSources::slow(Duration::from_millis(300)),
        |_| {},
    ));
    let id = h.store.pin_media("/media/show.ts").unwrap();
    assert_eq!(h.store.open_streams(), 1);

    // Closing waits out the stalled read, leaving a window for the open below
    let unpinner = {
        let h = Arc::clone(&h);
        std::thread::spawn(move || h.store.unpin_media(id).unwrap())
    };
    std::thread::sleep(Duration::from_millis(50));
    let reopened = h.store.open(id);

    assert!(unpinner.join().unwrap());
    assert!(reopened.is_none());
    assert!(!h.store.is_pinned(id));
    assert!(h.store.stream(id).is_none());
    assert_eq!(h.store.open_streams(), 0);
    assert_eq!(h.sources.opens(), 1);
}

#[test]
fn test_pin_racing_unpin_stays_consistent() {
    let h = Arc::new(TestHarness::with_sources(
        ChannelSources::slow(Duration::from_millis(100)),
        |_| {},
    ));
    let barrier = Arc::new(Barrier::new(2));

    let pinner = {
        let (h, barrier) = (Arc::clone(&h), Arc::clone(&barrier));
        std::thread::spawn(move || {
            barrier.wait();
            h.store.pin_media("/media/race.ts").unwrap()
        })
    };
    barrier.wait();
    let unpinned = h.store.unpin_media(MediaId::new(1)).unwrap();
    let id = pinner.join().unwrap();
    assert_eq!(id, MediaId::new(1));

    // A stream is open exactly when the id is still pinned
    assert_eq!(h.store.is_pinned(id), !unpinned);
    assert_eq!(h.store.stream(id).is_some(), !unpinned);
    assert_eq!(h.store.open_streams(), usize::from(!unpinned));
}
