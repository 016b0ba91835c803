//! One open media item: a cache file plus the pipeline filling it.

use mediastore_common::{Error, MediaId, Result, StreamDescriptor};
use mediastore_media::{create_muxer, AbortHandle, OutputSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStat, CacheStatus, DiskCache};
use crate::config::{CacheConfig, PipelineConfig};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::source::SourceFactory;

/// Lifecycle of a [`MediaStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Container metadata of an open stream.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    /// Output container name.
    pub format: String,
    pub mime_type: String,
    /// Source streams as reported by the demuxer.
    pub streams: Vec<StreamDescriptor>,
    /// Source length in bytes, if known.
    pub source_length: Option<u64>,
    /// Source duration in microseconds, if announced.
    pub duration: Option<i64>,
    /// Highest timestamp muxed so far, in microseconds.
    pub max_timestamp: Option<i64>,
}

struct Opened {
    pipeline: Pipeline,
    container: ContainerInfo,
    stats: Arc<PipelineStats>,
}

/// A pinned media item being converted into its cache file.
///
/// Readers go through [`read`](Self::read) and never see the underlying
/// cache; everything below the write frontier is readable while the pipeline
/// keeps appending.
pub struct MediaStream {
    media_id: MediaId,
    source_path: String,
    cache: Arc<DiskCache>,
    sources: Arc<dyn SourceFactory>,
    pipeline_config: PipelineConfig,
    state: Mutex<StreamState>,
    opened: Mutex<Option<Opened>>,
}

impl MediaStream {
    pub fn new(
        media_id: MediaId,
        source_path: impl Into<String>,
        cache_path: impl Into<PathBuf>,
        pipeline_config: &PipelineConfig,
        cache_config: &CacheConfig,
        sources: Arc<dyn SourceFactory>,
    ) -> Self {
        Self {
            media_id,
            source_path: source_path.into(),
            cache: Arc::new(DiskCache::new(cache_path, cache_config)),
            sources,
            pipeline_config: pipeline_config.clone(),
            state: Mutex::new(StreamState::Closed),
            opened: Mutex::new(None),
        }
    }

    pub fn media_id(&self) -> MediaId {
        self.media_id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn cache_path(&self) -> &Path {
        self.cache.path()
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Open the cache and source and start converting.
    ///
    /// On failure everything acquired so far is released and the stream is
    /// back in [`StreamState::Closed`].
    pub fn open(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != StreamState::Closed {
                return Err(Error::invalid_input(format!(
                    "stream {} is already {:?}",
                    self.media_id, *state
                )));
            }
            *state = StreamState::Opening;
        }

        match self.start() {
            Ok(opened) => {
                info!(
                    "Opened media {} ({} -> {:?})",
                    self.media_id,
                    self.source_path,
                    self.cache.path()
                );
                *self.opened.lock() = Some(opened);
                *self.state.lock() = StreamState::Open;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open media {} ({}): {}", self.media_id, self.source_path, e);
                *self.state.lock() = StreamState::Closed;
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<Opened> {
        self.cache.open()?;
        let opened = self.start_pipeline();
        if opened.is_err() {
            self.cache.close();
        }
        opened
    }

    /// Everything after the cache. Locals drop in reverse order on error.
    fn start_pipeline(&self) -> Result<Opened> {
        let mut input = self.sources.create_input(&self.source_path)?;
        input.open()?;
        let input_abort: AbortHandle = input.abort_handle();
        let source_length = input.length();

        let demuxer = self.sources.create_demuxer(input)?;
        debug!(
            "Media {}: {} with {} streams",
            self.media_id,
            demuxer.format(),
            demuxer.streams().len()
        );

        let sink: Arc<dyn OutputSink> = self.cache.clone();
        let mut muxer = create_muxer(sink, self.cache.chunk_size() as usize)?;
        muxer.open(demuxer.streams())?;

        let container = ContainerInfo {
            format: muxer.format().to_string(),
            mime_type: muxer.mime_type().to_string(),
            streams: demuxer.streams().to_vec(),
            source_length,
            duration: demuxer.duration(),
            max_timestamp: None,
        };

        if self.pipeline_config.write_rate_limit > 0 {
            self.cache.set_write_rate(self.pipeline_config.write_rate_limit);
        }

        let pipeline = Pipeline::start(
            self.media_id,
            demuxer,
            muxer,
            Arc::clone(&self.cache),
            input_abort,
            &self.pipeline_config,
        )?;
        let stats = Arc::clone(pipeline.stats());

        Ok(Opened {
            pipeline,
            container,
            stats,
        })
    }

    /// Stop the pipeline and release the cache. No-op unless open.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state != StreamState::Open {
                return;
            }
            *state = StreamState::Closing;
        }

        if let Some(mut opened) = self.opened.lock().take() {
            opened.pipeline.close();
        }
        self.cache.close();

        *self.state.lock() = StreamState::Closed;
        info!("Closed media {}", self.media_id);
    }

    /// Read at `position`; see [`DiskCache::read`].
    pub fn read(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        self.cache.read(position, buf)
    }

    pub fn stat(&self) -> Result<CacheStat> {
        self.cache.stat()
    }

    pub fn length(&self) -> u64 {
        self.cache.length()
    }

    pub fn chunk_size(&self) -> u32 {
        self.cache.chunk_size()
    }

    pub fn download_speed(&self) -> u64 {
        self.cache.download_speed()
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.cache_status()
    }

    pub fn set_write_rate(&self, bytes_per_sec: u32) -> bool {
        self.cache.set_write_rate(bytes_per_sec)
    }

    /// Whether the pipeline thread is still alive.
    pub fn is_converting(&self) -> bool {
        self.opened
            .lock()
            .as_ref()
            .is_some_and(|o| o.pipeline.is_running())
    }

    /// Packets muxed so far.
    pub fn packets_written(&self) -> u64 {
        self.opened
            .lock()
            .as_ref()
            .map_or(0, |o| o.stats.packets())
    }

    pub fn container(&self) -> Option<ContainerInfo> {
        self.opened.lock().as_ref().map(|o| ContainerInfo {
            max_timestamp: o.stats.max_timestamp(),
            ..o.container.clone()
        })
    }

    /// Dimensions of the first video stream.
    pub fn video_resolution(&self) -> Option<(u32, u32)> {
        let opened = self.opened.lock();
        opened
            .as_ref()?
            .container
            .streams
            .iter()
            .find(|s| s.is_video() && s.width > 0 && s.height > 0)
            .map(|s| (s.width, s.height))
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mediastore_media::{FileInputStream, InputStream};
    use std::io::{Read, Seek, SeekFrom};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Opens inputs fine but never produces a demuxer.
    struct NoDemuxer {
        input_dropped: Arc<AtomicBool>,
    }

    struct TrackedInput {
        inner: FileInputStream,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for TrackedInput {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl Read for TrackedInput {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for TrackedInput {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl InputStream for TrackedInput {
        fn open(&mut self) -> mediastore_media::Result<()> {
            self.inner.open()
        }

        fn length(&self) -> Option<u64> {
            self.inner.length()
        }

        fn block_size(&self) -> u32 {
            self.inner.block_size()
        }

        fn abort_handle(&self) -> AbortHandle {
            self.inner.abort_handle()
        }

        fn path(&self) -> &Path {
            self.inner.path()
        }
    }

    impl SourceFactory for NoDemuxer {
        fn create_input(&self, path: &str) -> Result<Box<dyn InputStream>> {
            Ok(Box::new(TrackedInput {
                inner: FileInputStream::new(path),
                dropped: Arc::clone(&self.input_dropped),
            }))
        }

        fn create_demuxer(
            &self,
            _input: Box<dyn InputStream>,
        ) -> Result<Box<dyn mediastore_media::Demuxer>> {
            Err(Error::unsupported("no demuxer"))
        }
    }

    #[test]
    fn test_failed_open_unwinds() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("show.ts");
        std::fs::write(&source, b"whatever").unwrap();

        let dropped = Arc::new(AtomicBool::new(false));
        let stream = MediaStream::new(
            MediaId::new(1),
            source.to_string_lossy(),
            dir.path().join("cache/x.mkv"),
            &PipelineConfig::default(),
            &CacheConfig::default(),
            Arc::new(NoDemuxer {
                input_dropped: Arc::clone(&dropped),
            }),
        );

        assert_matches!(stream.open(), Err(Error::Unsupported(_)));
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(dropped.load(Ordering::SeqCst));
        // Cache was released again
        assert_matches!(stream.stat(), Err(Error::Closed));
        assert!(stream.container().is_none());
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let stream = MediaStream::new(
            MediaId::new(2),
            "/nonexistent/show.flv",
            dir.path().join("x.mkv"),
            &PipelineConfig::default(),
            &CacheConfig::default(),
            Arc::new(crate::source::DefaultSourceFactory),
        );

        assert_matches!(stream.open(), Err(Error::Io(_)));
        assert_eq!(stream.state(), StreamState::Closed);
        let mut buf = [0u8; 8];
        assert_matches!(stream.read(0, &mut buf), Err(Error::Closed));

        // Closing a stream that never opened is harmless
        stream.close();
        assert_eq!(stream.state(), StreamState::Closed);
    }
}
