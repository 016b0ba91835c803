//! Append-while-read disk cache.
//!
//! A [`DiskCache`] is a single cache file with one appending writer (the
//! pipeline's muxer, through [`OutputSink`]) and any number of readers. Readers
//! may only read below the write frontier; anything at or past it fails with
//! [`Error::NotYetAvailable`] instead of blocking.
//!
//! Reads and writes take separate locks, so a slow reader never stalls the
//! conversion. Positions are atomics and `write_position` is published only
//! after the bytes have reached the file.

mod rate;
mod strategy;

pub use rate::RateTracker;
pub use strategy::{CacheReader, CacheStrategy, CacheWriter, SimpleFileCache};

use chrono::{DateTime, Utc};
use mediastore_common::{Error, Result};
use mediastore_media::OutputSink;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::CacheConfig;

/// Longest single pause [`DiskCache::write_delay`] asks for.
const MAX_WRITE_DELAY: Duration = Duration::from_secs(1);

/// Fill level and throughput of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatus {
    /// Bytes written ahead of the read position.
    pub forward: u64,
    /// Peak write rate in bytes per second.
    pub max_rate: u64,
    /// Current write rate in bytes per second.
    pub cur_rate: u64,
    /// `forward` relative to the readahead target, in `[0, 1]`.
    pub level: f64,
}

/// File metadata of a cache file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl CacheStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

struct ReadSide {
    reader: Box<dyn CacheReader>,
    stat: File,
}

/// Disk-backed byte store that can be read while it is being written.
pub struct DiskCache {
    path: PathBuf,
    strategy: Box<dyn CacheStrategy>,
    read_side: Mutex<Option<ReadSide>>,
    writer: Mutex<Option<Box<dyn CacheWriter>>>,
    read_position: AtomicU64,
    write_position: AtomicI64,
    file_size: AtomicU64,
    open: AtomicBool,
    rate: Mutex<RateTracker>,
    write_rate_limit: AtomicU32,
    readahead_bytes: u64,
    chunk_size: u32,
}

impl DiskCache {
    /// Cache at `path` using a [`SimpleFileCache`].
    pub fn new(path: impl Into<PathBuf>, config: &CacheConfig) -> Self {
        Self::with_strategy(path, config, SimpleFileCache)
    }

    pub fn with_strategy(
        path: impl Into<PathBuf>,
        config: &CacheConfig,
        strategy: impl CacheStrategy + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            strategy: Box::new(strategy),
            read_side: Mutex::new(None),
            writer: Mutex::new(None),
            read_position: AtomicU64::new(0),
            write_position: AtomicI64::new(-1),
            file_size: AtomicU64::new(0),
            open: AtomicBool::new(false),
            rate: Mutex::new(RateTracker::new(config.rate_window())),
            write_rate_limit: AtomicU32::new(0),
            readahead_bytes: config.readahead_bytes,
            chunk_size: config.chunk_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open (and truncate) the cache file.
    pub fn open(&self) -> Result<()> {
        let mut writer_slot = self.writer.lock();
        let mut read_slot = self.read_side.lock();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (reader, writer) = self.strategy.into_reader_writer(&self.path).map_err(|e| {
            warn!("Failed to open cache {:?}: {}", self.path, e);
            Error::Io(e)
        })?;
        // The halves are dropped with this error, leaving nothing open
        let stat = File::open(&self.path).map_err(|e| {
            warn!("Failed to open stat handle for {:?}: {}", self.path, e);
            Error::Io(e)
        })?;
        let file_size = stat.metadata()?.len();

        *writer_slot = Some(writer);
        *read_slot = Some(ReadSide { reader, stat });
        self.read_position.store(0, Ordering::SeqCst);
        self.write_position.store(-1, Ordering::SeqCst);
        self.file_size.store(file_size, Ordering::SeqCst);
        self.rate.lock().reset();
        self.open.store(true, Ordering::SeqCst);

        debug!("Opened cache {:?} ({} bytes on disk)", self.path, file_size);
        Ok(())
    }

    /// Release both file halves. Further reads fail with [`Error::Closed`].
    pub fn close(&self) {
        let mut writer_slot = self.writer.lock();
        let mut read_slot = self.read_side.lock();

        if let Some(mut writer) = writer_slot.take() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush cache {:?}: {}", self.path, e);
            }
        }
        *read_slot = None;
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closed cache {:?}", self.path);
        }
    }

    /// Bytes readers may currently see.
    pub fn available(&self) -> u64 {
        let write_position = self.write_position.load(Ordering::SeqCst);
        if write_position > 0 {
            write_position as u64
        } else {
            self.file_size.load(Ordering::SeqCst)
        }
    }

    /// Read into `buf` starting at `position`.
    pub fn read(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.read_side.lock();
        let side = guard.as_mut().ok_or(Error::Closed)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let total = self.available();
        if position >= total {
            return Err(Error::NotYetAvailable {
                position,
                available: total,
            });
        }

        if position != self.read_position.load(Ordering::SeqCst) {
            side.reader.seek(SeekFrom::Start(position))?;
            self.read_position.store(position, Ordering::SeqCst);
        }

        let want = buf.len().min((total - position) as usize);
        let mut filled = 0;
        while filled < want {
            match side.reader.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Cursor state is unknown now, force a seek next time
                    self.read_position.store(u64::MAX, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }

        self.read_position
            .store(position + filled as u64, Ordering::SeqCst);
        Ok(filled)
    }

    /// Metadata of the bytes physically on disk.
    pub fn stat(&self) -> Result<CacheStat> {
        let guard = self.read_side.lock();
        let side = guard.as_ref().ok_or(Error::Closed)?;
        Ok(CacheStat::from_metadata(&side.stat.metadata()?))
    }

    /// Length of the readable content.
    pub fn length(&self) -> u64 {
        self.available()
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Current write rate in bytes per second.
    pub fn download_speed(&self) -> u64 {
        self.rate.lock().rate_at(Instant::now())
    }

    pub fn cache_status(&self) -> CacheStatus {
        let write_position = self.write_position.load(Ordering::SeqCst);
        let forward = if write_position >= 0 {
            (write_position as u64).saturating_sub(self.read_position())
        } else {
            0
        };

        let (max_rate, cur_rate) = {
            let mut rate = self.rate.lock();
            let cur = rate.rate_at(Instant::now());
            (rate.peak().max(cur), cur)
        };

        let level = if self.readahead_bytes == 0 {
            1.0
        } else {
            (forward as f64 / self.readahead_bytes as f64).clamp(0.0, 1.0)
        };

        CacheStatus {
            forward,
            max_rate,
            cur_rate,
            level,
        }
    }

    /// Limit the write rate to `bytes_per_sec`; 0 removes the limit.
    pub fn set_write_rate(&self, bytes_per_sec: u32) -> bool {
        self.write_rate_limit.store(bytes_per_sec, Ordering::SeqCst);
        debug!("Cache {:?} write rate limit: {} B/s", self.path, bytes_per_sec);
        true
    }

    pub fn write_rate_limit(&self) -> u32 {
        self.write_rate_limit.load(Ordering::SeqCst)
    }

    /// Pause the writer should take to stay under the rate limit.
    pub fn write_delay(&self) -> Option<Duration> {
        let limit = u64::from(self.write_rate_limit());
        self.rate
            .lock()
            .delay_for(limit, Instant::now())
            .map(|delay| delay.min(MAX_WRITE_DELAY))
    }

    /// Offset of the next byte to be appended, or -1 before the first write.
    pub fn write_position(&self) -> i64 {
        self.write_position.load(Ordering::SeqCst)
    }

    fn read_position(&self) -> u64 {
        match self.read_position.load(Ordering::SeqCst) {
            u64::MAX => 0,
            position => position,
        }
    }

    /// Append `buf`; `true` only if every byte was written.
    pub fn append(&self, buf: &[u8]) -> bool {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        if buf.is_empty() {
            return true;
        }

        let frontier = self.write_position.load(Ordering::SeqCst).max(0) as u64;
        if let Err(e) = writer.write_all(buf) {
            warn!("Cache write to {:?} failed: {}", self.path, e);
            // Drop any torn tail so the next append lands on the frontier
            if let Err(e) = writer.seek(SeekFrom::Start(frontier)) {
                warn!("Failed to rewind cache {:?}: {}", self.path, e);
            }
            return false;
        }

        let end = frontier + buf.len() as u64;
        self.write_position.store(end as i64, Ordering::SeqCst);
        self.file_size.fetch_max(end, Ordering::SeqCst);
        self.rate.lock().record(buf.len() as u64, Instant::now());
        true
    }
}

impl OutputSink for DiskCache {
    fn write_output_packet(&self, buf: &[u8]) -> bool {
        self.append(buf)
    }

    fn destination(&self) -> &Path {
        &self.path
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        self.close();
    }
}
