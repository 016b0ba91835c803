//! Reader-facing file handles.
//!
//! A [`MediaFile`] reads a pinned item through its `mediastore://<id>` path
//! with an ordinary cursor. [`FileHandle`] picks between that and a plain
//! local file by looking at the path scheme, and implements `Read + Seek` for
//! both.

use mediastore_common::paths::is_media_store_path;
use mediastore_common::{Error, MediaId, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::cache::{CacheStat, CacheStatus};
use crate::store::MediaStore;
use crate::stream::MediaStream;

/// Control requests understood by [`MediaFile::io_control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoControl {
    /// Whether the file can be seeked.
    SeekPossible,
    /// Fill level and rates of the cache behind the file.
    CacheStatus,
    /// Limit the conversion write rate (bytes per second, 0 = unlimited).
    SetCacheRate(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IoControlResponse {
    SeekPossible(bool),
    CacheStatus(CacheStatus),
    RateSet(bool),
}

/// Open handle on a pinned media item.
pub struct MediaFile {
    media_id: MediaId,
    stream: Arc<MediaStream>,
    position: u64,
}

impl MediaFile {
    /// Open `url` (`mediastore://<id>`), starting its conversion if needed.
    pub fn open(store: &MediaStore, url: &str) -> Result<Self> {
        let media_id = pinned_id(store, url)?;
        let stream = store
            .open(media_id)
            .ok_or_else(|| Error::not_found(format!("could not open {}", url)))?;
        Ok(Self {
            media_id,
            stream,
            position: 0,
        })
    }

    /// Whether `url` names a pinned item.
    pub fn exists(store: &MediaStore, url: &str) -> bool {
        pinned_id(store, url).is_ok()
    }

    /// Cache metadata of `url` without opening it.
    pub fn stat_url(store: &MediaStore, url: &str) -> Result<CacheStat> {
        store.stat(pinned_id(store, url)?)
    }

    pub fn media_id(&self) -> MediaId {
        self.media_id
    }

    pub fn stat(&self) -> Result<CacheStat> {
        self.stream.stat()
    }

    /// Read at the cursor and advance it by the bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.stream.read(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Move the cursor. A target before the start fails and leaves the
    /// cursor where it was.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (base, offset) = match pos {
            SeekFrom::Start(offset) => (0i128, i128::from(offset)),
            SeekFrom::Current(offset) => (i128::from(self.position), i128::from(offset)),
            SeekFrom::End(offset) => (i128::from(self.length()), i128::from(offset)),
        };
        let target = base + offset;
        if target < 0 {
            return Err(Error::invalid_input(format!(
                "seek to negative position {}",
                target
            )));
        }
        self.position = u64::try_from(target)
            .map_err(|_| Error::invalid_input(format!("seek position {} out of range", target)))?;
        Ok(self.position)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes currently readable.
    pub fn length(&self) -> u64 {
        self.stream.length()
    }

    pub fn chunk_size(&self) -> u32 {
        self.stream.chunk_size()
    }

    pub fn download_speed(&self) -> u64 {
        self.stream.download_speed()
    }

    pub fn io_control(&self, request: IoControl) -> Result<IoControlResponse> {
        Ok(match request {
            IoControl::SeekPossible => IoControlResponse::SeekPossible(true),
            IoControl::CacheStatus => IoControlResponse::CacheStatus(self.stream.cache_status()),
            IoControl::SetCacheRate(rate) => {
                IoControlResponse::RateSet(self.stream.set_write_rate(rate))
            }
        })
    }

    /// MIME type of the converted container.
    pub fn content(&self) -> Option<String> {
        self.stream.container().map(|c| c.mime_type)
    }

    /// Release the handle. The stream stays open until unpinned.
    pub fn close(self) {}
}

fn pinned_id(store: &MediaStore, url: &str) -> Result<MediaId> {
    let media_id = MediaId::from_store_path(url);
    if media_id.is_none() {
        return Err(Error::invalid_input(format!("not a media store path: {}", url)));
    }
    if !store.is_pinned(media_id) {
        return Err(Error::not_found(format!("media {} is not pinned", media_id)));
    }
    Ok(media_id)
}

/// A readable file, either on local disk or in the media store.
pub enum FileHandle {
    Local(File),
    Media(MediaFile),
}

impl FileHandle {
    /// Open `path`, routing `mediastore://` paths through `store`.
    pub fn open(store: &MediaStore, path: &str) -> Result<Self> {
        if is_media_store_path(path) {
            Ok(Self::Media(MediaFile::open(store, path)?))
        } else {
            Ok(Self::Local(File::open(path)?))
        }
    }

    pub fn length(&self) -> Result<u64> {
        match self {
            Self::Local(file) => Ok(file.metadata()?.len()),
            Self::Media(file) => Ok(file.length()),
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Media(_))
    }
}

fn to_io_error(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        e @ Error::NotYetAvailable { .. } => io::Error::new(io::ErrorKind::WouldBlock, e),
        e @ Error::InvalidInput(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
        e @ Error::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, e),
        e => io::Error::other(e),
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Local(file) => file.read(buf),
            Self::Media(file) => file.read(buf).map_err(to_io_error),
        }
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Local(file) => file.seek(pos),
            Self::Media(file) => file.seek(pos).map_err(to_io_error),
        }
    }
}
