//! Physical staging of cache bytes.
//!
//! A strategy turns a cache path into independent reader and writer halves so
//! the read and write sides of a [`DiskCache`](super::DiskCache) never share a
//! file cursor.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

/// Read half of a cache file.
pub trait CacheReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> CacheReader for T {}

/// Append half of a cache file.
pub trait CacheWriter: Write + Seek + Send {}

impl<T: Write + Seek + Send> CacheWriter for T {}

/// How a cache file is opened.
pub trait CacheStrategy: Send + Sync {
    /// Open `path` and split it into reader and writer halves.
    fn into_reader_writer(
        &self,
        path: &Path,
    ) -> io::Result<(Box<dyn CacheReader>, Box<dyn CacheWriter>)>;
}

/// One file on disk, truncated on open, read and written through separate
/// handles.
///
/// Writes are unbuffered: once `write` returns the bytes are visible to the
/// reader handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleFileCache;

impl CacheStrategy for SimpleFileCache {
    fn into_reader_writer(
        &self,
        path: &Path,
    ) -> io::Result<(Box<dyn CacheReader>, Box<dyn CacheWriter>)> {
        let writer = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        // A cloned handle would share the write cursor
        let reader = File::open(path)?;
        Ok((Box::new(reader), Box::new(writer)))
    }
}
