//! Source input streams.
//!
//! An [`InputStream`] is a seekable byte source that can be aborted from
//! another thread. The abort flag is shared through an [`AbortHandle`], which
//! the owner of a pipeline keeps after handing the stream to a demuxer.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default read granularity for file inputs.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;

/// Cloneable abort flag shared between a blocking reader and its owner.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that blocking operations return as soon as possible.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous abort request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Aborted)` if an abort was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }
}

/// I/O error reported by aborted reads.
pub fn aborted_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "input aborted")
}

/// A seekable, abortable source of bytes.
pub trait InputStream: Read + Seek + Send {
    /// Open the underlying resource.
    fn open(&mut self) -> Result<()>;

    /// Total length in bytes, if known.
    fn length(&self) -> Option<u64>;

    /// Preferred read granularity.
    fn block_size(&self) -> u32;

    /// Handle that aborts pending and future reads.
    fn abort_handle(&self) -> AbortHandle;

    /// Source location, for logging.
    fn path(&self) -> &Path;
}

/// [`InputStream`] over a local file.
///
/// Reads at the end of the file return 0 bytes rather than blocking, so a file
/// that is still being written can be drained repeatedly.
pub struct FileInputStream {
    path: PathBuf,
    file: Option<File>,
    abort: AbortHandle,
    block_size: u32,
}

impl FileInputStream {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            abort: AbortHandle::new(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.abort.is_aborted() {
            return Err(aborted_io_error());
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "input is not open"))
    }
}

impl Read for FileInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }
}

impl Seek for FileInputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }
}

impl InputStream for FileInputStream {
    fn open(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.file = Some(file);
        tracing::debug!(path = %self.path.display(), "Opened input");
        Ok(())
    }

    fn length(&self) -> Option<u64> {
        self.file
            .as_ref()
            .and_then(|f| f.metadata().ok())
            .map(|m| m.len())
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
