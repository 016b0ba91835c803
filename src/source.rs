//! Where pinned media is read from.

use mediastore_common::Result;
use mediastore_media::{open_demuxer, Demuxer, FileInputStream, InputStream};

/// Builds the input and demuxer for a pinned source path.
pub trait SourceFactory: Send + Sync {
    /// Create an input stream for `path`. It is opened by the caller.
    fn create_input(&self, path: &str) -> Result<Box<dyn InputStream>>;

    /// Probe an opened input and wrap it in a demuxer.
    fn create_demuxer(&self, input: Box<dyn InputStream>) -> Result<Box<dyn Demuxer>>;
}

/// Local files, demuxed by content probing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSourceFactory;

impl SourceFactory for DefaultSourceFactory {
    fn create_input(&self, path: &str) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(FileInputStream::new(path)))
    }

    fn create_demuxer(&self, input: Box<dyn InputStream>) -> Result<Box<dyn Demuxer>> {
        Ok(open_demuxer(input)?)
    }
}
