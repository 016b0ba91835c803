//! Muxers: re-serialize demuxed packets into a container.
//!
//! A muxer never touches files directly; it hands serialized bytes to an
//! [`OutputSink`]. The container is chosen from the sink's destination
//! extension by [`create_muxer`].
//!
//! Both muxers hold back the container header until the first packet is
//! written, so a reader of the output never sees a header without media.

pub mod ebml;
mod flv;
mod matroska;
mod sink;

pub use flv::FlvMuxer;
pub use matroska::MatroskaMuxer;
pub use sink::OutputSink;

use mediastore_common::paths::extension_of;
use mediastore_common::{Packet, StreamDescriptor};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Name written into container metadata.
pub const MUXING_APP: &str = concat!("mediastore-", env!("CARGO_PKG_VERSION"));

/// A container serializer.
pub trait Muxer: Send {
    /// Short container name, e.g. `"matroska"`.
    fn format(&self) -> &'static str;

    /// MIME type of the produced container.
    fn mime_type(&self) -> &'static str;

    /// Prepare the container for `streams`. Streams the container cannot carry
    /// are skipped; fails if none remain.
    fn open(&mut self, streams: &[StreamDescriptor]) -> Result<()>;

    /// Serialize one packet. Packets of skipped streams are ignored.
    fn write(&mut self, packet: &Packet, stream: &StreamDescriptor) -> Result<()>;

    /// Flush anything still buffered. The muxer cannot be reused afterwards.
    fn close(&mut self) -> Result<()>;
}

/// Lifecycle shared by the muxers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxState {
    Idle,
    Open,
    Closed,
}

/// Create a muxer for the container implied by `sink`'s destination.
pub fn create_muxer(sink: Arc<dyn OutputSink>, block_size: usize) -> Result<Box<dyn Muxer>> {
    let destination = sink.destination().to_path_buf();
    match extension_of(&destination).as_deref() {
        Some("mkv") => Ok(Box::new(MatroskaMuxer::new(sink, block_size))),
        Some("mka") => Ok(Box::new(MatroskaMuxer::audio_only(sink, block_size))),
        Some("flv") => Ok(Box::new(FlvMuxer::new(sink, block_size))),
        _ => Err(Error::UnknownFormat(destination.display().to_string())),
    }
}
