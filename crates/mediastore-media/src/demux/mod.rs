//! Demuxers: turn an [`InputStream`] into [`Packet`]s.

mod flv;

pub use flv::FlvDemuxer;

use mediastore_common::{Packet, StreamDescriptor};
use std::io::{Read, SeekFrom};

use crate::error::{Error, Result};
use crate::io::{AbortHandle, InputStream};

/// A packet source over one input.
pub trait Demuxer: Send {
    /// Short container name, e.g. `"flv"`.
    fn format(&self) -> &'static str;

    /// All streams discovered so far.
    fn streams(&self) -> &[StreamDescriptor];

    /// Descriptor of the stream a packet belongs to.
    fn stream(&self, demuxer_id: i32, stream_id: u32) -> Option<&StreamDescriptor> {
        self.streams()
            .iter()
            .find(|s| s.id == stream_id && (demuxer_id < 0 || s.demuxer_id == demuxer_id))
    }

    /// Next packet, or `None` when no complete packet is available yet.
    fn read(&mut self) -> Result<Option<Packet>>;

    /// Total duration in microseconds, if the container announces one.
    fn duration(&self) -> Option<i64> {
        None
    }

    /// Handle that aborts reads of the underlying input.
    fn abort_handle(&self) -> AbortHandle;
}

/// Pick a demuxer for `input` by probing its first bytes.
pub fn open_demuxer(mut input: Box<dyn InputStream>) -> Result<Box<dyn Demuxer>> {
    let mut probe = [0u8; 3];
    input.seek(SeekFrom::Start(0))?;
    let mut filled = 0;
    while filled < probe.len() {
        match input.read(&mut probe[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    input.seek(SeekFrom::Start(0))?;

    if filled == probe.len() && &probe == flv::FLV_SIGNATURE {
        return Ok(Box::new(FlvDemuxer::open(input)?));
    }

    Err(Error::unsupported(format!(
        "no demuxer for {}",
        input.path().display()
    )))
}
