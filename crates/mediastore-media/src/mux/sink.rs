//! Output side of a muxer.

use bytes::{Buf, BytesMut};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Destination of serialized container bytes.
pub trait OutputSink: Send + Sync {
    /// Append `buf`. Returns `true` only if every byte was written.
    fn write_output_packet(&self, buf: &[u8]) -> bool;

    /// Where the bytes end up. The extension selects the container format.
    fn destination(&self) -> &Path;
}

/// Buffers muxer output and hands it to the sink in block-sized pieces.
pub(crate) struct SinkWriter {
    sink: Arc<dyn OutputSink>,
    buf: BytesMut,
    block_size: usize,
    written: u64,
}

impl SinkWriter {
    pub(crate) fn new(sink: Arc<dyn OutputSink>, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            sink,
            buf: BytesMut::with_capacity(block_size),
            block_size,
            written: 0,
        }
    }

    pub(crate) fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes handed to the sink so far.
    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    /// Hand everything buffered to the sink.
    pub(crate) fn flush(&mut self) -> Result<()> {
        while !self.buf.is_empty() {
            let n = self.buf.len().min(self.block_size);
            if !self.sink.write_output_packet(&self.buf[..n]) {
                return Err(Error::ShortWrite {
                    written: 0,
                    expected: n,
                });
            }
            self.buf.advance(n);
            self.written += n as u64;
        }
        Ok(())
    }

    /// Drop buffered bytes past `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Drop anything buffered but not yet flushed.
    pub(crate) fn discard(&mut self) {
        self.buf.clear();
    }
}
