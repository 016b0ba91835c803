//! Mediastore-Media: packet sources and container writers
//!
//! # Modules
//!
//! - `io` - Abortable input streams ([`InputStream`], [`FileInputStream`])
//! - `demux` - Demuxer trait and the FLV demuxer
//! - `mux` - Muxer trait, output sink, Matroska and FLV muxers
//! - `amf0` - The subset of AMF0 used by FLV script tags
//!
//! # Architecture
//!
//! A conversion reads [`Packet`](mediastore_common::Packet)s from a
//! [`Demuxer`] and hands each one, with its stream descriptor, to a [`Muxer`].
//! The muxer serializes into an [`OutputSink`], which decides where the bytes
//! go. Nothing in this crate blocks waiting for input: when a source has no
//! complete packet yet, `read` returns `Ok(None)` and the caller polls again.
//!
//! ```no_run
//! use mediastore_media::{create_muxer, open_demuxer, FileInputStream, InputStream};
//! # use mediastore_media::OutputSink;
//! # use std::sync::Arc;
//! # fn sink() -> Arc<dyn OutputSink> { unimplemented!() }
//!
//! let mut input = FileInputStream::new("/media/live.flv");
//! input.open().unwrap();
//! let mut demuxer = open_demuxer(Box::new(input)).unwrap();
//!
//! let mut muxer = create_muxer(sink(), 64 * 1024).unwrap();
//! muxer.open(demuxer.streams()).unwrap();
//! while let Some(packet) = demuxer.read().unwrap() {
//!     if let Some(stream) = demuxer.stream(packet.demuxer_id, packet.stream_id) {
//!         muxer.write(&packet, stream).unwrap();
//!     }
//! }
//! muxer.close().unwrap();
//! ```

pub mod amf0;
pub mod demux;
pub mod error;
pub mod io;
pub mod mux;

pub use demux::{open_demuxer, Demuxer, FlvDemuxer};
pub use error::{Error, Result};
pub use io::{AbortHandle, FileInputStream, InputStream};
pub use mux::{create_muxer, FlvMuxer, MatroskaMuxer, Muxer, OutputSink};
