//! Error types for mediastore-media.

use std::io;
use thiserror::Error;

/// Result type for mediastore-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mediastore-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed container data.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The output format could not be derived from the destination.
    #[error("Could not deduce output format from '{0}'")]
    UnknownFormat(String),

    /// None of the input streams can be carried by the output container.
    #[error("No usable streams for {0}")]
    NoStreams(&'static str),

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },

    /// The output sink accepted fewer bytes than it was given.
    #[error("Short write to output sink ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    /// The muxer was used before `open` or after `close`.
    #[error("Muxer is not open")]
    NotOpen,

    /// The operation was interrupted by an abort request.
    #[error("Aborted")]
    Aborted,
}

impl Error {
    /// Create an invalid data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<Error> for mediastore_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => Self::Io(e),
            Error::Aborted => Self::Aborted,
            Error::Unsupported(msg) => Self::Unsupported(msg),
            Error::UnknownFormat(dest) => {
                Self::Unsupported(format!("could not deduce output format from '{dest}'"))
            }
            other => Self::media(other),
        }
    }
}
