//! Common error types used throughout mediastore.
//!
//! The read path has two very different failure modes: data that is simply not
//! produced yet (the caller should retry) and genuine failures. Both surface
//! through [`Error`], and [`Error::is_retryable`] tells them apart.

/// Common error type for mediastore.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A read was issued at or beyond the current write frontier.
    #[error("Not yet available: position {position} (available: {available})")]
    NotYetAvailable {
        /// Requested read offset.
        position: u64,
        /// Number of bytes readable when the request was made.
        available: u64,
    },

    /// The cache or stream has been closed.
    #[error("Closed")]
    Closed,

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The source or destination uses a format that is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Demuxing or muxing failed.
    #[error("Media error: {source}")]
    Media {
        /// The underlying container/codec error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A blocking operation was interrupted by an abort request.
    #[error("Aborted")]
    Aborted,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Unsupported error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Wrap a container/codec error.
    pub fn media(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Media {
            source: source.into(),
        }
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller should retry the operation later.
    ///
    /// Only reads past the write frontier are retryable; everything else is a
    /// hard failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotYetAvailable { .. })
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
