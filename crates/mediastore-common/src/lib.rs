//! Mediastore-Common: Shared types, identifiers, and utilities.
//!
//! This crate provides common functionality used across mediastore:
//!
//! - **Media IDs**: The `u32` identity handed out when a source is pinned
//! - **Path Scheme**: `mediastore://<id>` parsing and cache-path derivation
//! - **Packet Types**: Demuxed packets and the stream descriptors they belong to
//! - **Error Handling**: Common error type and result alias
//!
//! # Examples
//!
//! ```
//! use mediastore_common::MediaId;
//!
//! let id = MediaId::from_store_path("mediastore://42");
//! assert_eq!(id, MediaId::new(42));
//! assert_eq!(id.store_path(), "mediastore://42");
//!
//! // Anything malformed resolves to the "not found" sentinel
//! assert!(MediaId::from_store_path("mediastore://abc").is_none());
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
