//! Mediastore - pinned media converted into a cache that is readable while it grows
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cache;
pub mod config;
pub mod file;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod store;
pub mod stream;

pub use file::{FileHandle, IoControl, IoControlResponse, MediaFile};
pub use source::{DefaultSourceFactory, SourceFactory};
pub use store::MediaStore;
pub use stream::{ContainerInfo, MediaStream, StreamState};
