//! Database query modules.
//!
//! - pinned_media: pinned id <-> path rows and the `max_media_id` counter

pub mod pinned_media;
