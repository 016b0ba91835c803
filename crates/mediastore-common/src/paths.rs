//! Path utilities for the media store.
//!
//! Cache files live under a single cache root and are named after a digest of
//! the *source path* (not of the media bytes), so the same source always maps
//! onto the same cache file:
//!
//! ```text
//! <cache-root>/<32 hex chars>.<container-extension>
//! ```

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Scheme prefix of synthetic media store paths.
pub const MEDIA_STORE_SCHEME: &str = "mediastore://";

/// Container extensions a cache file may carry.
const CONTAINER_EXTENSIONS: &[&str] = &["mkv", "mka", "flv"];

/// Number of digest bytes used in cache file names (128 bits).
const DIGEST_BYTES: usize = 16;

/// Check if a path uses the `mediastore://` scheme.
///
/// # Examples
///
/// ```
/// use mediastore_common::paths::is_media_store_path;
///
/// assert!(is_media_store_path("mediastore://3"));
/// assert!(!is_media_store_path("/media/show.ts"));
/// ```
pub fn is_media_store_path(path: &str) -> bool {
    path.starts_with(MEDIA_STORE_SCHEME)
}

/// Hex digest used to name the cache file of `source_path`.
///
/// # Examples
///
/// ```
/// use mediastore_common::paths::source_digest;
///
/// let digest = source_digest("/media/show.ts");
/// assert_eq!(digest.len(), 32);
/// assert_eq!(digest, source_digest("/media/show.ts"));
/// ```
pub fn source_digest(source_path: &str) -> String {
    let digest = Sha256::digest(source_path.as_bytes());
    hex::encode(&digest[..DIGEST_BYTES])
}

/// Build the local cache path of `source_path`.
///
/// The extension selects the container the cache is serialized into.
pub fn build_cache_path(cache_root: &Path, source_path: &str, extension: &str) -> PathBuf {
    let extension = extension.trim_start_matches('.');
    cache_root.join(format!("{}.{}", source_digest(source_path), extension))
}

/// Check if `extension` names a container the cache can be written in.
pub fn is_container_extension(extension: &str) -> bool {
    CONTAINER_EXTENSIONS.contains(&extension.to_lowercase().as_str())
}

/// Lowercased extension of `path`, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Get the list of container extensions.
#[must_use]
pub fn container_extensions() -> &'static [&'static str] {
    CONTAINER_EXTENSIONS
}
