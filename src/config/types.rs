use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Directory holding the converted cache files
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// SQLite catalog of pinned media
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Container extension of cache files (`mkv`, `mka` or `flv`)
    #[serde(default = "default_container")]
    pub container: String,

    /// Delete the cache file when its media is unpinned
    #[serde(default = "default_true")]
    pub purge_on_unpin: bool,

    /// Start the conversion as soon as a path is pinned
    #[serde(default = "default_true")]
    pub open_on_pin: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("~/.local/share/mediastore/cache")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("~/.local/share/mediastore/catalog.db")
}

fn default_container() -> String {
    "mkv".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            db_path: default_db_path(),
            container: default_container(),
            purge_on_unpin: true,
            open_on_pin: true,
        }
    }
}

impl StoreConfig {
    /// Store rooted at `dir`, with the catalog and cache side by side.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cache_dir: dir.join("cache"),
            db_path: dir.join("catalog.db"),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Sleep between drain passes when the source has nothing new
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Initial write rate limit in bytes per second (0 = unlimited)
    #[serde(default)]
    pub write_rate_limit: u32,
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            write_rate_limit: 0,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Bytes ahead of the reader that count as a full cache level
    #[serde(default = "default_readahead_bytes")]
    pub readahead_bytes: u64,

    /// Block size muxers hand to the cache
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Sliding window for write rate measurement
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
}

fn default_readahead_bytes() -> u64 {
    4 * 1024 * 1024
}

fn default_chunk_size() -> u32 {
    64 * 1024
}

fn default_rate_window_ms() -> u64 {
    2000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            readahead_bytes: default_readahead_bytes(),
            chunk_size: default_chunk_size(),
            rate_window_ms: default_rate_window_ms(),
        }
    }
}

impl CacheConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}
