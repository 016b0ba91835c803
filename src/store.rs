//! The media store service.
//!
//! [`MediaStore`] ties the durable catalog of pinned sources to the registry
//! of open streams. It is constructed explicitly and passed to whoever needs
//! it; there is no process-wide instance.

use mediastore_common::{Error, MediaId, Result};
use mediastore_db::{MediaCatalog, MediaRecord, SqliteCatalogStore};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::CacheStat;
use crate::config::{Config, StoreConfig};
use crate::registry::StreamRegistry;
use crate::source::{DefaultSourceFactory, SourceFactory};
use crate::stream::MediaStream;

pub struct MediaStore {
    config: StoreConfig,
    catalog: MediaCatalog,
    registry: StreamRegistry,
    /// Serializes pin, unpin and open so a stream never outlives its pin.
    lifecycle: Mutex<()>,
}

impl MediaStore {
    pub fn new(config: Config, catalog: MediaCatalog, sources: Arc<dyn SourceFactory>) -> Self {
        Self {
            config: config.store.clone(),
            catalog,
            registry: StreamRegistry::new(config, sources),
            lifecycle: Mutex::new(()),
        }
    }

    /// Store over the SQLite catalog at `config.store.db_path`, reading local
    /// files.
    pub fn open_default(config: Config) -> Result<Self> {
        let catalog = MediaCatalog::new(SqliteCatalogStore::open(&config.store.db_path)?);
        Ok(Self::new(config, catalog, Arc::new(DefaultSourceFactory)))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &MediaCatalog {
        &self.catalog
    }

    /// Create the cache directory and restore the catalog.
    pub fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.cache_dir)?;
        let count = self.catalog.load()?;
        self.registry.initialize();
        info!(
            "Media store ready: {} pinned, cache in {:?}",
            count, self.config.cache_dir
        );
        Ok(())
    }

    /// Close every stream and write the catalog back.
    pub fn deinitialize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.registry.deinitialize();
        self.catalog.save()?;
        info!("Media store shut down");
        Ok(())
    }

    /// Pin `path` and, if configured, start converting it right away.
    ///
    /// A failure to start the conversion is logged; the pin itself stands.
    pub fn pin_media(&self, path: &str) -> Result<MediaId> {
        let _lifecycle = self.lifecycle.lock();
        let media_id = self.catalog.pin(path)?;
        if self.config.open_on_pin && self.registry.open(media_id, path).is_none() {
            warn!("Pinned {} as {} but could not start conversion", path, media_id);
        }
        Ok(media_id)
    }

    pub fn is_pinned(&self, media_id: MediaId) -> bool {
        self.catalog.is_pinned(media_id)
    }

    pub fn is_path_pinned(&self, path: &str) -> bool {
        self.catalog.is_path_pinned(path)
    }

    /// Id of a pinned path, or [`MediaId::NONE`].
    pub fn media_id(&self, path: &str) -> MediaId {
        self.catalog.id_of(path).unwrap_or(MediaId::NONE)
    }

    /// Source path pinned under `media_id`.
    pub fn media_path(&self, media_id: MediaId) -> Option<String> {
        self.catalog.path_of(media_id)
    }

    /// Stop converting `media_id` and forget it.
    pub fn unpin_media(&self, media_id: MediaId) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock();
        let Some(path) = self.catalog.path_of(media_id) else {
            return Ok(false);
        };

        let removed = self.catalog.unpin(media_id)?;
        self.registry.close(media_id);

        if removed && self.config.purge_on_unpin {
            let cache_path = self.build_local_path(&path);
            match std::fs::remove_file(&cache_path) {
                Ok(()) => info!("Removed cache file {:?}", cache_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove cache file {:?}: {}", cache_path, e),
            }
        }
        Ok(removed)
    }

    /// Open stream of a pinned id, starting it if needed.
    pub fn open(&self, media_id: MediaId) -> Option<Arc<MediaStream>> {
        let _lifecycle = self.lifecycle.lock();
        let path = self.catalog.path_of(media_id)?;
        self.registry.open(media_id, &path)
    }

    /// Stream of `media_id` if it is currently open.
    pub fn stream(&self, media_id: MediaId) -> Option<Arc<MediaStream>> {
        self.registry.get_stream(media_id)
    }

    /// Metadata of the cache file of `media_id`, without opening it.
    pub fn stat(&self, media_id: MediaId) -> Result<CacheStat> {
        let path = self
            .catalog
            .path_of(media_id)
            .ok_or_else(|| Error::not_found(format!("media {}", media_id)))?;
        if let Some(stream) = self.registry.get_stream(media_id) {
            return stream.stat();
        }
        let metadata = std::fs::metadata(self.build_local_path(&path))?;
        Ok(CacheStat::from_metadata(&metadata))
    }

    /// Everything pinned, by id.
    pub fn list(&self) -> Vec<MediaRecord> {
        self.catalog.records()
    }

    /// Number of streams currently open.
    pub fn open_streams(&self) -> usize {
        self.registry.len()
    }

    /// Cache file `source` converts into.
    pub fn build_local_path(&self, source: &str) -> PathBuf {
        self.registry.cache_path(source)
    }
}
