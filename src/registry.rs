//! Open streams keyed by media id.

use mediastore_common::paths::build_cache_path;
use mediastore_common::MediaId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::source::SourceFactory;
use crate::stream::MediaStream;

/// At most one live [`MediaStream`] per media id.
///
/// Streams are opened on first request and stay open until closed
/// explicitly, regardless of how many readers hold them.
pub struct StreamRegistry {
    config: Config,
    sources: Arc<dyn SourceFactory>,
    streams: Mutex<HashMap<MediaId, Arc<MediaStream>>>,
}

impl StreamRegistry {
    pub fn new(config: Config, sources: Arc<dyn SourceFactory>) -> Self {
        Self {
            config,
            sources,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn initialize(&self) {
        debug!("Stream registry initialized");
    }

    /// Close and drop every stream.
    pub fn deinitialize(&self) {
        let mut streams = self.streams.lock();
        let count = streams.len();
        for (_, stream) in streams.drain() {
            stream.close();
        }
        if count > 0 {
            info!("Closed {} open streams", count);
        }
    }

    /// Cache file a source converts into.
    pub fn cache_path(&self, source_path: &str) -> PathBuf {
        build_cache_path(
            &self.config.store.cache_dir,
            source_path,
            &self.config.store.container,
        )
    }

    /// Shared stream for `media_id`, opening it if needed.
    ///
    /// Returns `None` if the stream could not be opened; nothing is registered
    /// in that case.
    pub fn open(&self, media_id: MediaId, source_path: &str) -> Option<Arc<MediaStream>> {
        // Held across the open so concurrent callers cannot start two pipelines
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.get(&media_id) {
            return Some(Arc::clone(stream));
        }

        let stream = MediaStream::new(
            media_id,
            source_path,
            self.cache_path(source_path),
            &self.config.pipeline,
            &self.config.cache,
            Arc::clone(&self.sources),
        );
        if let Err(e) = stream.open() {
            warn!("Could not open media {}: {}", media_id, e);
            return None;
        }

        let stream = Arc::new(stream);
        streams.insert(media_id, Arc::clone(&stream));
        Some(stream)
    }

    /// Close and forget the stream of `media_id`. Returns whether one existed.
    pub fn close(&self, media_id: MediaId) -> bool {
        let mut streams = self.streams.lock();
        match streams.remove(&media_id) {
            Some(stream) => {
                stream.close();
                true
            }
            None => false,
        }
    }

    pub fn get_stream(&self, media_id: MediaId) -> Option<Arc<MediaStream>> {
        self.streams.lock().get(&media_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.deinitialize();
    }
}
