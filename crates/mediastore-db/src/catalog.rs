//! The pinned-media catalog.
//!
//! [`MediaCatalog`] keeps the id <-> path mapping in memory and writes every
//! mutation through a [`CatalogStore`]. Ids come from a monotonically
//! increasing counter that is persisted alongside the records, so an id is
//! never handed out twice, even across unpins and restarts.

use mediastore_common::{Error, MediaId, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::models::{CatalogSnapshot, MediaRecord};
use crate::pool::{get_conn, init_memory_pool, init_pool, DbPool};
use crate::queries::pinned_media;

/// Durable backing for the catalog.
pub trait CatalogStore: Send + Sync {
    /// Read the full persisted state.
    fn load(&self) -> Result<CatalogSnapshot>;

    /// Replace the persisted state with `snapshot`.
    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()>;

    /// Persist one new record together with the new id high-water mark.
    fn insert(&self, record: &MediaRecord, max_media_id: MediaId) -> Result<()>;

    /// Remove one record.
    fn remove(&self, media_id: MediaId) -> Result<()>;
}

/// SQLite-backed catalog store.
pub struct SqliteCatalogStore {
    pool: DbPool,
}

impl SqliteCatalogStore {
    /// Open (or create) the catalog database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            pool: init_pool(db_path)?,
        })
    }

    /// Catalog database that lives only as long as this store.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            pool: init_memory_pool()?,
        })
    }

    /// Wrap an existing pool. Migrations must already have run.
    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn load(&self) -> Result<CatalogSnapshot> {
        let conn = get_conn(&self.pool)?;
        Ok(CatalogSnapshot {
            max_media_id: pinned_media::max_media_id(&conn)?,
            records: pinned_media::list(&conn)?,
        })
    }

    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        pinned_media::delete_all(&tx)?;
        for record in &snapshot.records {
            pinned_media::insert(&tx, record)?;
        }
        pinned_media::set_max_media_id(&tx, snapshot.max_media_id)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))
    }

    fn insert(&self, record: &MediaRecord, max_media_id: MediaId) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        pinned_media::insert(&tx, record)?;
        pinned_media::set_max_media_id(&tx, max_media_id)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))
    }

    fn remove(&self, media_id: MediaId) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        pinned_media::delete(&conn, media_id)?;
        Ok(())
    }
}

/// Non-durable catalog store.
#[derive(Default)]
pub struct MemoryCatalogStore {
    state: Mutex<CatalogSnapshot>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn load(&self) -> Result<CatalogSnapshot> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        *self.state.lock() = snapshot.clone();
        Ok(())
    }

    fn insert(&self, record: &MediaRecord, max_media_id: MediaId) -> Result<()> {
        let mut state = self.state.lock();
        state.records.push(record.clone());
        state.records.sort_by_key(|r| r.media_id);
        state.max_media_id = state.max_media_id.max(max_media_id);
        Ok(())
    }

    fn remove(&self, media_id: MediaId) -> Result<()> {
        self.state.lock().records.retain(|r| r.media_id != media_id);
        Ok(())
    }
}

#[derive(Default)]
struct CatalogState {
    by_id: BTreeMap<MediaId, MediaRecord>,
    by_path: HashMap<String, MediaId>,
    max_media_id: MediaId,
}

impl CatalogState {
    fn insert(&mut self, record: MediaRecord) {
        self.by_path.insert(record.path.clone(), record.media_id);
        self.by_id.insert(record.media_id, record);
    }

    fn remove(&mut self, media_id: MediaId) -> Option<MediaRecord> {
        let record = self.by_id.remove(&media_id)?;
        self.by_path.remove(&record.path);
        Some(record)
    }
}

/// Id <-> path mapping of pinned media.
pub struct MediaCatalog {
    state: Mutex<CatalogState>,
    store: Box<dyn CatalogStore>,
}

impl MediaCatalog {
    /// Empty catalog over `store`. Call [`load`](Self::load) to restore state.
    pub fn new(store: impl CatalogStore + 'static) -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            store: Box::new(store),
        }
    }

    /// Catalog backed by a [`MemoryCatalogStore`].
    pub fn in_memory() -> Self {
        Self::new(MemoryCatalogStore::new())
    }

    /// Restore the mapping from the store, replacing the in-memory state.
    pub fn load(&self) -> Result<usize> {
        let snapshot = self.store.load()?;

        let mut state = CatalogState::default();
        let highest_record = snapshot
            .records
            .iter()
            .map(|r| r.media_id)
            .max()
            .unwrap_or(MediaId::NONE);
        state.max_media_id = snapshot.max_media_id.max(highest_record);
        for record in snapshot.records {
            state.insert(record);
        }

        let count = state.by_id.len();
        *self.state.lock() = state;

        tracing::debug!(count, "Loaded media catalog");
        Ok(count)
    }

    /// Durably write the full mapping.
    pub fn save(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.lock();
            CatalogSnapshot {
                max_media_id: state.max_media_id,
                records: state.by_id.values().cloned().collect(),
            }
        };
        self.store.save(&snapshot)
    }

    /// Pin `path`, returning its id.
    ///
    /// Pinning an already pinned path returns the existing id without touching
    /// the store. A new id is only kept if persisting it succeeded.
    pub fn pin(&self, path: &str) -> Result<MediaId> {
        if path.is_empty() {
            return Err(Error::invalid_input("cannot pin an empty path"));
        }

        let mut state = self.state.lock();
        if let Some(&media_id) = state.by_path.get(path) {
            return Ok(media_id);
        }

        let previous_max = state.max_media_id;
        let Some(media_id) = previous_max.next() else {
            return Err(Error::internal("media id space exhausted"));
        };
        let record = MediaRecord::new(media_id, path);
        state.insert(record.clone());
        state.max_media_id = media_id;

        if let Err(e) = self.store.insert(&record, media_id) {
            state.remove(media_id);
            state.max_media_id = previous_max;
            tracing::warn!(path, error = %e, "Failed to persist pinned media");
            return Err(e);
        }

        tracing::debug!(%media_id, path, "Pinned media");
        Ok(media_id)
    }

    /// Unpin by id. Returns `false` if the id was not pinned.
    pub fn unpin(&self, media_id: MediaId) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(record) = state.remove(media_id) else {
            return Ok(false);
        };

        if let Err(e) = self.store.remove(media_id) {
            state.insert(record);
            return Err(e);
        }

        tracing::debug!(%media_id, path = %record.path, "Unpinned media");
        Ok(true)
    }

    /// Unpin by source path. Returns `false` if the path was not pinned.
    pub fn unpin_path(&self, path: &str) -> Result<bool> {
        match self.id_of(path) {
            Some(media_id) => self.unpin(media_id),
            None => Ok(false),
        }
    }

    /// Check whether `media_id` is pinned.
    pub fn is_pinned(&self, media_id: MediaId) -> bool {
        self.state.lock().by_id.contains_key(&media_id)
    }

    /// Check whether `path` is pinned.
    pub fn is_path_pinned(&self, path: &str) -> bool {
        self.state.lock().by_path.contains_key(path)
    }

    /// Source path pinned under `media_id`.
    pub fn path_of(&self, media_id: MediaId) -> Option<String> {
        self.state
            .lock()
            .by_id
            .get(&media_id)
            .map(|r| r.path.clone())
    }

    /// Id `path` is pinned under.
    pub fn id_of(&self, path: &str) -> Option<MediaId> {
        self.state.lock().by_path.get(path).copied()
    }

    /// Record pinned under `media_id`.
    pub fn record(&self, media_id: MediaId) -> Option<MediaRecord> {
        self.state.lock().by_id.get(&media_id).cloned()
    }

    /// Snapshot of all records, sorted by id.
    pub fn records(&self) -> Vec<MediaRecord> {
        self.state.lock().by_id.values().cloned().collect()
    }

    /// Number of pinned items.
    pub fn len(&self) -> usize {
        self.state.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
