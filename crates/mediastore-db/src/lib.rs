//! Mediastore-DB: catalog persistence for pinned media.
//!
//! SQLite via rusqlite with r2d2 connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//! - `catalog` - The in-memory id <-> path catalog and its durable stores
//!
//! # Example
//!
//! ```no_run
//! use mediastore_db::catalog::{MediaCatalog, SqliteCatalogStore};
//!
//! let store = SqliteCatalogStore::open("/var/lib/mediastore/catalog.db").unwrap();
//! let catalog = MediaCatalog::new(store);
//! catalog.load().unwrap();
//!
//! let id = catalog.pin("/media/show.ts").unwrap();
//! println!("Pinned as {}", id.store_path());
//! ```

pub mod catalog;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;

pub use catalog::{CatalogStore, MediaCatalog, MemoryCatalogStore, SqliteCatalogStore};
pub use models::{CatalogSnapshot, MediaRecord};
