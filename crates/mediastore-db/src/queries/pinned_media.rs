//! Pinned media queries.
//!
//! One row per pinned source. `media_id` and `path` are both unique, giving the
//! id <-> path bijection the catalog relies on.

use chrono::{DateTime, Utc};
use mediastore_common::{Error, MediaId, Result};
use rusqlite::{params, Connection, Row};

use crate::models::MediaRecord;

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let pinned_at: String = row.get(2)?;
    let pinned_at = DateTime::parse_from_rfc3339(&pinned_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(MediaRecord {
        media_id: MediaId::new(row.get::<_, u32>(0)?),
        path: row.get(1)?,
        pinned_at,
    })
}

/// Insert a pinned record.
pub fn insert(conn: &Connection, record: &MediaRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO pinned_media (media_id, path, pinned_at) VALUES (?1, ?2, ?3)",
        params![
            record.media_id.get(),
            record.path,
            record.pinned_at.to_rfc3339()
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Get a record by id.
pub fn get_by_id(conn: &Connection, media_id: MediaId) -> Result<Option<MediaRecord>> {
    match conn.query_row(
        "SELECT media_id, path, pinned_at FROM pinned_media WHERE media_id = ?1",
        params![media_id.get()],
        row_to_record,
    ) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a record by source path.
pub fn get_by_path(conn: &Connection, path: &str) -> Result<Option<MediaRecord>> {
    match conn.query_row(
        "SELECT media_id, path, pinned_at FROM pinned_media WHERE path = ?1",
        params![path],
        row_to_record,
    ) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List all records ordered by id.
pub fn list(conn: &Connection) -> Result<Vec<MediaRecord>> {
    let mut stmt = conn
        .prepare("SELECT media_id, path, pinned_at FROM pinned_media ORDER BY media_id")
        .map_err(|e| Error::database(e.to_string()))?;

    let records = stmt
        .query_map([], row_to_record)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(records)
}

/// Delete a record. Returns whether a row was removed.
pub fn delete(conn: &Connection, media_id: MediaId) -> Result<bool> {
    let affected = conn
        .execute(
            "DELETE FROM pinned_media WHERE media_id = ?1",
            params![media_id.get()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected > 0)
}

/// Delete every record. Returns the number of rows removed.
pub fn delete_all(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM pinned_media", [])
        .map_err(|e| Error::database(e.to_string()))
}

/// Highest id ever assigned.
pub fn max_media_id(conn: &Connection) -> Result<MediaId> {
    match conn.query_row(
        "SELECT value FROM catalog_meta WHERE key = 'max_media_id'",
        [],
        |row| row.get::<_, u32>(0),
    ) {
        Ok(value) => Ok(MediaId::new(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(MediaId::NONE),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Persist the highest id ever assigned.
pub fn set_max_media_id(conn: &Connection, media_id: MediaId) -> Result<()> {
    conn.execute(
        "INSERT INTO catalog_meta (key, value) VALUES ('max_media_id', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![media_id.get()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}
