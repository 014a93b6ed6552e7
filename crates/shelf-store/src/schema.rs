//! Table layout and migrations.

use rusqlite::Connection;
use shelf_core::StoreError;
use tracing::{debug, info};

/// Version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    path        TEXT NOT NULL,
    parent_id   TEXT REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS books (
    id            TEXT PRIMARY KEY,
    title         TEXT NOT NULL,
    path          TEXT NOT NULL,
    category_id   TEXT REFERENCES categories(id),
    kind          TEXT NOT NULL,
    pages         TEXT NOT NULL,
    page_count    INTEGER,
    cover         TEXT,
    fingerprint   TEXT NOT NULL,
    width         INTEGER NOT NULL,
    height        INTEGER NOT NULL,
    strategy      TEXT NOT NULL,
    state         TEXT NOT NULL,
    last_scanned  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS favorites (
    book_id     TEXT PRIMARY KEY REFERENCES books(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_books_category ON books(category_id);
CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);
";

/// Creates the tables on a fresh database and checks the version of an
/// existing one.
pub fn initialize(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StoreError::backend)?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::Backend(format!(
            "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    conn.execute_batch(CREATE).map_err(StoreError::backend)?;
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(StoreError::backend)?;
        info!(from = version, to = SCHEMA_VERSION, "Catalog schema initialized");
    } else {
        debug!(version, "Catalog schema up to date");
    }
    Ok(())
}
