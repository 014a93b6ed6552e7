//! [`CatalogStore`] on SQLite.

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use shelf_core::{
    natural_cmp, natural_cmp_paths, Book, BookId, CatalogRow, CatalogSnapshot, CatalogStore,
    Category, CategoryId, RowKey, StoreError,
};
use tracing::{debug, info};

use crate::rows::{self, BookRecord, BookValues, CategoryRecord, BOOK_COLUMNS, CATEGORY_COLUMNS};
use crate::schema;

/// A catalog persisted in a single SQLite database.
///
/// All access goes through one connection behind a mutex; row operations are
/// single statements, so each one is atomic on its own.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use shelf_core::{CatalogRow, CatalogStore, Category};
/// use shelf_store::SqliteCatalog;
///
/// let store = SqliteCatalog::open_in_memory()?;
/// let root = Category::new(Utf8Path::new("/books"), None);
/// store.insert(&CatalogRow::Category(root.clone()))?;
///
/// assert_eq!(store.root_categories()?, vec![root]);
/// # Ok::<(), shelf_core::StoreError>(())
/// ```
#[derive(Debug)]
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
    path: Option<Utf8PathBuf>,
}

impl SqliteCatalog {
    /// Opens or creates a catalog database at `path`.
    ///
    /// Missing parent directories are created.
    pub fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
            }
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::backend)?;
        let store = Self::with_connection(conn, Some(path.to_owned()))?;
        info!(path = %path, "Catalog database opened");
        Ok(store)
    }

    /// Opens a private in-memory catalog.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, path: Option<Utf8PathBuf>) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StoreError::backend)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, `None` for an in-memory catalog.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    fn upsert(conn: &Connection, row: &CatalogRow) -> Result<usize, StoreError> {
        let result = match row {
            CatalogRow::Category(c) => conn.execute(
                "INSERT INTO categories (id, name, path, parent_id) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    path = excluded.path,
                    parent_id = excluded.parent_id",
                params![
                    c.id.to_string(),
                    c.name,
                    c.path.as_str(),
                    c.parent_id.map(|id| id.to_string()),
                ],
            ),
            CatalogRow::Book(b) => {
                let v = BookValues::new(b)?;
                conn.execute(
                    "INSERT INTO books (id, title, path, category_id, kind, pages, page_count,
                        cover, fingerprint, width, height, strategy, state, last_scanned)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                     ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        path = excluded.path,
                        category_id = excluded.category_id,
                        kind = excluded.kind,
                        pages = excluded.pages,
                        page_count = excluded.page_count,
                        cover = excluded.cover,
                        fingerprint = excluded.fingerprint,
                        width = excluded.width,
                        height = excluded.height,
                        strategy = excluded.strategy,
                        state = excluded.state,
                        last_scanned = excluded.last_scanned",
                    params![
                        v.id,
                        v.title,
                        v.path,
                        v.category_id,
                        v.kind,
                        v.pages,
                        v.page_count,
                        v.cover,
                        v.fingerprint,
                        v.width,
                        v.height,
                        v.strategy,
                        v.state,
                        v.last_scanned,
                    ],
                )
            }
        };
        result.map_err(StoreError::backend)
    }
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, StoreError> {
    conn.query_row(
        &format!("SELECT 1 FROM {table} WHERE id = ?1"),
        params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(StoreError::backend)
}

fn check_parent(conn: &Connection, row: &CatalogRow) -> Result<(), StoreError> {
    let (parent, what) = match row {
        CatalogRow::Category(c) => (c.parent_id, "parent category does not exist"),
        CatalogRow::Book(b) => (b.category_id, "category does not exist"),
    };
    match parent {
        Some(id) if !exists(conn, "categories", &id.to_string())? => {
            Err(StoreError::conflict(row.key(), what))
        }
        _ => Ok(()),
    }
}

fn query_categories(
    conn: &Connection,
    filter: &str,
    arg: Option<String>,
) -> Result<Vec<Category>, StoreError> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories {filter}");
    let mut stmt = conn.prepare(&sql).map_err(StoreError::backend)?;
    let records = match arg {
        Some(arg) => stmt.query_map(params![arg], CategoryRecord::from_row),
        None => stmt.query_map([], CategoryRecord::from_row),
    }
    .map_err(StoreError::backend)?
    .collect::<Result<Vec<_>, _>>()
    .map_err(StoreError::backend)?;

    let mut categories = records
        .into_iter()
        .map(CategoryRecord::into_category)
        .collect::<Result<Vec<_>, _>>()?;
    categories.sort_by(|a, b| natural_cmp(&a.name, &b.name).then_with(|| a.path.cmp(&b.path)));
    Ok(categories)
}

fn query_books(conn: &Connection, filter: &str, arg: Option<String>) -> Result<Vec<Book>, StoreError> {
    let sql = format!("SELECT {BOOK_COLUMNS} FROM books {filter}");
    let mut stmt = conn.prepare(&sql).map_err(StoreError::backend)?;
    let records = match arg {
        Some(arg) => stmt.query_map(params![arg], BookRecord::from_row),
        None => stmt.query_map([], BookRecord::from_row),
    }
    .map_err(StoreError::backend)?
    .collect::<Result<Vec<_>, _>>()
    .map_err(StoreError::backend)?;

    let mut books = records
        .into_iter()
        .map(BookRecord::into_book)
        .collect::<Result<Vec<_>, _>>()?;
    books.sort_by(|a, b| natural_cmp_paths(&a.path, &b.path).then_with(|| a.path.cmp(&b.path)));
    Ok(books)
}

impl CatalogStore for SqliteCatalog {
    fn snapshot(&self) -> Result<CatalogSnapshot, StoreError> {
        let conn = self.conn.lock();
        let categories = query_categories(&conn, "", None)?;
        let books = query_books(&conn, "", None)?;
        debug!(
            categories = categories.len(),
            books = books.len(),
            "Catalog snapshot read"
        );
        Ok(CatalogSnapshot::from_rows(categories, books))
    }

    fn insert(&self, row: &CatalogRow) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        check_parent(&conn, row)?;
        Self::upsert(&conn, row)?;
        Ok(())
    }

    fn update(&self, row: &CatalogRow) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let (table, id) = match row {
            CatalogRow::Category(c) => ("categories", c.id.to_string()),
            CatalogRow::Book(b) => ("books", b.id.to_string()),
        };
        if !exists(&conn, table, &id)? {
            return Err(StoreError::NotFound(row.key().to_string()));
        }
        check_parent(&conn, row)?;
        // ON CONFLICT DO UPDATE keeps the row, so favorites survive.
        Self::upsert(&conn, row)?;
        Ok(())
    }

    fn delete(&self, key: RowKey) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        match key {
            RowKey::Book(id) => {
                conn.execute("DELETE FROM books WHERE id = ?1", params![id.to_string()])
                    .map_err(StoreError::backend)?;
            }
            RowKey::Category(id) => {
                let id = id.to_string();
                let children: i64 = conn
                    .query_row(
                        "SELECT (SELECT COUNT(*) FROM books WHERE category_id = ?1)
                              + (SELECT COUNT(*) FROM categories WHERE parent_id = ?1)",
                        params![id],
                        |row| row.get(0),
                    )
                    .map_err(StoreError::backend)?;
                if children > 0 {
                    return Err(StoreError::conflict(key, "category still has children"));
                }
                conn.execute("DELETE FROM categories WHERE id = ?1", params![id])
                    .map_err(StoreError::backend)?;
            }
        }
        Ok(())
    }

    fn book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        let conn = self.conn.lock();
        Ok(query_books(&conn, "WHERE id = ?1", Some(id.to_string()))?
            .into_iter()
            .next())
    }

    fn category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        let conn = self.conn.lock();
        Ok(query_categories(&conn, "WHERE id = ?1", Some(id.to_string()))?
            .into_iter()
            .next())
    }

    fn books_in_category(&self, id: CategoryId) -> Result<Vec<Book>, StoreError> {
        let conn = self.conn.lock();
        query_books(&conn, "WHERE category_id = ?1", Some(id.to_string()))
    }

    fn child_categories(&self, id: CategoryId) -> Result<Vec<Category>, StoreError> {
        let conn = self.conn.lock();
        query_categories(&conn, "WHERE parent_id = ?1", Some(id.to_string()))
    }

    fn root_categories(&self) -> Result<Vec<Category>, StoreError> {
        let conn = self.conn.lock();
        query_categories(&conn, "WHERE parent_id IS NULL", None)
    }

    fn set_favorite(&self, id: BookId, favorite: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let id_text = id.to_string();
        if !exists(&conn, "books", &id_text)? {
            return Err(StoreError::NotFound(RowKey::Book(id).to_string()));
        }
        let sql = if favorite {
            "INSERT OR IGNORE INTO favorites (book_id) VALUES (?1)"
        } else {
            "DELETE FROM favorites WHERE book_id = ?1"
        };
        conn.execute(sql, params![id_text])
            .map_err(StoreError::backend)?;
        debug!(book = %id, favorite, "Favorite updated");
        Ok(())
    }

    fn favorites(&self) -> Result<Vec<BookId>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT book_id FROM favorites")
            .map_err(StoreError::backend)?;
        let mut ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?
            .iter()
            .map(|s| rows::book_id(s))
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use shelf_core::SourceKind;

    use super::*;

    fn root() -> Category {
        Category::new(Utf8Path::new("/lib"), None)
    }

    fn book_in(category: &Category, name: &str) -> Book {
        let mut book = Book::new(&category.path.join(name), name, SourceKind::Pdf);
        book.category_id = Some(category.id);
        book
    }

    #[test]
    fn test_schema_is_idempotent() {
        let store = SqliteCatalog::open_in_memory().unwrap();
        let conn = store.conn.lock();
        schema::initialize(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_update_keeps_favorite() {
        let store = SqliteCatalog::open_in_memory().unwrap();
        let r = root();
        let mut book = book_in(&r, "a.pdf");
        store.insert(&CatalogRow::Category(r)).unwrap();
        store.insert(&CatalogRow::Book(book.clone())).unwrap();
        store.set_favorite(book.id, true).unwrap();

        book.title = "Retitled".to_owned();
        store.update(&CatalogRow::Book(book.clone())).unwrap();
        // Re-inserting is an upsert too.
        store.insert(&CatalogRow::Book(book.clone())).unwrap();

        assert_eq!(store.favorites().unwrap(), vec![book.id]);
        assert_eq!(store.book(book.id).unwrap().unwrap().title, "Retitled");
    }

    #[test]
    fn test_category_lookup_and_delete() {
        let store = SqliteCatalog::open_in_memory().unwrap();
        let r = root();
        store.insert(&CatalogRow::Category(r.clone())).unwrap();
        assert_eq!(store.category(r.id).unwrap(), Some(r.clone()));

        store.delete(RowKey::Category(r.id)).unwrap();
        assert_eq!(store.category(r.id).unwrap(), None);
    }
}
