//! Column encoding for books and categories.
//!
//! Ids and fingerprints are stored as their canonical strings, enums as
//! lowercase labels, and the structured fields (pages, cover key, state) as
//! JSON text.

use camino::Utf8PathBuf;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shelf_core::{
    Book, BookId, Category, OptimizationStrategy, PageDimensions, SourceKind,
    StoreError,
};

pub const CATEGORY_COLUMNS: &str = "id, name, path, parent_id";

pub const BOOK_COLUMNS: &str = "id, title, path, category_id, kind, pages, page_count, cover, \
     fingerprint, width, height, strategy, state, last_scanned";

/// A category row as read from SQLite.
#[derive(Debug)]
pub struct CategoryRecord {
    id: String,
    name: String,
    path: String,
    parent_id: Option<String>,
}

impl CategoryRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            path: row.get(2)?,
            parent_id: row.get(3)?,
        })
    }

    pub fn into_category(self) -> Result<Category, StoreError> {
        Ok(Category {
            id: parse_id(&self.id)?,
            name: self.name,
            path: Utf8PathBuf::from(self.path),
            parent_id: self.parent_id.as_deref().map(parse_id).transpose()?,
        })
    }
}

/// A book row as read from SQLite.
#[derive(Debug)]
pub struct BookRecord {
    id: String,
    title: String,
    path: String,
    category_id: Option<String>,
    kind: String,
    pages: String,
    page_count: Option<i64>,
    cover: Option<String>,
    fingerprint: String,
    width: i64,
    height: i64,
    strategy: String,
    state: String,
    last_scanned: i64,
}

impl BookRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            path: row.get(2)?,
            category_id: row.get(3)?,
            kind: row.get(4)?,
            pages: row.get(5)?,
            page_count: row.get(6)?,
            cover: row.get(7)?,
            fingerprint: row.get(8)?,
            width: row.get(9)?,
            height: row.get(10)?,
            strategy: row.get(11)?,
            state: row.get(12)?,
            last_scanned: row.get(13)?,
        })
    }

    pub fn into_book(self) -> Result<Book, StoreError> {
        Ok(Book {
            id: parse_id(&self.id)?,
            title: self.title,
            path: Utf8PathBuf::from(self.path),
            category_id: self.category_id.as_deref().map(parse_id).transpose()?,
            kind: parse_kind(&self.kind)?,
            pages: from_json(&self.pages)?,
            page_count: self.page_count.map(to_u32).transpose()?,
            cover: self.cover.as_deref().map(from_json).transpose()?,
            fingerprint: self
                .fingerprint
                .parse()
                .map_err(|e| corrupt("fingerprint", e))?,
            dimensions: PageDimensions::new(to_u32(self.width)?, to_u32(self.height)?),
            strategy: parse_strategy(&self.strategy)?,
            state: from_json(&self.state)?,
            last_scanned: u64::try_from(self.last_scanned).unwrap_or(0),
        })
    }
}

/// Column values for a book insert or update, in [`BOOK_COLUMNS`] order.
pub struct BookValues {
    pub id: String,
    pub title: String,
    pub path: String,
    pub category_id: Option<String>,
    pub kind: &'static str,
    pub pages: String,
    pub page_count: Option<i64>,
    pub cover: Option<String>,
    pub fingerprint: String,
    pub width: i64,
    pub height: i64,
    pub strategy: &'static str,
    pub state: String,
    pub last_scanned: i64,
}

impl BookValues {
    pub fn new(book: &Book) -> Result<Self, StoreError> {
        Ok(Self {
            id: book.id.to_string(),
            title: book.title.clone(),
            path: book.path.to_string(),
            category_id: book.category_id.map(|id| id.to_string()),
            kind: book.kind.as_str(),
            pages: to_json(&book.pages)?,
            page_count: book.page_count.map(i64::from),
            cover: book.cover.as_ref().map(to_json).transpose()?,
            fingerprint: book.fingerprint.to_hex(),
            width: i64::from(book.dimensions.width),
            height: i64::from(book.dimensions.height),
            strategy: strategy_label(book.strategy),
            state: to_json(&book.state)?,
            last_scanned: i64::try_from(book.last_scanned).unwrap_or(i64::MAX),
        })
    }
}

pub fn parse_id<T>(s: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.parse().map_err(|e| corrupt("id", e))
}

pub fn book_id(s: &str) -> Result<BookId, StoreError> {
    parse_id(s)
}

fn parse_kind(s: &str) -> Result<SourceKind, StoreError> {
    match s {
        "image_set" => Ok(SourceKind::ImageSet),
        "pdf" => Ok(SourceKind::Pdf),
        other => Err(corrupt("kind", other)),
    }
}

const fn strategy_label(strategy: OptimizationStrategy) -> &'static str {
    match strategy {
        OptimizationStrategy::Unknown => "unknown",
        OptimizationStrategy::Original => "original",
        OptimizationStrategy::Optimize => "optimize",
    }
}

fn parse_strategy(s: &str) -> Result<OptimizationStrategy, StoreError> {
    match s {
        "unknown" => Ok(OptimizationStrategy::Unknown),
        "original" => Ok(OptimizationStrategy::Original),
        "optimize" => Ok(OptimizationStrategy::Optimize),
        other => Err(corrupt("strategy", other)),
    }
}

fn to_u32(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|e| corrupt("integer", e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(StoreError::backend)
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| corrupt("json", e))
}

fn corrupt(column: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {column} column: {detail}"))
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;
    use shelf_core::{BookState, Fingerprint, Page, ThumbKey};

    use super::*;

    #[test]
    fn test_labels_roundtrip() {
        for strategy in [
            OptimizationStrategy::Unknown,
            OptimizationStrategy::Original,
            OptimizationStrategy::Optimize,
        ] {
            assert_eq!(parse_strategy(strategy_label(strategy)).unwrap(), strategy);
        }
        for kind in [SourceKind::ImageSet, SourceKind::Pdf] {
            assert_eq!(parse_kind(kind.as_str()).unwrap(), kind);
        }
        assert!(parse_kind("epub").is_err());
    }

    #[test]
    fn test_json_columns() {
        let mut book = Book::new(Utf8Path::new("/lib/Vol 1"), "Vol 1", SourceKind::ImageSet);
        book.pages.push(Page::Image {
            path: "/lib/Vol 1/01.jpg".into(),
        });
        book.cover = Some(ThumbKey::new(Fingerprint::from_bytes([4; 32]), 300));
        book.state = BookState::Degraded {
            reason: "bad xref".to_owned(),
        };

        let values = BookValues::new(&book).unwrap();
        assert_eq!(values.kind, "image_set");
        assert!(values.pages.contains("01.jpg"));
        assert!(values.state.contains("degraded"));
        assert_eq!(from_json::<Vec<Page>>(&values.pages).unwrap(), book.pages);
    }
}
