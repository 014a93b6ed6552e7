//! The catalog persistence interface.
//!
//! The scanner never talks to a database directly. It reads the last persisted
//! state through [`CatalogStore::snapshot`] and writes individual rows through
//! [`CatalogStore::insert`], [`CatalogStore::update`] and
//! [`CatalogStore::delete`]. Each of those calls is independently fallible and
//! idempotent, which lets the reconciler retry a single row without replaying
//! a whole scan.
//!
//! [`MemoryCatalog`] is the in-process implementation used by tests and by
//! short-lived tools; `shelf-store` provides a SQLite one.

use std::cmp::Ordering;
use std::fmt;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::StoreError;
use crate::natural::{natural_cmp, natural_cmp_paths};
use crate::types::{Book, BookId, Category, CategoryId};

/// One persisted row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRow {
    /// A category row.
    Category(Category),
    /// A book row.
    Book(Book),
}

impl CatalogRow {
    /// Returns the key identifying this row.
    #[must_use]
    pub fn key(&self) -> RowKey {
        match self {
            Self::Category(c) => RowKey::Category(c.id),
            Self::Book(b) => RowKey::Book(b.id),
        }
    }
}

/// Identifies a row for deletion and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    /// A category row.
    Category(CategoryId),
    /// A book row.
    Book(BookId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(id) => write!(f, "category:{id}"),
            Self::Book(id) => write!(f, "book:{id}"),
        }
    }
}

/// A child of a category, as listed by [`CatalogSnapshot::children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogChild<'a> {
    /// A nested category.
    Category(&'a Category),
    /// A book.
    Book(&'a Book),
}

/// The full set of rows as last persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Categories by id.
    pub categories: FxHashMap<CategoryId, Category>,
    /// Books by id.
    pub books: FxHashMap<BookId, Book>,
}

impl CatalogSnapshot {
    /// Builds a snapshot from row lists.
    #[must_use]
    pub fn from_rows(
        categories: impl IntoIterator<Item = Category>,
        books: impl IntoIterator<Item = Book>,
    ) -> Self {
        Self {
            categories: categories.into_iter().map(|c| (c.id, c)).collect(),
            books: books.into_iter().map(|b| (b.id, b)).collect(),
        }
    }

    /// Looks up a book.
    #[inline]
    #[must_use]
    pub fn book(&self, id: BookId) -> Option<&Book> {
        self.books.get(&id)
    }

    /// Looks up a category.
    #[inline]
    #[must_use]
    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    /// Categories without a parent, in natural name order.
    #[must_use]
    pub fn root_categories(&self) -> Vec<&Category> {
        let mut roots: Vec<_> = self.categories.values().filter(|c| c.is_root()).collect();
        roots.sort_by(|a, b| cmp_categories(a, b));
        roots
    }

    /// Books directly inside `id`, in natural order.
    #[must_use]
    pub fn books_in(&self, id: CategoryId) -> Vec<&Book> {
        let mut books: Vec<_> = self
            .books
            .values()
            .filter(|b| b.category_id == Some(id))
            .collect();
        books.sort_by(|a, b| cmp_books(a, b));
        books
    }

    /// Categories directly inside `id`, in natural order.
    #[must_use]
    pub fn child_categories(&self, id: CategoryId) -> Vec<&Category> {
        let mut cats: Vec<_> = self
            .categories
            .values()
            .filter(|c| c.parent_id == Some(id))
            .collect();
        cats.sort_by(|a, b| cmp_categories(a, b));
        cats
    }

    /// Children of `id`: categories first, then books.
    #[must_use]
    pub fn children(&self, id: CategoryId) -> Vec<CatalogChild<'_>> {
        self.child_categories(id)
            .into_iter()
            .map(CatalogChild::Category)
            .chain(self.books_in(id).into_iter().map(CatalogChild::Book))
            .collect()
    }

    /// Number of ancestors of `id` (a root has depth 0).
    ///
    /// Stops at a missing parent or after visiting every category once.
    #[must_use]
    pub fn depth(&self, id: CategoryId) -> usize {
        let mut depth = 0;
        let mut current = self.categories.get(&id).and_then(|c| c.parent_id);
        while let Some(parent) = current {
            if depth > self.categories.len() {
                break;
            }
            depth += 1;
            current = self.categories.get(&parent).and_then(|c| c.parent_id);
        }
        depth
    }

    /// Returns `true` if the snapshot holds no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.books.is_empty()
    }
}

pub(crate) fn cmp_categories(a: &Category, b: &Category) -> Ordering {
    natural_cmp(&a.name, &b.name).then_with(|| a.path.cmp(&b.path))
}

pub(crate) fn cmp_books(a: &Book, b: &Book) -> Ordering {
    natural_cmp_paths(&a.path, &b.path).then_with(|| a.path.cmp(&b.path))
}

/// Tabular persistence for categories, books and favorites.
///
/// # Contract
///
/// - `insert` is an upsert. A book whose category is missing, or a category
///   whose parent is missing, is a [`StoreError::Conflict`].
/// - `update` replaces an existing row and keeps store-owned state (the
///   favorite flag). Updating a missing row is [`StoreError::NotFound`].
/// - `delete` of a missing row succeeds. Deleting a book also removes it from
///   favorites. Deleting a category that still has children is a
///   [`StoreError::Conflict`].
/// - List queries return rows in natural order.
pub trait CatalogStore: Send + Sync {
    /// Returns every persisted row.
    fn snapshot(&self) -> Result<CatalogSnapshot, StoreError>;

    /// Inserts or replaces a row.
    fn insert(&self, row: &CatalogRow) -> Result<(), StoreError>;

    /// Replaces an existing row in place.
    fn update(&self, row: &CatalogRow) -> Result<(), StoreError>;

    /// Removes a row.
    fn delete(&self, key: RowKey) -> Result<(), StoreError>;

    /// Looks up a book.
    fn book(&self, id: BookId) -> Result<Option<Book>, StoreError>;

    /// Looks up a category.
    fn category(&self, id: CategoryId) -> Result<Option<Category>, StoreError>;

    /// Books directly inside a category.
    fn books_in_category(&self, id: CategoryId) -> Result<Vec<Book>, StoreError>;

    /// Categories directly inside a category.
    fn child_categories(&self, id: CategoryId) -> Result<Vec<Category>, StoreError>;

    /// Categories without a parent.
    fn root_categories(&self) -> Result<Vec<Category>, StoreError>;

    /// Marks or unmarks a book as favorite.
    fn set_favorite(&self, id: BookId, favorite: bool) -> Result<(), StoreError>;

    /// All favorite book ids.
    fn favorites(&self) -> Result<Vec<BookId>, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    snapshot: CatalogSnapshot,
    favorites: FxHashSet<BookId>,
}

/// An in-memory [`CatalogStore`].
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use shelf_core::{CatalogRow, CatalogStore, Category, MemoryCatalog};
///
/// let store = MemoryCatalog::new();
/// let root = Category::new(Utf8Path::new("/books"), None);
/// store.insert(&CatalogRow::Category(root.clone())).unwrap();
///
/// assert_eq!(store.root_categories().unwrap(), vec![root]);
/// ```
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: RwLock<MemoryInner>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog pre-populated with `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                snapshot,
                favorites: FxHashSet::default(),
            }),
        }
    }
}

fn check_parent(snapshot: &CatalogSnapshot, row: &CatalogRow) -> Result<(), StoreError> {
    let (parent, what) = match row {
        CatalogRow::Category(c) => (c.parent_id, "parent category does not exist"),
        CatalogRow::Book(b) => (b.category_id, "category does not exist"),
    };
    match parent {
        Some(id) if !snapshot.categories.contains_key(&id) => {
            Err(StoreError::conflict(row.key(), what))
        }
        _ => Ok(()),
    }
}

fn put(snapshot: &mut CatalogSnapshot, row: &CatalogRow) {
    match row {
        CatalogRow::Category(c) => {
            snapshot.categories.insert(c.id, c.clone());
        }
        CatalogRow::Book(b) => {
            snapshot.books.insert(b.id, b.clone());
        }
    }
}

impl CatalogStore for MemoryCatalog {
    fn snapshot(&self) -> Result<CatalogSnapshot, StoreError> {
        Ok(self.inner.read().snapshot.clone())
    }

    fn insert(&self, row: &CatalogRow) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        check_parent(&inner.snapshot, row)?;
        put(&mut inner.snapshot, row);
        Ok(())
    }

    fn update(&self, row: &CatalogRow) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let exists = match row {
            CatalogRow::Category(c) => inner.snapshot.categories.contains_key(&c.id),
            CatalogRow::Book(b) => inner.snapshot.books.contains_key(&b.id),
        };
        if !exists {
            return Err(StoreError::NotFound(row.key().to_string()));
        }
        check_parent(&inner.snapshot, row)?;
        put(&mut inner.snapshot, row);
        Ok(())
    }

    fn delete(&self, key: RowKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        match key {
            RowKey::Book(id) => {
                inner.snapshot.books.remove(&id);
                inner.favorites.remove(&id);
            }
            RowKey::Category(id) => {
                let snapshot = &inner.snapshot;
                let has_children = snapshot.books.values().any(|b| b.category_id == Some(id))
                    || snapshot.categories.values().any(|c| c.parent_id == Some(id));
                if has_children {
                    return Err(StoreError::conflict(key, "category still has children"));
                }
                inner.snapshot.categories.remove(&id);
            }
        }
        Ok(())
    }

    fn book(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        Ok(self.inner.read().snapshot.book(id).cloned())
    }

    fn category(&self, id: CategoryId) -> Result<Option<Category>, StoreError> {
        Ok(self.inner.read().snapshot.category(id).cloned())
    }

    fn books_in_category(&self, id: CategoryId) -> Result<Vec<Book>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.snapshot.books_in(id).into_iter().cloned().collect())
    }

    fn child_categories(&self, id: CategoryId) -> Result<Vec<Category>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .snapshot
            .child_categories(id)
            .into_iter()
            .cloned()
            .collect())
    }

    fn root_categories(&self) -> Result<Vec<Category>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .snapshot
            .root_categories()
            .into_iter()
            .cloned()
            .collect())
    }

    fn set_favorite(&self, id: BookId, favorite: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.snapshot.books.contains_key(&id) {
            return Err(StoreError::NotFound(RowKey::Book(id).to_string()));
        }
        if favorite {
            inner.favorites.insert(id);
        } else {
            inner.favorites.remove(&id);
        }
        Ok(())
    }

    fn favorites(&self) -> Result<Vec<BookId>, StoreError> {
        let mut ids: Vec<_> = self.inner.read().favorites.iter().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
