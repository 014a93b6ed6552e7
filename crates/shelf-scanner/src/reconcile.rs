//! Catalog reconciliation.
//!
//! [`reconcile`] diffs the persisted [`CatalogSnapshot`] against the rows a
//! scan produced and returns a [`ReconcilePlan`]; [`apply`] writes the plan to
//! a [`CatalogStore`].
//!
//! # Plan order
//!
//! 1. Category upserts, parents first
//! 2. Book upserts
//! 3. Book deletes
//! 4. Category deletes, deepest first
//!
//! Every operation is idempotent on its own. A failed operation is retried
//! once and then reported as [`ScanError::ReconciliationConflict`]; the rest
//! of the plan still runs.

use rustc_hash::FxHashSet;
use shelf_core::{
    Book, BookId, CatalogRow, CatalogSnapshot, CatalogStore, Category, CategoryId, RowKey,
    StoreError, ThumbKey,
};
use tracing::{debug, info, warn};

use crate::cache::ThumbnailStore;
use crate::error::ScanError;

/// One row operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    /// A category seen for the first time.
    InsertCategory(Category),
    /// A category whose name or parent changed.
    UpdateCategory(Category),
    /// A book seen for the first time.
    InsertBook(Box<Book>),
    /// A book whose content changed.
    UpdateBook(Box<Book>),
    /// A book no longer on disk, plus its cached cover.
    DeleteBook {
        /// The removed book.
        id: BookId,
        /// Its cover key, dropped from the thumbnail cache.
        cover: Option<ThumbKey>,
    },
    /// A category no longer on disk.
    DeleteCategory(CategoryId),
}

impl PlannedOp {
    /// The row this operation touches.
    #[must_use]
    pub fn key(&self) -> RowKey {
        match self {
            Self::InsertCategory(c) | Self::UpdateCategory(c) => RowKey::Category(c.id),
            Self::InsertBook(b) | Self::UpdateBook(b) => RowKey::Book(b.id),
            Self::DeleteBook { id, .. } => RowKey::Book(*id),
            Self::DeleteCategory(id) => RowKey::Category(*id),
        }
    }

    /// Returns `true` for deletes.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteBook { .. } | Self::DeleteCategory(_))
    }
}

/// An ordered list of row operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Operations in application order.
    pub ops: Vec<PlannedOp>,
}

impl ReconcilePlan {
    /// Returns `true` if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of inserts.
    #[must_use]
    pub fn inserts(&self) -> usize {
        self.count(|op| matches!(op, PlannedOp::InsertCategory(_) | PlannedOp::InsertBook(_)))
    }

    /// Number of updates.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.count(|op| matches!(op, PlannedOp::UpdateCategory(_) | PlannedOp::UpdateBook(_)))
    }

    /// Number of deletes.
    #[must_use]
    pub fn deletes(&self) -> usize {
        self.count(PlannedOp::is_delete)
    }

    /// The same plan with every delete removed.
    ///
    /// Used for cancelled scans: a partial result must not delete rows.
    #[must_use]
    pub fn without_deletes(mut self) -> Self {
        self.ops.retain(|op| !op.is_delete());
        self
    }

    fn count(&self, pred: impl Fn(&PlannedOp) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }
}

/// Diffs a snapshot against freshly scanned rows.
///
/// `categories` must list parents before children, as the walker emits them.
/// `last_scanned` differences alone never produce an update.
#[must_use]
pub fn reconcile(previous: &CatalogSnapshot, books: &[Book], categories: &[Category]) -> ReconcilePlan {
    let mut ops = Vec::new();

    for category in categories {
        match previous.category(category.id) {
            None => ops.push(PlannedOp::InsertCategory(category.clone())),
            Some(old) if old != category => ops.push(PlannedOp::UpdateCategory(category.clone())),
            Some(_) => {}
        }
    }

    for book in books {
        match previous.book(book.id) {
            None => ops.push(PlannedOp::InsertBook(Box::new(book.clone()))),
            Some(old) if !old.same_content(book) => {
                ops.push(PlannedOp::UpdateBook(Box::new(book.clone())));
            }
            Some(_) => {}
        }
    }

    let seen_books: FxHashSet<BookId> = books.iter().map(|b| b.id).collect();
    let mut gone_books: Vec<&Book> = previous
        .books
        .values()
        .filter(|b| !seen_books.contains(&b.id))
        .collect();
    gone_books.sort_by(|a, b| a.path.cmp(&b.path));
    // A moved book keeps rendering to the same key; only drop unshared covers.
    let live_covers: FxHashSet<ThumbKey> = books.iter().filter_map(|b| b.cover).collect();
    ops.extend(gone_books.into_iter().map(|b| PlannedOp::DeleteBook {
        id: b.id,
        cover: b.cover.filter(|key| !live_covers.contains(key)),
    }));

    let seen_categories: FxHashSet<CategoryId> = categories.iter().map(|c| c.id).collect();
    let mut gone_categories: Vec<(usize, &Category)> = previous
        .categories
        .values()
        .filter(|c| !seen_categories.contains(&c.id))
        .map(|c| (previous.depth(c.id), c))
        .collect();
    gone_categories.sort_by(|(da, a), (db, b)| db.cmp(da).then_with(|| a.path.cmp(&b.path)));
    ops.extend(
        gone_categories
            .into_iter()
            .map(|(_, c)| PlannedOp::DeleteCategory(c.id)),
    );

    let plan = ReconcilePlan { ops };
    debug!(
        inserts = plan.inserts(),
        updates = plan.updates(),
        deletes = plan.deletes(),
        "Reconcile plan ready"
    );
    plan
}

/// Outcome of [`apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated in place.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
    /// Operations that failed twice.
    pub conflicts: Vec<ScanError>,
}

impl ApplyReport {
    /// Total rows changed.
    #[must_use]
    pub const fn changed(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Writes a plan to `store`.
///
/// Deleting a book also drops its cover from `thumbnails` when given.
pub fn apply(
    plan: &ReconcilePlan,
    store: &dyn CatalogStore,
    thumbnails: Option<&dyn ThumbnailStore>,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for op in &plan.ops {
        let result = run_op(op, store).or_else(|first| {
            debug!(key = %op.key(), error = %first, "Retrying catalog write");
            run_op(op, store)
        });

        match result {
            Ok(()) => match op {
                PlannedOp::InsertCategory(_) | PlannedOp::InsertBook(_) => report.inserted += 1,
                PlannedOp::UpdateCategory(_) | PlannedOp::UpdateBook(_) => report.updated += 1,
                PlannedOp::DeleteBook { cover, .. } => {
                    report.deleted += 1;
                    if let (Some(key), Some(cache)) = (cover, thumbnails) {
                        if let Err(e) = cache.remove(key) {
                            warn!(key = %key, error = %e, "Failed to drop cached cover");
                        }
                    }
                }
                PlannedOp::DeleteCategory(_) => report.deleted += 1,
            },
            Err(err) => {
                warn!(key = %op.key(), error = %err, "Catalog write failed after retry");
                report.conflicts.push(ScanError::conflict(op.key(), &err));
            }
        }
    }

    info!(
        inserted = report.inserted,
        updated = report.updated,
        deleted = report.deleted,
        conflicts = report.conflicts.len(),
        "Catalog reconciled"
    );
    report
}

fn run_op(op: &PlannedOp, store: &dyn CatalogStore) -> Result<(), StoreError> {
    match op {
        PlannedOp::InsertCategory(c) => store.insert(&CatalogRow::Category(c.clone())),
        PlannedOp::UpdateCategory(c) => store.update(&CatalogRow::Category(c.clone())),
        PlannedOp::InsertBook(b) => store.insert(&CatalogRow::Book((**b).clone())),
        PlannedOp::UpdateBook(b) => store.update(&CatalogRow::Book((**b).clone())),
        PlannedOp::DeleteBook { id, .. } => store.delete(RowKey::Book(*id)),
        PlannedOp::DeleteCategory(id) => store.delete(RowKey::Category(*id)),
    }
}
