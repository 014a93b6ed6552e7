//! Folder-derived grouping nodes.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::id::CategoryId;

/// A category: a directory that groups books and other categories.
///
/// The scan root is always a category with no parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    /// Path-derived identifier.
    pub id: CategoryId,
    /// Display name (the directory name).
    pub name: String,
    /// Absolute path of the directory.
    pub path: Utf8PathBuf,
    /// Enclosing category, `None` for the root.
    pub parent_id: Option<CategoryId>,
}

impl Category {
    /// Creates a category for `path` under `parent_id`.
    #[must_use]
    pub fn new(path: &Utf8Path, parent_id: Option<CategoryId>) -> Self {
        Self {
            id: CategoryId::from_path(path),
            name: path.file_name().unwrap_or(path.as_str()).to_owned(),
            path: path.to_owned(),
            parent_id,
        }
    }

    /// Returns `true` if this is a root category.
    #[inline]
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
