//! Filesystem entries and their classification.

use std::fs::Metadata;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::book::SourceKind;

/// Whether an [`Entry`] is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// A read-only snapshot of one filesystem entry, taken at walk time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute path of the entry.
    pub path: Utf8PathBuf,
    /// File or directory.
    pub kind: EntryKind,
    /// Size in bytes (`0` for directories).
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch (`0` if unknown).
    pub modified_ns: u64,
}

impl Entry {
    /// Creates an entry from already-fetched metadata.
    #[must_use]
    pub fn from_metadata(path: Utf8PathBuf, metadata: &Metadata) -> Self {
        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));

        Self {
            path,
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified_ns,
        }
    }

    /// Creates a file entry without touching the filesystem.
    #[must_use]
    pub fn file(path: impl Into<Utf8PathBuf>, size: u64, modified_ns: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
            modified_ns,
        }
    }

    /// Creates a directory entry without touching the filesystem.
    #[must_use]
    pub fn directory(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            size: 0,
            modified_ns: 0,
        }
    }

    /// Returns the final path component, or an empty string for `/`.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or("")
    }

    /// Returns the lowercase extension without the dot, if any.
    #[must_use]
    pub fn extension_lower(&self) -> Option<String> {
        self.path.extension().map(str::to_ascii_lowercase)
    }

    /// Returns the path as a [`Utf8Path`].
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns `true` for directories.
    #[inline]
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// The classifier's verdict on an [`Entry`].
///
/// A PDF file is a complete book by itself, so [`PdfFile`](Self::PdfFile)
/// counts as a book candidate (see [`book_kind`](Self::book_kind)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Not catalogued (hidden, OS metadata, ignored type, or empty directory).
    Ignored,
    /// A page image.
    ImageFile,
    /// A PDF document; a book on its own.
    PdfFile,
    /// A directory of page images.
    BookCandidate,
    /// A directory grouping books and other categories.
    CategoryCandidate,
}

impl Classification {
    /// Returns the book source kind if this entry becomes a book.
    ///
    /// # Examples
    ///
    /// ```
    /// use shelf_core::{Classification, SourceKind};
    ///
    /// assert_eq!(Classification::PdfFile.book_kind(), Some(SourceKind::Pdf));
    /// assert_eq!(Classification::BookCandidate.book_kind(), Some(SourceKind::ImageSet));
    /// assert_eq!(Classification::ImageFile.book_kind(), None);
    /// ```
    #[inline]
    #[must_use]
    pub const fn book_kind(self) -> Option<SourceKind> {
        match self {
            Self::PdfFile => Some(SourceKind::Pdf),
            Self::BookCandidate => Some(SourceKind::ImageSet),
            Self::Ignored | Self::ImageFile | Self::CategoryCandidate => None,
        }
    }

    /// Returns `true` if a parent directory containing this entry qualifies
    /// as a category (a book or a nested category).
    #[inline]
    #[must_use]
    pub const fn is_catalog_node(self) -> bool {
        matches!(
            self,
            Self::PdfFile | Self::BookCandidate | Self::CategoryCandidate
        )
    }

    /// Returns `true` for [`Ignored`](Self::Ignored).
    #[inline]
    #[must_use]
    pub const fn is_ignored(self) -> bool {
        matches!(self, Self::Ignored)
    }
}
