//! Error types for the shelf-scanner crate.
//!
//! This module provides [`ScanError`] for per-entity and fatal scan failures,
//! [`RenderError`] for thumbnail rendering, and [`LibraryError`] for the
//! [`Library`](crate::Library) facade.

use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use shelf_core::{BookId, ConfigError, StoreError};

/// Errors that can occur during scanning operations.
///
/// Every error is cloneable so it can be both streamed as a
/// [`ScanUpdate`](crate::ScanUpdate) and kept in the final report.
///
/// # Error Recovery Strategy
///
/// - **Root errors** ([`ScanError::RootUnavailable`]): fatal, the scan fails
/// - **Entity errors** (unreadable paths, corrupt documents, render failures,
///   reconciliation conflicts): recorded in the report, scan continues
/// - **Trigger errors** ([`ScanError::ScanInProgress`]): no scan is started
///
/// # Examples
///
/// ```
/// use shelf_scanner::ScanError;
///
/// let err = ScanError::corrupt("/books/broken.pdf", "invalid xref");
/// assert!(err.is_recoverable());
/// assert_eq!(err.path().map(|p| p.as_str()), Some("/books/broken.pdf"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// The library root could not be read.
    #[error("library root unavailable {path}: {reason}")]
    RootUnavailable {
        /// The configured root.
        path: Utf8PathBuf,
        /// The underlying I/O failure.
        reason: String,
    },

    /// A path below the root could not be read and was skipped.
    #[error("cannot read {path}: {reason}")]
    PathUnreadable {
        /// The skipped path.
        path: Utf8PathBuf,
        /// The underlying I/O failure.
        reason: String,
    },

    /// An entry was not catalogued because its folder is an image book.
    #[error("{path} is shadowed by page images in its parent folder")]
    Shadowed {
        /// The shadowed subdirectory or PDF.
        path: Utf8PathBuf,
    },

    /// A document could not be parsed. The book is kept in degraded form.
    #[error("corrupt document {path}: {reason}")]
    CorruptDocument {
        /// The document path.
        path: Utf8PathBuf,
        /// What the parser reported.
        reason: String,
    },

    /// A book candidate did not yield a book.
    #[error("rejected book candidate {path}: {reason}")]
    Rejected {
        /// The candidate path.
        path: Utf8PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// A cover could not be rendered. A placeholder is used instead.
    #[error("cannot render cover from {path}: {source}")]
    Render {
        /// The cover source.
        path: Utf8PathBuf,
        /// The renderer failure.
        #[source]
        source: RenderError,
    },

    /// A scan was requested while another one is running.
    #[error("a scan is already in progress")]
    ScanInProgress,

    /// A catalog row could not be written after a retry.
    #[error("could not reconcile {key}: {reason}")]
    ReconciliationConflict {
        /// The row key.
        key: String,
        /// The last store error.
        reason: String,
    },

    /// Invalid scanner configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(PathBuf),
}

impl ScanError {
    /// Creates a new [`ScanError::RootUnavailable`] error.
    #[inline]
    pub fn root_unavailable(path: impl Into<Utf8PathBuf>, reason: impl ToString) -> Self {
        Self::RootUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a new [`ScanError::PathUnreadable`] error.
    #[inline]
    pub fn unreadable(path: impl Into<Utf8PathBuf>, reason: impl ToString) -> Self {
        Self::PathUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a new [`ScanError::CorruptDocument`] error.
    #[inline]
    pub fn corrupt(path: impl Into<Utf8PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptDocument {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a new [`ScanError::Rejected`] error.
    #[inline]
    pub fn rejected(path: impl Into<Utf8PathBuf>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new [`ScanError::Render`] error.
    #[inline]
    pub fn render(path: impl Into<Utf8PathBuf>, source: RenderError) -> Self {
        Self::Render {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`ScanError::ReconciliationConflict`] error.
    #[inline]
    pub fn conflict(key: impl ToString, source: &StoreError) -> Self {
        Self::ReconciliationConflict {
            key: key.to_string(),
            reason: source.to_string(),
        }
    }

    /// Creates a new [`ScanError::Config`] error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` if this error is recoverable (scanning can continue).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PathUnreadable { .. }
                | Self::Shadowed { .. }
                | Self::CorruptDocument { .. }
                | Self::Rejected { .. }
                | Self::Render { .. }
                | Self::ReconciliationConflict { .. }
        )
    }

    /// Returns `true` if this error is fatal (scanning should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::RootUnavailable { path, .. }
            | Self::PathUnreadable { path, .. }
            | Self::Shadowed { path }
            | Self::CorruptDocument { path, .. }
            | Self::Rejected { path, .. }
            | Self::Render { path, .. } => Some(path),
            Self::ScanInProgress
            | Self::ReconciliationConflict { .. }
            | Self::Config(_)
            | Self::NonUtf8Path(_) => None,
        }
    }
}

impl From<ConfigError> for ScanError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Thumbnail rendering failures.
///
/// Callers substitute a placeholder cover; a render failure never fails a
/// book.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The source is not an image format we can decode, or a PDF without an
    /// extractable page image.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The source could not be read or decoded.
    #[error("decode failure: {0}")]
    DecodeFailure(String),
}

impl RenderError {
    /// Creates a new [`RenderError::UnsupportedFormat`] error.
    #[inline]
    pub fn unsupported(reason: impl ToString) -> Self {
        Self::UnsupportedFormat(reason.to_string())
    }

    /// Creates a new [`RenderError::DecodeFailure`] error.
    #[inline]
    pub fn decode(reason: impl ToString) -> Self {
        Self::DecodeFailure(reason.to_string())
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Self::UnsupportedFormat(e.to_string()),
            other => Self::DecodeFailure(other.to_string()),
        }
    }
}

/// Errors returned by the [`Library`](crate::Library) facade.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    /// No book with this id is catalogued.
    #[error("book not found: {0}")]
    NotFound(BookId),

    /// The book has no page at this index.
    #[error("book {book} has no page {page}")]
    PageNotFound {
        /// The book.
        book: BookId,
        /// Zero-based page index.
        page: usize,
    },

    /// No scan with this id is known.
    #[error("unknown scan: {0}")]
    UnknownScan(u64),

    /// A scan could not be started.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The catalog store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A placeholder cover could not be produced.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The thumbnail cache failed.
    #[error("thumbnail cache: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_is_recoverable() {
        let err = ScanError::unreadable("/books/locked", "permission denied");
        assert!(err.is_recoverable());
        assert!(!err.is_fatal());
        assert_eq!(err.path().map(Utf8Path::as_str), Some("/books/locked"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_root_unavailable_is_fatal() {
        let err = ScanError::root_unavailable("/gone", "not found");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/gone"));
    }

    #[test]
    fn test_scan_in_progress_display() {
        assert_eq!(
            ScanError::ScanInProgress.to_string(),
            "a scan is already in progress"
        );
        assert!(ScanError::ScanInProgress.path().is_none());
    }

    #[test]
    fn test_conflict_keeps_store_reason() {
        let store_err = StoreError::backend("disk full");
        let err = ScanError::conflict("book:1", &store_err);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_render_error_source() {
        use std::error::Error as _;

        let err = ScanError::render("/b/1.jpg", RenderError::decode("truncated"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/b/1.jpg"));
    }
}
