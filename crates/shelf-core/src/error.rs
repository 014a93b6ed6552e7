//! Error types for the shelf-core crate.
//!
//! This module provides [`ConfigError`] for configuration loading and
//! validation, and [`StoreError`] for catalog persistence failures.

use camino::Utf8PathBuf;

/// Why a [`Config`](crate::Config) could not be loaded or accepted.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use shelf_core::ConfigError;
///
/// let err = ConfigError::MissingDirectory(Utf8PathBuf::from("/srv/books"));
/// assert_eq!(err.to_string(), "library root does not exist: /srv/books");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A path exists but cannot serve as a library root.
    #[error("unusable path {path}: {reason}")]
    InvalidPath {
        /// Offending path.
        path: Utf8PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// The library root is missing on disk.
    #[error("library root does not exist: {0}")]
    MissingDirectory(Utf8PathBuf),

    /// A setting is out of range or inconsistent with another one.
    #[error("bad value for `{option}`: {reason}")]
    InvalidOption {
        /// Dotted setting name, e.g. `pool.max_workers`.
        option: String,
        /// What the value must satisfy.
        reason: String,
    },

    /// The config file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for [`Config`](crate::Config).
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a new [`ConfigError::InvalidOption`] error.
    #[inline]
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by a [`CatalogStore`](crate::CatalogStore) implementation.
///
/// Every row operation fails independently; callers decide whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The row referenced by an operation does not exist.
    #[error("catalog row not found: {0}")]
    NotFound(String),

    /// The operation would break a catalog invariant (e.g. deleting a
    /// category that still has books, or inserting an orphaned book).
    #[error("catalog conflict on {key}: {reason}")]
    Conflict {
        /// The row key involved.
        key: String,
        /// What invariant would be broken.
        reason: String,
    },

    /// The storage backend failed.
    #[error("catalog backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a new [`StoreError::Conflict`] error.
    #[inline]
    pub fn conflict(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Wraps any displayable backend error.
    #[inline]
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_errors_name_the_path() {
        let err = ConfigError::InvalidPath {
            path: Utf8PathBuf::from("/srv/books/a.pdf"),
            reason: "not a directory".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "unusable path /srv/books/a.pdf: not a directory"
        );
    }

    #[test]
    fn test_option_errors_name_the_setting() {
        let err = ConfigError::invalid_option("pool.max_workers", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "bad value for `pool.max_workers`: must be at least 1"
        );
    }

    #[test]
    fn test_store_error_conflict_display() {
        let err = StoreError::conflict("category:abc", "still has books");
        assert_eq!(
            err.to_string(),
            "catalog conflict on category:abc: still has books"
        );
    }
}
