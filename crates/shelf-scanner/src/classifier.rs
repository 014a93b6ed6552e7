//! Entry classification.
//!
//! [`PathClassifier`] decides what a filesystem entry is to the library. Files
//! are classified from their name alone; directories from the classifications
//! of their direct children, which the walker computes first.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashSet;
use shelf_core::{Classification, Entry, LibraryConfig};

use crate::error::ScanError;

/// Names written by operating systems and file managers, never catalogued.
const OS_METADATA_NAMES: &[&str] = &[
    "thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    "__macosx",
    "$recycle.bin",
    "system volume information",
    "icon\r",
];

const PDF_EXTENSION: &str = "pdf";

/// Classifies entries according to a [`LibraryConfig`].
///
/// # Examples
///
/// ```
/// use shelf_core::{Classification, Entry, LibraryConfig};
/// use shelf_scanner::PathClassifier;
///
/// let classifier = PathClassifier::new(&LibraryConfig::default())?;
///
/// let page = Entry::file("/books/Vol 1/01.JPG", 1024, 0);
/// assert_eq!(classifier.classify(&page, &[]), Classification::ImageFile);
///
/// let folder = Entry::directory("/books/Vol 1");
/// let verdict = classifier.classify(&folder, &[Classification::ImageFile]);
/// assert_eq!(verdict, Classification::BookCandidate);
/// # Ok::<(), shelf_scanner::ScanError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PathClassifier {
    image_extensions: FxHashSet<String>,
    ignored_extensions: FxHashSet<String>,
    patterns: GlobSet,
}

impl PathClassifier {
    /// Builds a classifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] if an ignore pattern is not a valid glob.
    pub fn new(config: &LibraryConfig) -> Result<Self, ScanError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_patterns {
            let glob = GlobBuilder::new(pattern.trim())
                .case_insensitive(true)
                .build()
                .map_err(|e| ScanError::config(format!("invalid ignore pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let patterns = builder
            .build()
            .map_err(|e| ScanError::config(format!("invalid ignore patterns: {e}")))?;

        Ok(Self {
            image_extensions: normalize_extensions(&config.image_extensions),
            ignored_extensions: normalize_extensions(&config.ignored_file_types),
            patterns,
        })
    }

    /// Classifies an entry.
    ///
    /// For a directory, `children` holds the classifications of its direct
    /// children; it is ignored for files.
    #[must_use]
    pub fn classify(&self, entry: &Entry, children: &[Classification]) -> Classification {
        if self.is_ignored_name(entry.name()) {
            return Classification::Ignored;
        }
        if entry.is_dir() {
            classify_directory(children)
        } else {
            self.classify_file(entry)
        }
    }

    /// Returns `true` if an entry with this name is never catalogued.
    ///
    /// Covers dotfiles, OS metadata files, and configured glob patterns.
    #[must_use]
    pub fn is_ignored_name(&self, name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') {
            return true;
        }
        let lower = name.to_lowercase();
        OS_METADATA_NAMES.contains(&lower.as_str()) || self.patterns.is_match(name)
    }

    fn classify_file(&self, entry: &Entry) -> Classification {
        let Some(ext) = entry.extension_lower() else {
            return Classification::Ignored;
        };
        if self.ignored_extensions.contains(&ext) {
            Classification::Ignored
        } else if ext == PDF_EXTENSION {
            Classification::PdfFile
        } else if self.image_extensions.contains(&ext) {
            Classification::ImageFile
        } else {
            Classification::Ignored
        }
    }
}

/// Direct images make a book, even alongside subdirectories.
fn classify_directory(children: &[Classification]) -> Classification {
    if children.contains(&Classification::ImageFile) {
        Classification::BookCandidate
    } else if children.iter().any(|c| c.is_catalog_node()) {
        Classification::CategoryCandidate
    } else {
        Classification::Ignored
    }
}

fn normalize_extensions(exts: &[String]) -> FxHashSet<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PathClassifier {
        PathClassifier::new(&LibraryConfig::default()).unwrap()
    }

    fn file(name: &str) -> Entry {
        Entry::file(format!("/lib/{name}"), 1, 0)
    }

    #[test]
    fn test_image_extensions_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify(&file("a.JPG"), &[]), Classification::ImageFile);
        assert_eq!(c.classify(&file("a.webp"), &[]), Classification::ImageFile);
        assert_eq!(c.classify(&file("a.Pdf"), &[]), Classification::PdfFile);
        assert_eq!(c.classify(&file("notes.txt"), &[]), Classification::Ignored);
        assert_eq!(c.classify(&file("README"), &[]), Classification::Ignored);
    }

    #[test]
    fn test_hidden_and_os_metadata_ignored() {
        let c = classifier();
        assert_eq!(c.classify(&file(".cover.jpg"), &[]), Classification::Ignored);
        assert_eq!(c.classify(&file("Thumbs.db"), &[]), Classification::Ignored);
        assert_eq!(
            c.classify(&Entry::directory("/lib/__MACOSX"), &[Classification::ImageFile]),
            Classification::Ignored
        );
    }

    #[test]
    fn test_configured_extensions_with_or_without_dot() {
        let config = LibraryConfig {
            image_extensions: vec!["jpg".to_owned(), ".PNG".to_owned()],
            ignored_file_types: vec![".png".to_owned()],
            ..LibraryConfig::default()
        };
        let c = PathClassifier::new(&config).unwrap();
        assert_eq!(c.classify(&file("a.jpg"), &[]), Classification::ImageFile);
        assert_eq!(c.classify(&file("a.png"), &[]), Classification::Ignored);
    }

    #[test]
    fn test_glob_patterns() {
        let config = LibraryConfig {
            ignore_patterns: vec!["*_scan_raw*".to_owned(), "Extras".to_owned()],
            ..LibraryConfig::default()
        };
        let c = PathClassifier::new(&config).unwrap();
        assert_eq!(c.classify(&file("p1_SCAN_RAW.jpg"), &[]), Classification::Ignored);
        assert_eq!(
            c.classify(&Entry::directory("/lib/extras"), &[Classification::PdfFile]),
            Classification::Ignored
        );
    }

    #[test]
    fn test_invalid_glob_is_config_error() {
        let config = LibraryConfig {
            ignore_patterns: vec!["[".to_owned()],
            ..LibraryConfig::default()
        };
        assert!(matches!(
            PathClassifier::new(&config),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn test_directory_rules() {
        use Classification::{BookCandidate, CategoryCandidate, Ignored, ImageFile, PdfFile};

        let c = classifier();
        let dir = Entry::directory("/lib/d");
        assert_eq!(c.classify(&dir, &[ImageFile, Ignored]), BookCandidate);
        assert_eq!(c.classify(&dir, &[PdfFile]), CategoryCandidate);
        assert_eq!(c.classify(&dir, &[BookCandidate, Ignored]), CategoryCandidate);
        assert_eq!(c.classify(&dir, &[CategoryCandidate]), CategoryCandidate);
        // Images win over subdirectories.
        assert_eq!(c.classify(&dir, &[BookCandidate, ImageFile]), BookCandidate);
        assert_eq!(c.classify(&dir, &[Ignored, Ignored]), Ignored);
        assert_eq!(c.classify(&dir, &[]), Ignored);
    }
}
