//! Books, pages, and scan-derived metadata.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use super::fingerprint::{Fingerprint, ThumbKey};
use super::id::{BookId, CategoryId};

/// Where a book's pages come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A folder of page images.
    ImageSet,
    /// A single PDF document.
    Pdf,
}

impl SourceKind {
    /// Returns a short lowercase label.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImageSet => "image_set",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a book. Pages reference their source and never own pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Page {
    /// A page backed by an image file.
    Image {
        /// Absolute path of the image.
        path: Utf8PathBuf,
    },
    /// A page of the book's PDF, zero-based.
    PdfPage {
        /// Page index within the document.
        index: u32,
    },
}

impl Page {
    /// Returns the image path for image pages.
    #[inline]
    #[must_use]
    pub fn image_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Image { path } => Some(path),
            Self::PdfPage { .. } => None,
        }
    }
}

/// Average page size, in pixels for images and points for PDFs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageDimensions {
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl PageDimensions {
    /// Creates a new dimension pair.
    #[inline]
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `width * height` without overflow.
    #[inline]
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for PageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How a reader should present a book's pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Not determined yet.
    #[default]
    Unknown,
    /// Serve pages as they are.
    Original,
    /// Pages are large enough to warrant downscaling.
    Optimize,
}

/// Health of a catalogued book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BookState {
    /// Fully scanned.
    #[default]
    Ready,
    /// Catalogued, but the source could not be fully read.
    Degraded {
        /// Why the book is degraded.
        reason: String,
    },
}

/// A catalogued book: a folder of images or a single PDF.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use shelf_core::{Book, BookId, Page, SourceKind};
///
/// let path = Utf8PathBuf::from("/library/Comics/Vol 1");
/// let mut book = Book::new(&path, "Vol 1", SourceKind::ImageSet);
/// book.pages.push(Page::Image { path: path.join("01.jpg") });
///
/// assert_eq!(book.id, BookId::from_path(&path));
/// assert!(book.cover_source().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Path-derived identifier.
    pub id: BookId,
    /// Display title.
    pub title: String,
    /// Absolute path of the book folder or PDF file.
    pub path: Utf8PathBuf,
    /// Owning category, `None` only for books outside any category.
    pub category_id: Option<CategoryId>,
    /// Image folder or PDF.
    pub kind: SourceKind,
    /// Ordered pages. Empty only for a degraded PDF.
    pub pages: Vec<Page>,
    /// Number of pages, `None` when it could not be determined.
    pub page_count: Option<u32>,
    /// Cache key of the rendered cover thumbnail.
    pub cover: Option<ThumbKey>,
    /// Change-detection fingerprint over source metadata.
    pub fingerprint: Fingerprint,
    /// Average page dimensions.
    pub dimensions: PageDimensions,
    /// Presentation strategy derived from `dimensions`.
    pub strategy: OptimizationStrategy,
    /// Ready or degraded.
    pub state: BookState,
    /// Unix seconds of the scan that produced this record.
    pub last_scanned: u64,
}

impl Book {
    /// Creates an empty book record for `path`.
    #[must_use]
    pub fn new(path: &Utf8Path, title: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: BookId::from_path(path),
            title: title.into(),
            path: path.to_owned(),
            category_id: None,
            kind,
            pages: Vec::new(),
            page_count: None,
            cover: None,
            fingerprint: Fingerprint::default(),
            dimensions: PageDimensions::default(),
            strategy: OptimizationStrategy::Unknown,
            state: BookState::Ready,
            last_scanned: 0,
        }
    }

    /// Returns the file the cover is rendered from.
    ///
    /// For image books this is the first page; for PDFs the document itself.
    /// A degraded PDF has no cover source.
    #[must_use]
    pub fn cover_source(&self) -> Option<&Utf8Path> {
        match self.kind {
            SourceKind::ImageSet => self.pages.first().and_then(Page::image_path),
            SourceKind::Pdf if self.is_degraded() => None,
            SourceKind::Pdf => Some(&self.path),
        }
    }

    /// Returns `true` if both records describe the same content.
    ///
    /// `last_scanned` is bookkeeping and is ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.path == other.path
            && self.category_id == other.category_id
            && self.kind == other.kind
            && self.pages == other.pages
            && self.page_count == other.page_count
            && self.cover == other.cover
            && self.fingerprint == other.fingerprint
            && self.dimensions == other.dimensions
            && self.strategy == other.strategy
            && self.state == other.state
    }

    /// Returns `true` if the book is [`BookState::Degraded`].
    #[inline]
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.state, BookState::Degraded { .. })
    }
}
