//! Library scanner for folders of page images and PDF books.
//!
//! This crate walks a library root, decides which folders and files are books
//! and which are categories, builds book records, renders cover thumbnails,
//! and reconciles the result with a [`CatalogStore`].
//!
//! # Overview
//!
//! The main entry point is [`Library`], which combines:
//!
//! - [`PathClassifier`]: Name and child based entry classification
//! - [`DirectoryWalker`]: Two-pass traversal (classify bottom-up, emit top-down)
//! - [`BookBuilder`]: Pages, titles, fingerprints and page dimensions
//! - [`ThumbnailRenderer`]: Cached, single-flight JPEG cover and page rendering
//! - [`ScanScheduler`]: One active scan at a time on a lazily built [`WorkerPool`]
//! - [`reconcile`] / [`apply`]: Catalog diffing and ordered row writes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelf_core::{Config, MemoryCatalog};
//! use shelf_scanner::Library;
//!
//! let mut config = Config::default();
//! config.library.root_path = "/srv/books".into();
//!
//! let library = Library::new(config, Arc::new(MemoryCatalog::new()))?;
//! let status = library.trigger_scan(None)?.wait();
//! println!("{:?}: {} books, {} errors", status.state, status.found, status.errors.len());
//! # Ok::<(), shelf_scanner::LibraryError>(())
//! ```
//!
//! # Streaming API
//!
//! Pass a `tokio` channel to receive [`ScanUpdate`] events while the scan
//! runs. Events are sent from scan threads with `blocking_send`, so the
//! receiver should live on an async task:
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::channel(256);
//! let handle = library.trigger_scan_streaming(None, tx)?;
//!
//! while let Some(update) = rx.recv().await {
//!     match update {
//!         ScanUpdate::CandidatesDiscovered { books, .. } => println!("{books} books"),
//!         ScanUpdate::BookScanned(book) => println!("Scanned: {}", book.title),
//!         ScanUpdate::BookFailed { path, .. } => println!("Failed: {path}"),
//!         ScanUpdate::Warning(err) => println!("Warning: {err}"),
//!         ScanUpdate::Complete(status) => println!("Done: {:?}", status.state),
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Library (facade)
//!     │
//!     ├── ScanScheduler (single active scan, ScanHandle)
//!     │       │
//!     │       ├── DirectoryWalker ── PathClassifier (ignore + globset)
//!     │       ├── WorkerPool (rayon, idle reaper)
//!     │       │       ├── BookBuilder (image headers, lopdf)
//!     │       │       └── ThumbnailRenderer (image, blake3, SingleFlight)
//!     │       └── reconcile / apply
//!     │
//!     ├── ThumbnailStore (DashMap or directory of JPEGs)
//!     │
//!     └── CatalogStore (shelf-core)
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod builder;
mod cache;
mod classifier;
mod error;
mod pdf;
mod pool;
mod reconcile;
mod render;
mod scheduler;
mod stats;
mod walker;

pub use builder::{BookBuilder, BuiltBook};
pub use cache::{
    looks_like_jpeg, CachedThumbnail, DiskThumbnailStore, EvictionPolicy, EvictionReport,
    MemoryThumbnailStore, SingleFlight, ThumbnailStore,
};
pub use classifier::PathClassifier;
pub use error::{LibraryError, RenderError, ScanError};
pub use pdf::{probe as probe_pdf, PdfInfo};
pub use pool::{PoolLease, WorkerPool};
pub use reconcile::{apply, reconcile, ApplyReport, PlannedOp, ReconcilePlan};
pub use render::{is_jpeg, RenderedCover, ThumbnailRenderer};
pub use scheduler::{ScanHandle, ScanScheduler, ScanState, ScanStatus};
pub use stats::{ScanStats, StatsSnapshot};
pub use walker::{Candidate, DirectoryWalker, WalkItem, WalkOutput};

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use shelf_core::{
    unix_now, Book, BookId, CatalogStore, Config, ConfigError, OptimizationStrategy, Page,
    SourceKind, StoreError, ThumbKey,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events emitted while a scan runs.
#[derive(Debug)]
pub enum ScanUpdate {
    /// The walk finished.
    CandidatesDiscovered {
        /// Book candidates found.
        books: usize,
        /// Categories found.
        categories: usize,
    },

    /// A book was built (and its cover rendered, if possible).
    BookScanned(Box<Book>),

    /// A candidate did not yield a book.
    BookFailed {
        /// The candidate path.
        path: Utf8PathBuf,
        /// Why it failed.
        error: ScanError,
    },

    /// A recoverable problem: unreadable or shadowed path, degraded book,
    /// failed cover, or catalog conflict.
    Warning(ScanError),

    /// The scan stopped. Always the last event.
    Complete(ScanStatus),
}

/// A page as a reader should display it, returned by [`Library::page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageImage {
    /// Serve the source image unchanged.
    Original(Utf8PathBuf),
    /// Downscaled to `thumbnails.compressed_width`.
    Compressed(RenderedCover),
}

/// A cover returned by [`Library::cover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// Cache key, `None` for a placeholder.
    pub key: Option<ThumbKey>,
    /// JPEG bytes.
    pub bytes: Arc<[u8]>,
    /// `true` if the book has no renderable cover.
    pub placeholder: bool,
}

/// The library facade: scans, status, covers, favorites and cache upkeep.
///
/// # Thread Safety
///
/// `Library` is `Send + Sync`; share it behind an [`Arc`].
pub struct Library {
    config: Config,
    store: Arc<dyn CatalogStore>,
    thumbnails: Arc<dyn ThumbnailStore>,
    renderer: Arc<ThumbnailRenderer>,
    scheduler: ScanScheduler,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("root", &self.config.library.root_path)
            .field("thumbnails", &self.thumbnails)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Library {
    /// Creates a library over `store`.
    ///
    /// Thumbnails are cached on disk when `thumbnails.cache_dir` is set and in
    /// memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Config`] if the configuration is invalid or the
    /// cache directory cannot be created.
    pub fn new(config: Config, store: Arc<dyn CatalogStore>) -> Result<Self, LibraryError> {
        config.validate()?;
        let thumbnails: Arc<dyn ThumbnailStore> = match &config.thumbnails.cache_dir {
            Some(dir) => Arc::new(DiskThumbnailStore::open(dir).map_err(|e| {
                ConfigError::InvalidPath {
                    path: dir.clone(),
                    reason: format!("cannot create thumbnail cache: {e}"),
                }
            })?),
            None => Arc::new(MemoryThumbnailStore::new()),
        };
        Ok(Self::with_thumbnail_store(config, store, thumbnails))
    }

    /// Creates a library with an explicit thumbnail store.
    #[must_use]
    pub fn with_thumbnail_store(
        config: Config,
        store: Arc<dyn CatalogStore>,
        thumbnails: Arc<dyn ThumbnailStore>,
    ) -> Self {
        let renderer = Arc::new(ThumbnailRenderer::new(
            &config.thumbnails,
            Arc::clone(&thumbnails),
        ));
        let scheduler = ScanScheduler::new(&config, Arc::clone(&store), Arc::clone(&renderer));
        info!(
            root = %config.library.root_path,
            workers = config.pool.effective_workers(),
            "Creating library"
        );
        Self {
            config,
            store,
            thumbnails,
            renderer,
            scheduler,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The catalog store.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// The thumbnail store.
    #[must_use]
    pub fn thumbnails(&self) -> &Arc<dyn ThumbnailStore> {
        &self.thumbnails
    }

    /// The cover renderer.
    #[must_use]
    pub fn renderer(&self) -> &ThumbnailRenderer {
        &self.renderer
    }

    /// The scan scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &ScanScheduler {
        &self.scheduler
    }

    /// Runs the startup scan when `library.auto_scan_on_startup` is set.
    pub fn start(&self) -> Result<Option<ScanHandle>, LibraryError> {
        if !self.config.library.auto_scan_on_startup {
            debug!("Auto scan disabled");
            return Ok(None);
        }
        self.trigger_scan(None).map(Some)
    }

    /// Starts a scan of `root`, or of the configured root.
    ///
    /// Relative roots are resolved against the current directory and
    /// symlinks in the root are resolved, so ids do not depend on how the
    /// root is spelled.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ScanInProgress`] (wrapped) if a scan is running.
    pub fn trigger_scan(&self, root: Option<&Utf8Path>) -> Result<ScanHandle, LibraryError> {
        self.start_scan(root, None)
    }

    /// Like [`trigger_scan`](Self::trigger_scan), streaming [`ScanUpdate`]s.
    pub fn trigger_scan_streaming(
        &self,
        root: Option<&Utf8Path>,
        updates: mpsc::Sender<ScanUpdate>,
    ) -> Result<ScanHandle, LibraryError> {
        self.start_scan(root, Some(updates))
    }

    fn start_scan(
        &self,
        root: Option<&Utf8Path>,
        updates: Option<mpsc::Sender<ScanUpdate>>,
    ) -> Result<ScanHandle, LibraryError> {
        let root = root.unwrap_or(self.config.library.root_path.as_path());
        if root.as_str().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: root.to_owned(),
                reason: "library root is not set".to_owned(),
            }
            .into());
        }
        let root = resolve_root(root)?;
        Ok(self.scheduler.run_scan(&root, &self.config, updates)?)
    }

    /// Status of a scan.
    #[must_use]
    pub fn scan_status(&self, handle: &ScanHandle) -> ScanStatus {
        handle.status()
    }

    /// Status of a recent scan by id.
    pub fn scan_status_by_id(&self, id: u64) -> Result<ScanStatus, LibraryError> {
        self.scheduler
            .handle(id)
            .map(|h| h.status())
            .ok_or(LibraryError::UnknownScan(id))
    }

    /// Requests cancellation of a scan.
    pub fn cancel(&self, handle: &ScanHandle) {
        handle.cancel();
    }

    /// Returns `true` while a scan is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scheduler.is_active()
    }

    /// Returns the cover of a book at `width` (default: `thumbnails.cover_width`).
    ///
    /// Books without a renderable cover get a placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] if the book is not catalogued.
    pub fn cover(&self, id: BookId, width: Option<u32>) -> Result<CoverImage, LibraryError> {
        let book = self.store.book(id)?.ok_or(LibraryError::NotFound(id))?;
        let width = width.unwrap_or(self.config.thumbnails.cover_width);

        if let Some(source) = book.cover_source() {
            match self.renderer.render(source, width) {
                Ok(cover) => {
                    return Ok(CoverImage {
                        key: Some(cover.key),
                        bytes: cover.bytes,
                        placeholder: false,
                    });
                }
                Err(e) => warn!(book = %id, path = %source, error = %e, "Serving placeholder cover"),
            }
        }

        Ok(CoverImage {
            key: None,
            bytes: self.renderer.placeholder(width)?,
            placeholder: true,
        })
    }

    /// Renders page `index` (zero-based) of an image book at `width`.
    ///
    /// Pages go through the same cache and single-flight as covers, so the
    /// first page at the cover width is the cover itself.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] for an unknown book,
    /// [`LibraryError::PageNotFound`] past the last page, and
    /// [`RenderError::UnsupportedFormat`] for PDF books.
    pub fn page_thumbnail(
        &self,
        id: BookId,
        index: usize,
        width: u32,
    ) -> Result<RenderedCover, LibraryError> {
        let book = self.store.book(id)?.ok_or(LibraryError::NotFound(id))?;
        let source = page_source(&book, index)?;
        Ok(self.renderer.render(source, width)?)
    }

    /// Returns page `index` of an image book for reading.
    ///
    /// Books whose strategy is [`OptimizationStrategy::Optimize`] get a JPEG
    /// at `thumbnails.compressed_width`; all others get the source path.
    ///
    /// # Errors
    ///
    /// Same as [`page_thumbnail`](Self::page_thumbnail).
    pub fn page(&self, id: BookId, index: usize) -> Result<PageImage, LibraryError> {
        let book = self.store.book(id)?.ok_or(LibraryError::NotFound(id))?;
        let source = page_source(&book, index)?;
        if book.strategy != OptimizationStrategy::Optimize {
            return Ok(PageImage::Original(source.to_owned()));
        }
        let width = self.config.thumbnails.compressed_width;
        debug!(book = %id, page = index, width, "Serving compressed page");
        Ok(PageImage::Compressed(self.renderer.render(source, width)?))
    }

    /// Marks or unmarks a book as favorite.
    pub fn set_favorite(&self, id: BookId, favorite: bool) -> Result<(), LibraryError> {
        match self.store.set_favorite(id, favorite) {
            Err(StoreError::NotFound(_)) => Err(LibraryError::NotFound(id)),
            other => other.map_err(LibraryError::from),
        }
    }

    /// Applies an eviction policy to the thumbnail cache.
    pub fn evict_thumbnails(&self, policy: &EvictionPolicy) -> Result<EvictionReport, LibraryError> {
        let report = self.thumbnails.evict(policy, unix_now())?;
        info!(
            removed = report.removed,
            freed_bytes = report.freed_bytes,
            remaining = report.remaining,
            "Thumbnail cache pruned"
        );
        Ok(report)
    }
}

fn page_source(book: &Book, index: usize) -> Result<&Utf8Path, LibraryError> {
    if book.kind == SourceKind::Pdf {
        return Err(RenderError::unsupported("PDF pages are not rendered individually").into());
    }
    book.pages
        .get(index)
        .and_then(Page::image_path)
        .ok_or(LibraryError::PageNotFound {
            book: book.id,
            page: index,
        })
}

/// Canonical form of a scan root; ids are derived from it.
///
/// A root that cannot be canonicalized (usually a missing one) is only made
/// absolute, and the walker then fails the scan with
/// [`ScanError::RootUnavailable`].
fn resolve_root(root: &Utf8Path) -> Result<Utf8PathBuf, ScanError> {
    let resolved = match std::fs::canonicalize(root) {
        Ok(path) => path,
        Err(err) => {
            debug!(root = %root, error = %err, "Cannot canonicalize scan root");
            std::path::absolute(root).map_err(|e| ScanError::root_unavailable(root, e))?
        }
    };
    Utf8PathBuf::try_from(resolved).map_err(|e| ScanError::NonUtf8Path(e.into_path_buf()))
}
