//! Book assembly.
//!
//! [`BookBuilder`] turns a walker [`Candidate`] into a [`Book`]: pages, title,
//! change fingerprint, sampled page dimensions and optimization strategy.
//! Image headers are read without decoding pixel data; PDFs are probed with
//! `lopdf`.
//!
//! A corrupt PDF still yields a book, in degraded form, together with a
//! [`ScanError::CorruptDocument`] warning.

use camino::Utf8Path;
use shelf_core::{
    Book, BookState, Config, Entry, Fingerprint, OptimizationStrategy, Page, PageDimensions,
    SourceKind, StrategyConfig, TitleConfig,
};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::ScanError;
use crate::pdf;
use crate::walker::Candidate;

/// A built book plus the non-fatal problems found while building it.
#[derive(Debug, Clone)]
pub struct BuiltBook {
    /// The assembled record. `last_scanned` and `cover` are left unset.
    pub book: Book,
    /// Recoverable errors, e.g. a corrupt document.
    pub warnings: Vec<ScanError>,
}

/// Assembles books from candidates.
///
/// # Examples
///
/// ```
/// use shelf_core::Config;
/// use shelf_scanner::BookBuilder;
///
/// let builder = BookBuilder::new(&Config::default());
/// assert_eq!(builder.title_for("01 - The_Long_Road"), "The Long Road");
/// ```
#[derive(Debug, Clone, Default)]
pub struct BookBuilder {
    titles: TitleConfig,
    strategy: StrategyConfig,
}

impl BookBuilder {
    /// Creates a builder from configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            titles: config.library.titles,
            strategy: config.strategy,
        }
    }

    /// Builds a book from a candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Rejected`] for an image candidate without images.
    /// PDF parse failures do not fail the build.
    pub fn build(&self, candidate: &Candidate) -> Result<BuiltBook, ScanError> {
        let built = match candidate.kind {
            SourceKind::ImageSet => self.build_image_set(candidate)?,
            SourceKind::Pdf => self.build_pdf(candidate),
        };
        trace!(
            path = %built.book.path,
            pages = built.book.pages.len(),
            strategy = ?built.book.strategy,
            "Built book"
        );
        Ok(built)
    }

    fn build_image_set(&self, candidate: &Candidate) -> Result<BuiltBook, ScanError> {
        if candidate.images.is_empty() {
            return Err(ScanError::rejected(
                &candidate.entry.path,
                "folder has no page images",
            ));
        }

        let path = &candidate.entry.path;
        let mut book = Book::new(path, self.title_for(candidate.entry.name()), SourceKind::ImageSet);
        book.category_id = candidate.category_id;
        book.pages = candidate
            .images
            .iter()
            .map(|img| Page::Image {
                path: img.path.clone(),
            })
            .collect();
        book.page_count = u32::try_from(book.pages.len()).ok();
        book.fingerprint = fingerprint(&candidate.images, book.pages.len());

        let dimensions = sample_dimensions(&candidate.images);
        book.strategy = if dimensions == PageDimensions::default() {
            OptimizationStrategy::Original
        } else {
            self.strategy_for(dimensions)
        };
        book.dimensions = dimensions;

        Ok(BuiltBook {
            book,
            warnings: Vec::new(),
        })
    }

    fn build_pdf(&self, candidate: &Candidate) -> BuiltBook {
        let entry = &candidate.entry;
        let mut book = Book::new(&entry.path, self.title_for(file_stem(entry)), SourceKind::Pdf);
        book.category_id = candidate.category_id;
        book.strategy = OptimizationStrategy::Original;

        let mut warnings = Vec::new();
        match pdf::probe(&entry.path) {
            Ok(info) => {
                book.pages = (0..info.page_count)
                    .map(|index| Page::PdfPage { index })
                    .collect();
                book.page_count = Some(info.page_count);
                book.dimensions = info.first_page.unwrap_or_default();
                book.fingerprint = fingerprint(std::slice::from_ref(entry), info.page_count as usize);
            }
            Err(err) => {
                debug!(path = %entry.path, error = %err, "Keeping corrupt PDF as degraded book");
                book.state = BookState::Degraded {
                    reason: match &err {
                        ScanError::CorruptDocument { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    },
                };
                book.fingerprint = fingerprint(std::slice::from_ref(entry), 0);
                warnings.push(err);
            }
        }

        BuiltBook { book, warnings }
    }

    /// Derives a display title from a folder name or file stem.
    #[must_use]
    pub fn title_for(&self, raw: &str) -> String {
        let mut title = if self.titles.underscores_to_spaces {
            raw.replace('_', " ")
        } else {
            raw.to_owned()
        };
        if self.titles.strip_numeric_prefix {
            if let Some(rest) = strip_numeric_prefix(&title) {
                title = rest.to_owned();
            }
        }

        let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            raw.to_owned()
        } else {
            collapsed
        }
    }

    /// Chooses how pages of this average size should be served.
    #[must_use]
    pub fn strategy_for(&self, dims: PageDimensions) -> OptimizationStrategy {
        let s = &self.strategy;
        let large = (dims.width >= s.max_width && dims.height >= s.max_height)
            || u64::from(dims.width) >= 2 * u64::from(s.max_width)
            || u64::from(dims.height) >= 2 * u64::from(s.max_height)
            || dims.area() >= s.max_pixel_area;
        if large {
            OptimizationStrategy::Optimize
        } else {
            OptimizationStrategy::Original
        }
    }
}

/// Separators that may follow an ordering number.
const PREFIX_SEPARATORS: &[char] = &[' ', '-', '_', '.', ')'];

/// `"01 - Title"` → `"Title"`. Returns `None` when nothing would remain or
/// the digits are not followed by a separator (`"1984"`, `"2nd Edition"`).
fn strip_numeric_prefix(title: &str) -> Option<&str> {
    let digits = title.len() - title.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let after = &title[digits..];
    let rest = after.trim_start_matches(PREFIX_SEPARATORS);
    if rest.len() == after.len() || rest.trim().is_empty() {
        return None;
    }
    Some(rest)
}

fn file_stem(entry: &Entry) -> &str {
    Utf8Path::new(entry.name()).file_stem().unwrap_or(entry.name())
}

/// Hashes name, size and mtime of each source file, then the page count.
fn fingerprint(sources: &[Entry], page_count: usize) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    for entry in sources {
        hasher.update(entry.name().as_bytes());
        hasher.update(&[0]);
        hasher.update(&entry.size.to_le_bytes());
        hasher.update(&entry.modified_ns.to_le_bytes());
    }
    hasher.update(&(page_count as u64).to_le_bytes());
    Fingerprint::from_bytes(*hasher.finalize().as_bytes())
}

/// Averages header dimensions of the first, middle and last page.
fn sample_dimensions(images: &[Entry]) -> PageDimensions {
    let Some(last) = images.len().checked_sub(1) else {
        return PageDimensions::default();
    };
    let mut picks: SmallVec<[usize; 3]> = SmallVec::new();
    for idx in [0, last / 2, last] {
        if !picks.contains(&idx) {
            picks.push(idx);
        }
    }

    let mut sum_w = 0u64;
    let mut sum_h = 0u64;
    let mut count = 0u64;
    for entry in picks.iter().filter_map(|&i| images.get(i)) {
        match image::image_dimensions(&entry.path) {
            Ok((w, h)) => {
                sum_w += u64::from(w);
                sum_h += u64::from(h);
                count += 1;
            }
            Err(e) => trace!(path = %entry.path, error = %e, "Unreadable page header"),
        }
    }

    if count == 0 {
        return PageDimensions::default();
    }
    PageDimensions::new((sum_w / count) as u32, (sum_h / count) as u32)
}
