//! CLI entry point for the shelf library scanner.
//!
//! This binary scans a library of image folders and PDFs into a SQLite
//! catalog, lists what was found, exports cover thumbnails and manages the
//! thumbnail cache.
//!
//! # Usage
//!
//! ```bash
//! shelf [OPTIONS] <COMMAND>
//!
//! # Scan the library and print a summary
//! shelf --root ~/Books scan
//!
//! # Print the category tree as JSON
//! shelf list --json
//!
//! # Export a cover
//! shelf cover 0f8c5a7e-... --width 300 --output cover.jpg
//!
//! # Export the third page as a reader would get it
//! shelf page 0f8c5a7e-... 2 --output page.jpg
//!
//! # Drop cached thumbnails older than 30 days
//! shelf cache prune --max-age-days 30
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use rustc_hash::FxHashSet;
use serde::Serialize;
use shelf_core::{Book, BookId, BookState, CatalogStore, Category, CategoryId, Config};
use shelf_scanner::{EvictionPolicy, Library, PageImage, ScanState, ScanStatus, ScanUpdate};
use shelf_store::SqliteCatalog;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Buffered scan events between the scan threads and the printer.
const UPDATE_BUFFER: usize = 256;

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Book library scanner.
///
/// Scans a folder of image books and PDFs, keeps the catalog in a SQLite
/// database and caches cover thumbnails.
#[derive(Parser)]
#[command(name = "shelf", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON settings file.
    #[arg(short, long, global = true, env = "SHELF_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Library root directory (overrides `library.root_path`).
    #[arg(short, long, global = true, env = "SHELF_ROOT")]
    root: Option<Utf8PathBuf>,

    /// Catalog database file.
    ///
    /// Defaults to `./shelf.db`. Thumbnails are cached next to it unless the
    /// settings file names a cache directory.
    #[arg(long, global = true, env = "SHELF_DB")]
    db: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Scan the library and reconcile the catalog.
    Scan {
        /// Worker threads for book building and cover rendering.
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Print the category tree with its books.
    List {
        /// Only print this category.
        #[arg(long)]
        category: Option<CategoryId>,

        /// Print JSON instead of a tree.
        #[arg(long)]
        json: bool,
    },

    /// Write a book cover as JPEG.
    Cover {
        /// Book id, as printed by `list`.
        id: BookId,

        /// Cover width in pixels (defaults to `thumbnails.cover_width`).
        #[arg(short, long)]
        width: Option<u32>,

        /// Output file.
        #[arg(short, long)]
        output: Utf8PathBuf,
    },

    /// Write one page of an image book.
    ///
    /// Without `--width` the page is written as a reader gets it: the source
    /// image, or a downscaled JPEG for books marked for optimization.
    Page {
        /// Book id, as printed by `list`.
        id: BookId,

        /// Zero-based page index.
        index: usize,

        /// Thumbnail width in pixels.
        #[arg(short, long)]
        width: Option<u32>,

        /// Output file.
        #[arg(short, long)]
        output: Utf8PathBuf,
    },

    /// Mark a book as favorite.
    Favorite {
        /// Book id, as printed by `list`.
        id: BookId,

        /// Remove the mark instead.
        #[arg(long)]
        off: bool,
    },

    /// Manage the thumbnail cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

/// Thumbnail cache subcommands.
#[derive(Subcommand)]
enum CacheCommands {
    /// Remove old thumbnails, then the oldest ones until under a size limit.
    Prune {
        /// Remove thumbnails older than this many days.
        #[arg(long, required_unless_present = "max_mb")]
        max_age_days: Option<u64>,

        /// Keep the cache under this many megabytes.
        #[arg(long)]
        max_mb: Option<u64>,
    },
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},lopdf=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the settings file and CLI overrides.
///
/// # Errors
///
/// Returns an error if the settings file cannot be read or is invalid.
fn build_config(cli: &Cli, db: &Utf8Path) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            Config::load(path).wrap_err_with(|| format!("Failed to load settings from {path}"))?
        }
        None => Config::default(),
    };

    if let Some(root) = &cli.root {
        config.library.root_path.clone_from(root);
    }
    if config.thumbnails.cache_dir.is_none() {
        let dir = db.parent().unwrap_or(Utf8Path::new(""));
        config.thumbnails.cache_dir = Some(dir.join("thumbnails"));
    }

    Ok(config)
}

/// Opens the catalog database and builds a [`Library`] over it.
///
/// # Errors
///
/// Returns an error if the database or thumbnail cache cannot be opened.
fn open_library(config: Config, db: &Utf8Path) -> color_eyre::Result<Library> {
    let store = SqliteCatalog::open(db)
        .wrap_err_with(|| format!("Failed to open catalog database {db}"))?;
    let library = Library::new(config, Arc::new(store))?;
    Ok(library)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs a scan, logging progress as it streams in.
///
/// Ctrl-C cancels the scan; work already finished is still written to the
/// catalog.
///
/// # Errors
///
/// Returns an error if the root is unusable, a scan cannot start, or the
/// scan fails.
async fn run_scan(library: &Library) -> color_eyre::Result<()> {
    library.config().validate_root()?;
    info!(root = %library.config().library.root_path, "Starting scan");

    let (tx, mut rx) = mpsc::channel(UPDATE_BUFFER);
    let handle = library.trigger_scan_streaming(None, tx)?;

    let mut status = None;
    let mut interrupted = false;
    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some(ScanUpdate::Complete(done)) => status = Some(done),
                Some(update) => log_update(&update),
                None => break,
            },
            result = tokio::signal::ctrl_c(), if !interrupted => {
                result?;
                warn!("Interrupted, cancelling scan");
                library.cancel(&handle);
                interrupted = true;
            }
        }
    }

    let status = status.unwrap_or_else(|| library.scan_status(&handle));
    print_scan_summary(&status)?;

    match status.state {
        ScanState::Failed => Err(eyre!("Scan of {} failed", status.root)),
        _ => Ok(()),
    }
}

fn log_update(update: &ScanUpdate) {
    match update {
        ScanUpdate::CandidatesDiscovered { books, categories } => {
            info!(books, categories, "Library walked");
        }
        ScanUpdate::BookScanned(book) => {
            debug!(title = %book.title, pages = ?book.page_count, "Book scanned");
        }
        ScanUpdate::BookFailed { path, error } => warn!(%path, %error, "Book skipped"),
        ScanUpdate::Warning(error) => debug!(%error, "Scan warning"),
        ScanUpdate::Complete(_) => {}
    }
}

/// Prints the category tree, or a single category, with its books.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read or the category is unknown.
fn run_list(
    store: &dyn CatalogStore,
    category: Option<CategoryId>,
    json: bool,
) -> color_eyre::Result<()> {
    let favorites: FxHashSet<BookId> = store.favorites()?.into_iter().collect();
    let tops = match category {
        Some(id) => vec![store
            .category(id)?
            .ok_or_else(|| eyre!("No category with id {id}"))?],
        None => store.root_categories()?,
    };

    let mut nodes = Vec::with_capacity(tops.len());
    for category in tops {
        nodes.push(build_tree(store, category, &favorites)?);
    }

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if json {
        let content = serde_json::to_string_pretty(&nodes)
            .map_err(|e| eyre!("Failed to serialize JSON: {}", e))?;
        writeln!(handle, "{content}")?;
    } else if nodes.is_empty() {
        writeln!(handle, "Catalog is empty; run `shelf scan` first.")?;
    } else {
        for node in &nodes {
            print_tree(&mut handle, node, 0)?;
        }
    }
    Ok(())
}

/// Writes a cover to `output`.
///
/// # Errors
///
/// Returns an error if the book is unknown or the file cannot be written.
fn run_cover(
    library: &Library,
    id: BookId,
    width: Option<u32>,
    output: &Utf8Path,
) -> color_eyre::Result<()> {
    let cover = library.cover(id, width)?;
    std::fs::write(output, &cover.bytes)
        .wrap_err_with(|| format!("Failed to write cover to {output}"))?;

    if cover.placeholder {
        warn!(book = %id, path = %output, "Book has no renderable cover, wrote placeholder");
    } else {
        info!(book = %id, path = %output, bytes = cover.bytes.len(), "Cover written");
    }
    Ok(())
}

/// Writes a page thumbnail, or the page as served to readers.
///
/// # Errors
///
/// Returns an error if the page does not exist, cannot be rendered, or the
/// output cannot be written.
fn run_page(
    library: &Library,
    id: BookId,
    index: usize,
    width: Option<u32>,
    output: &Utf8Path,
) -> color_eyre::Result<()> {
    let written = match width {
        Some(width) => {
            let page = library.page_thumbnail(id, index, width)?;
            std::fs::write(output, &page.bytes).map(|()| page.bytes.len() as u64)
        }
        None => match library.page(id, index)? {
            PageImage::Compressed(page) => {
                std::fs::write(output, &page.bytes).map(|()| page.bytes.len() as u64)
            }
            PageImage::Original(source) => std::fs::copy(&source, output),
        },
    }
    .wrap_err_with(|| format!("Failed to write page to {output}"))?;

    info!(book = %id, page = index, path = %output, bytes = written, "Page written");
    Ok(())
}

/// Applies an eviction policy to the thumbnail cache.
///
/// # Errors
///
/// Returns an error if the cache cannot be read.
fn run_prune(
    library: &Library,
    max_age_days: Option<u64>,
    max_mb: Option<u64>,
) -> color_eyre::Result<()> {
    let policy = EvictionPolicy {
        max_age: max_age_days.map(|days| Duration::from_secs(days.saturating_mul(86_400))),
        max_bytes: max_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
    };
    let report = library.evict_thumbnails(&policy)?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(
        handle,
        "Removed {} thumbnails ({} freed); {} left ({})",
        report.removed,
        human_bytes(report.freed_bytes),
        report.remaining,
        human_bytes(report.remaining_bytes)
    )?;
    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// A category with everything below it, for listing.
#[derive(Serialize)]
struct CategoryNode {
    #[serde(flatten)]
    category: Category,
    books: Vec<BookEntry>,
    categories: Vec<CategoryNode>,
}

#[derive(Serialize)]
struct BookEntry {
    #[serde(flatten)]
    book: Book,
    favorite: bool,
}

fn build_tree(
    store: &dyn CatalogStore,
    category: Category,
    favorites: &FxHashSet<BookId>,
) -> color_eyre::Result<CategoryNode> {
    let books = store
        .books_in_category(category.id)?
        .into_iter()
        .map(|book| BookEntry {
            favorite: favorites.contains(&book.id),
            book,
        })
        .collect();

    let mut categories = Vec::new();
    for child in store.child_categories(category.id)? {
        categories.push(build_tree(store, child, favorites)?);
    }

    Ok(CategoryNode {
        category,
        books,
        categories,
    })
}

fn print_tree(out: &mut impl Write, node: &CategoryNode, depth: usize) -> std::io::Result<()> {
    let indent = "  ".repeat(depth);
    writeln!(out, "{indent}{}/  {}", node.category.name, node.category.id)?;

    for entry in &node.books {
        let book = &entry.book;
        let star = if entry.favorite { '*' } else { ' ' };
        let pages = book
            .page_count
            .map_or_else(|| "? pages".to_owned(), |n| format!("{n} pages"));
        write!(
            out,
            "{indent}  {star} {}  ({}, {pages})  {}",
            book.title,
            book.kind.as_str(),
            book.id
        )?;
        if let BookState::Degraded { reason } = &book.state {
            write!(out, "  [degraded: {reason}]")?;
        }
        writeln!(out)?;
    }

    for child in &node.categories {
        print_tree(out, child, depth + 1)?;
    }
    Ok(())
}

/// Prints a summary of a finished scan; errors go to stderr.
fn print_scan_summary(status: &ScanStatus) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    writeln!(handle)?;
    writeln!(handle, "Scan of {}", status.root)?;
    writeln!(handle, "========================")?;
    writeln!(handle, "State:            {:?}", status.state)?;
    writeln!(handle, "Elapsed:          {:.2?}", status.elapsed)?;
    writeln!(handle, "Entries walked:   {}", status.stats.entries)?;
    writeln!(handle, "Book candidates:  {}", status.stats.candidates)?;
    writeln!(handle, "  Books:          {}", status.found)?;
    writeln!(handle, "  Skipped:        {}", status.stats.failed)?;
    writeln!(handle, "Covers rendered:  {}", status.stats.covers)?;

    if let Some(report) = &status.reconcile {
        writeln!(handle)?;
        writeln!(
            handle,
            "Catalog: {} inserted, {} updated, {} deleted",
            report.inserted, report.updated, report.deleted
        )?;
    }

    if !status.errors.is_empty() {
        let stderr = std::io::stderr();
        let mut err = stderr.lock();
        writeln!(err)?;
        writeln!(err, "Errors ({}):", status.errors.len())?;
        for error in &status.errors {
            writeln!(err, "  {error}")?;
        }
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)] // Display only
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Load settings and open the catalog
    let db = cli.db.clone().unwrap_or_else(|| Utf8PathBuf::from("shelf.db"));
    let mut config = build_config(&cli, &db)?;
    if let Commands::Scan {
        workers: Some(workers),
    } = &cli.command
    {
        config.pool.max_workers = *workers;
    }
    let library = open_library(config, &db)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Scan { .. } => run_scan(&library).await,
        Commands::List { category, json } => run_list(library.catalog().as_ref(), *category, *json),
        Commands::Cover { id, width, output } => run_cover(&library, *id, *width, output),
        Commands::Page {
            id,
            index,
            width,
            output,
        } => run_page(&library, *id, *index, *width, output),
        Commands::Favorite { id, off } => {
            library.set_favorite(*id, !*off)?;
            info!(book = %id, favorite = !*off, "Favorite updated");
            Ok(())
        }
        Commands::Cache {
            command: CacheCommands::Prune {
                max_age_days,
                max_mb,
            },
        } => run_prune(&library, *max_age_days, *max_mb),
    }
}
