//! Domain types for shelf.
//!
//! # Module Organization
//!
//! - [`id`] - Path-derived identifiers for books and categories
//! - [`entry`] - Filesystem entries and their classification
//! - [`fingerprint`] - Content fingerprints and thumbnail cache keys
//! - [`book`] - Books, pages, and scan-derived metadata
//! - [`category`] - Folder-derived grouping nodes
//!
//! All public types are re-exported here and at the crate root:
//!
//! ```
//! use shelf_core::{Book, BookId, Category, Classification, Entry};
//! ```

pub mod book;
pub mod category;
pub mod entry;
pub mod fingerprint;
pub mod id;

pub use book::{Book, BookState, OptimizationStrategy, Page, PageDimensions, SourceKind};
pub use category::Category;
pub use entry::{Classification, Entry, EntryKind};
pub use fingerprint::{Fingerprint, ThumbKey};
pub use id::{BookId, CategoryId};
