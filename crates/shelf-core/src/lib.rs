//! Core types, configuration, and catalog interface for shelf.
//!
//! This crate provides the foundational pieces shared across the workspace:
//!
//! - Domain types ([`Book`], [`Category`], [`Entry`], [`Classification`])
//! - Stable identifiers ([`BookId`], [`CategoryId`]) and fingerprints
//! - Natural filename ordering ([`natural_cmp`])
//! - Configuration structures loaded from a JSON settings file
//! - The [`CatalogStore`] persistence interface plus an in-memory implementation
//! - Error types for configuration and persistence failures

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod natural;
pub mod types;

pub use catalog::{CatalogChild, CatalogRow, CatalogSnapshot, CatalogStore, MemoryCatalog, RowKey};
pub use config::{Config, LibraryConfig, PoolConfig, StrategyConfig, ThumbnailConfig, TitleConfig};
pub use error::{ConfigError, StoreError};
pub use natural::{natural_cmp, natural_cmp_paths};
pub use types::{
    Book, BookId, BookState, Category, CategoryId, Classification, Entry, EntryKind, Fingerprint,
    OptimizationStrategy, Page, PageDimensions, SourceKind, ThumbKey,
};

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to `0` if the system clock is set before the epoch.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
