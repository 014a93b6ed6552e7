//! SQLite persistence for the shelf catalog.
//!
//! [`SqliteCatalog`] implements [`CatalogStore`](shelf_core::CatalogStore)
//! with three tables:
//!
//! - `categories`: one row per category, `parent_id` references the parent
//! - `books`: one row per book; pages, cover key and state are JSON columns
//! - `favorites`: book ids, removed with their book by `ON DELETE CASCADE`
//!
//! Upserts use `INSERT .. ON CONFLICT DO UPDATE`, which keeps the existing
//! row and therefore its favorite. List queries are returned in natural
//! filename order, matching [`MemoryCatalog`](shelf_core::MemoryCatalog).

#![deny(clippy::all)]
#![warn(missing_docs)]

mod catalog;
mod rows;
mod schema;

pub use catalog::SqliteCatalog;
pub use schema::SCHEMA_VERSION;
