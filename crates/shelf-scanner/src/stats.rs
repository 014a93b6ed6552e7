//! Progress counters shared by the walker, the workers and the status API.
//!
//! Workers bump [`ScanStats`] concurrently; readers take a [`StatsSnapshot`].
//! Every counter is a relaxed atomic, so a snapshot may mix values from
//! slightly different instants. That is fine for progress reporting.
//!
//! # Examples
//!
//! ```
//! use shelf_scanner::ScanStats;
//!
//! let stats = ScanStats::new();
//! stats.add_candidates(4);
//! stats.increment_books();
//!
//! let snapshot = stats.snapshot();
//! assert!((snapshot.progress_percent() - 25.0).abs() < 0.1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters for one scan.
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Filesystem entries inspected by the walker.
    entries: AtomicU64,
    /// Book candidates handed to workers.
    candidates: AtomicU64,
    /// Candidates that produced a book (degraded ones included).
    books: AtomicU64,
    /// Candidates that were rejected.
    failed: AtomicU64,
    /// Covers obtained from the renderer (cache hits included).
    covers: AtomicU64,
    /// Recorded errors of any kind.
    errors: AtomicU64,
}

impl ScanStats {
    /// Zeroed counters.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `n` walked entries.
    #[inline]
    pub fn add_entries(&self, n: u64) {
        self.entries.fetch_add(n, Ordering::Relaxed);
    }

    /// Records `n` discovered candidates.
    #[inline]
    pub fn add_candidates(&self, n: u64) {
        self.candidates.fetch_add(n, Ordering::Relaxed);
    }

    /// One candidate became a book.
    #[inline]
    pub fn increment_books(&self) {
        self.books.fetch_add(1, Ordering::Relaxed);
    }

    /// One candidate was rejected.
    #[inline]
    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// One cover was produced or reused.
    #[inline]
    pub fn increment_covers(&self) {
        self.covers.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `n` errors.
    #[inline]
    pub fn add_errors(&self, n: u64) {
        self.errors.fetch_add(n, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            entries: self.entries.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            books: self.books.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            covers: self.covers.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`ScanStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Filesystem entries inspected.
    pub entries: u64,
    /// Book candidates discovered.
    pub candidates: u64,
    /// Books produced.
    pub books: u64,
    /// Candidates rejected.
    pub failed: u64,
    /// Covers produced.
    pub covers: u64,
    /// Errors recorded.
    pub errors: u64,
}

impl StatsSnapshot {
    /// Candidates finished, successfully or not.
    #[inline]
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.books + self.failed
    }

    /// Percentage of candidates processed; 100 when there are none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.candidates == 0 {
            return 100.0;
        }
        (self.processed() as f64 / self.candidates as f64) * 100.0
    }
}
