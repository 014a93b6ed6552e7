//! Scan orchestration.
//!
//! [`ScanScheduler`] owns the process-wide scan state: at most one scan runs
//! at a time, and a trigger while one is active fails with
//! [`ScanError::ScanInProgress`] without walking anything.
//!
//! A scan runs on its own thread:
//!
//! 1. Walk and classify the root ([`DirectoryWalker`])
//! 2. Build each candidate and render its cover on the [`WorkerPool`]
//! 3. Order results by walk ordinal, diff against the catalog and apply
//!
//! Progress is observable through the returned [`ScanHandle`] and, when a
//! sender is supplied, as [`ScanUpdate`] events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use shelf_core::{unix_now, Book, CatalogStore, Config};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::builder::BookBuilder;
use crate::classifier::PathClassifier;
use crate::error::ScanError;
use crate::pool::WorkerPool;
use crate::reconcile::{apply, reconcile, ApplyReport};
use crate::render::ThumbnailRenderer;
use crate::stats::{ScanStats, StatsSnapshot};
use crate::walker::{Candidate, DirectoryWalker};
use crate::ScanUpdate;

/// Finished scans kept for [`ScanScheduler::handle`] lookups.
const RECENT_SCANS: u64 = 16;

/// Lifecycle of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Still walking, building or reconciling.
    Running,
    /// Finished and reconciled.
    Completed,
    /// Stopped by a fatal error; nothing was reconciled.
    Failed,
    /// Stopped on request; completed work was upserted, nothing deleted.
    Cancelled,
}

impl ScanState {
    /// Returns `true` once the scan has stopped.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Point-in-time view of a scan.
#[derive(Debug, Clone)]
pub struct ScanStatus {
    /// Scan id.
    pub id: u64,
    /// Root being scanned.
    pub root: Utf8PathBuf,
    /// Current state.
    pub state: ScanState,
    /// Book candidates processed so far.
    pub processed: u64,
    /// Books produced so far.
    pub found: u64,
    /// Every recorded error, fatal or not.
    pub errors: Vec<ScanError>,
    /// Time since start, frozen once the scan stops.
    pub elapsed: Duration,
    /// All counters.
    pub stats: StatsSnapshot,
    /// Catalog changes, once reconciled.
    pub reconcile: Option<ApplyReport>,
}

#[derive(Debug)]
struct Progress {
    state: ScanState,
    errors: Vec<ScanError>,
    finished_in: Option<Duration>,
    reconcile: Option<ApplyReport>,
}

#[derive(Debug)]
struct ScanShared {
    id: u64,
    root: Utf8PathBuf,
    started: Instant,
    cancel: AtomicBool,
    stats: ScanStats,
    progress: Mutex<Progress>,
    done: Condvar,
}

impl ScanShared {
    fn record(&self, err: ScanError) {
        self.stats.add_errors(1);
        self.progress.lock().errors.push(err);
    }

    fn finish(&self, state: ScanState, reconcile: Option<ApplyReport>) {
        let mut progress = self.progress.lock();
        progress.state = state;
        progress.reconcile = reconcile;
        progress.finished_in = Some(self.started.elapsed());
        self.done.notify_all();
    }

    fn status(&self) -> ScanStatus {
        let progress = self.progress.lock();
        let stats = self.stats.snapshot();
        ScanStatus {
            id: self.id,
            root: self.root.clone(),
            state: progress.state,
            processed: stats.processed(),
            found: stats.books,
            errors: progress.errors.clone(),
            elapsed: progress
                .finished_in
                .unwrap_or_else(|| self.started.elapsed()),
            stats,
            reconcile: progress.reconcile.clone(),
        }
    }
}

/// A handle on a running or finished scan.
///
/// Cloning is cheap; clones observe the same scan.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    shared: Arc<ScanShared>,
}

impl ScanHandle {
    /// Scan id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Requests cancellation. Workers stop between candidates.
    pub fn cancel(&self) {
        if !self.shared.cancel.swap(true, Ordering::SeqCst) {
            info!(scan = self.shared.id, "Scan cancellation requested");
        }
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ScanStatus {
        self.shared.status()
    }

    /// Returns `true` once the scan has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.progress.lock().state.is_terminal()
    }

    /// Blocks until the scan stops.
    pub fn wait(&self) -> ScanStatus {
        let mut progress = self.shared.progress.lock();
        while !progress.state.is_terminal() {
            self.shared.done.wait(&mut progress);
        }
        drop(progress);
        self.shared.status()
    }

    /// Blocks until the scan stops or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ScanStatus> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress.lock();
        while !progress.state.is_terminal() {
            if self
                .shared
                .done
                .wait_until(&mut progress, deadline)
                .timed_out()
            {
                return None;
            }
        }
        drop(progress);
        Some(self.shared.status())
    }
}

/// Clears the single-active-scan flag when dropped.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs library scans, one at a time.
pub struct ScanScheduler {
    active: Arc<AtomicBool>,
    next_id: AtomicU64,
    pool: WorkerPool,
    renderer: Arc<ThumbnailRenderer>,
    store: Arc<dyn CatalogStore>,
    scans: Mutex<FxHashMap<u64, ScanHandle>>,
}

impl std::fmt::Debug for ScanScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanScheduler")
            .field("active", &self.is_active())
            .field("pool", &self.pool)
            .field("renderer", &self.renderer)
            .finish_non_exhaustive()
    }
}

impl ScanScheduler {
    /// Creates a scheduler that writes to `store` and renders with `renderer`.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn CatalogStore>,
        renderer: Arc<ThumbnailRenderer>,
    ) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
            pool: WorkerPool::new(&config.pool),
            renderer,
            store,
            scans: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns `true` while a scan is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The worker pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Looks up a recent scan by id.
    #[must_use]
    pub fn handle(&self, id: u64) -> Option<ScanHandle> {
        self.scans.lock().get(&id).cloned()
    }

    /// Starts scanning `root` and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::ScanInProgress`] if a scan is running, or
    /// [`ScanError::Config`] if the configuration is unusable. Problems with
    /// the root itself are reported through the handle as a failed scan.
    pub fn run_scan(
        &self,
        root: &Utf8Path,
        config: &Config,
        updates: Option<mpsc::Sender<ScanUpdate>>,
    ) -> Result<ScanHandle, ScanError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(root = %root, "Scan rejected, another scan is running");
            return Err(ScanError::ScanInProgress);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let classifier = PathClassifier::new(&config.library)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(ScanShared {
            id,
            root: root.to_owned(),
            started: Instant::now(),
            cancel: AtomicBool::new(false),
            stats: ScanStats::new(),
            progress: Mutex::new(Progress {
                state: ScanState::Running,
                errors: Vec::new(),
                finished_in: None,
                reconcile: None,
            }),
            done: Condvar::new(),
        });

        let job = ScanJob {
            shared: Arc::clone(&shared),
            walker: DirectoryWalker::new(root, classifier)
                .with_follow_links(config.library.follow_links),
            builder: BookBuilder::new(config),
            cover_width: config.thumbnails.cover_width,
            pool: self.pool.clone(),
            renderer: Arc::clone(&self.renderer),
            store: Arc::clone(&self.store),
            updates,
        };

        std::thread::Builder::new()
            .name("shelf-scan".to_owned())
            .spawn(move || job.run(guard))
            .map_err(|e| ScanError::config(format!("cannot start scan thread: {e}")))?;

        let handle = ScanHandle { shared };
        let mut scans = self.scans.lock();
        scans.retain(|&old, _| old + RECENT_SCANS > id);
        scans.insert(id, handle.clone());
        info!(scan = id, root = %root, "Scan started");
        Ok(handle)
    }
}

struct ScanJob {
    shared: Arc<ScanShared>,
    walker: DirectoryWalker,
    builder: BookBuilder,
    cover_width: u32,
    pool: WorkerPool,
    renderer: Arc<ThumbnailRenderer>,
    store: Arc<dyn CatalogStore>,
    updates: Option<mpsc::Sender<ScanUpdate>>,
}

impl ScanJob {
    fn send(&self, update: ScanUpdate) {
        if let Some(tx) = &self.updates {
            // A dropped receiver only stops the stream, not the scan.
            let _ = tx.blocking_send(update);
        }
    }

    fn warn(&self, err: ScanError) {
        self.shared.record(err.clone());
        self.send(ScanUpdate::Warning(err));
    }

    fn run(self, guard: ActiveGuard) {
        let (state, report) = self.execute();
        drop(guard);
        self.shared.finish(state, report);

        let status = self.shared.status();
        info!(
            scan = status.id,
            state = ?status.state,
            found = status.found,
            errors = status.errors.len(),
            elapsed_ms = status.elapsed.as_millis() as u64,
            "Scan finished"
        );
        self.send(ScanUpdate::Complete(status));
    }

    fn execute(&self) -> (ScanState, Option<ApplyReport>) {
        let output = match self.walker.walk() {
            Ok(output) => output,
            Err(err) => {
                error!(root = %self.walker.root(), error = %err, "Scan failed");
                self.shared.record(err);
                return (ScanState::Failed, None);
            }
        };
        self.shared.stats.add_entries(output.entries_seen);
        for warning in &output.warnings {
            self.warn(warning.clone());
        }

        let categories = output.categories();
        let candidates = output.candidates();
        self.shared.stats.add_candidates(candidates.len() as u64);
        info!(
            books = candidates.len(),
            categories = categories.len(),
            entries = output.entries_seen,
            "Walk complete"
        );
        self.send(ScanUpdate::CandidatesDiscovered {
            books: candidates.len(),
            categories: categories.len(),
        });

        let lease = match self.pool.acquire() {
            Ok(lease) => lease,
            Err(err) => {
                error!(error = %err, "Scan failed");
                self.shared.record(err);
                return (ScanState::Failed, None);
            }
        };
        // Indexed collect keeps walk order regardless of completion order.
        let outcomes: Vec<Option<Book>> =
            lease.install(|| candidates.par_iter().map(|c| self.process(c)).collect());
        drop(lease);
        let books: Vec<Book> = outcomes.into_iter().flatten().collect();

        let previous = match self.store.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "Cannot read catalog");
                self.shared.record(ScanError::conflict("snapshot", &err));
                return (ScanState::Failed, None);
            }
        };
        let cancelled = self.shared.cancel.load(Ordering::SeqCst);

        let mut plan = reconcile(&previous, &books, &categories);
        if cancelled {
            plan = plan.without_deletes();
        }
        let report = apply(&plan, self.store.as_ref(), Some(self.renderer.store().as_ref()));
        for conflict in &report.conflicts {
            self.warn(conflict.clone());
        }

        let state = if cancelled {
            ScanState::Cancelled
        } else {
            ScanState::Completed
        };
        (state, Some(report))
    }

    /// Builds one candidate and renders its cover. `None` if skipped or
    /// rejected.
    fn process(&self, candidate: &Candidate) -> Option<Book> {
        if self.shared.cancel.load(Ordering::SeqCst) {
            return None;
        }

        let built = match self.builder.build(candidate) {
            Ok(built) => built,
            Err(err) => {
                warn!(path = %candidate.entry.path, error = %err, "Book candidate rejected");
                self.shared.stats.increment_failed();
                self.shared.record(err.clone());
                self.send(ScanUpdate::BookFailed {
                    path: candidate.entry.path.clone(),
                    error: err,
                });
                return None;
            }
        };

        let mut book = built.book;
        for warning in built.warnings {
            warn!(path = %book.path, error = %warning, "Book degraded");
            self.warn(warning);
        }

        if let Some(source) = book.cover_source().map(Utf8Path::to_owned) {
            match self.renderer.render(&source, self.cover_width) {
                Ok(cover) => {
                    book.cover = Some(cover.key);
                    self.shared.stats.increment_covers();
                }
                Err(err) => {
                    warn!(path = %source, error = %err, "Cover render failed, placeholder will be used");
                    self.warn(ScanError::render(source, err));
                }
            }
        }

        book.last_scanned = unix_now();
        self.shared.stats.increment_books();
        debug!(path = %book.path, pages = book.pages.len(), "Book scanned");
        self.send(ScanUpdate::BookScanned(Box::new(book.clone())));
        Some(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ScanState::Running.is_terminal());
        assert!(ScanState::Completed.is_terminal());
        assert!(ScanState::Failed.is_terminal());
        assert!(ScanState::Cancelled.is_terminal());
    }

    #[test]
    fn test_missing_root_fails_scan_and_releases_flag() {
        let config = Config::default();
        let store: Arc<dyn CatalogStore> = Arc::new(shelf_core::MemoryCatalog::new());
        let renderer = Arc::new(ThumbnailRenderer::new(
            &config.thumbnails,
            Arc::new(crate::cache::MemoryThumbnailStore::new()),
        ));
        let scheduler = ScanScheduler::new(&config, store, renderer);

        let handle = scheduler
            .run_scan(Utf8Path::new("/no/such/library"), &config, None)
            .unwrap();
        let status = handle.wait();
        assert_eq!(status.state, ScanState::Failed);
        assert!(matches!(
            status.errors.as_slice(),
            [ScanError::RootUnavailable { .. }]
        ));
        assert!(!scheduler.is_active());
        assert_eq!(scheduler.handle(handle.id()).map(|h| h.id()), Some(handle.id()));
    }
}
