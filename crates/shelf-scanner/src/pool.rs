//! Lazily created, idle-retired worker pool.
//!
//! [`WorkerPool`] owns a `rayon` thread pool that is built on first use and
//! dropped by a background reaper once it has been idle (no outstanding
//! [`PoolLease`]) for the configured timeout. The next
//! [`acquire`](WorkerPool::acquire) builds a fresh one.

use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use shelf_core::PoolConfig;
use tracing::{debug, info, warn};

use crate::error::ScanError;

/// Longest pause between reaper checks.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest pause between reaper checks.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct PoolState {
    pool: Option<Arc<ThreadPool>>,
    last_used: Instant,
    active: usize,
    reaper_running: bool,
}

#[derive(Debug)]
struct PoolInner {
    workers: usize,
    idle_timeout: Duration,
    state: Mutex<PoolState>,
}

/// A shared, lazily built thread pool.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Examples
///
/// ```
/// use shelf_core::PoolConfig;
/// use shelf_scanner::WorkerPool;
///
/// let pool = WorkerPool::new(&PoolConfig::default());
/// assert!(!pool.is_alive());
///
/// let lease = pool.acquire()?;
/// assert_eq!(lease.current_num_threads(), 2);
/// assert!(pool.is_alive());
/// # Ok::<(), shelf_scanner::ScanError>(())
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates an unstarted pool.
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                workers: config.effective_workers(),
                idle_timeout: config.idle_timeout(),
                state: Mutex::new(PoolState {
                    pool: None,
                    last_used: Instant::now(),
                    active: 0,
                    reaper_running: false,
                }),
            }),
        }
    }

    /// Number of threads the pool runs with.
    #[inline]
    #[must_use]
    pub fn threads(&self) -> usize {
        self.inner.workers
    }

    /// Returns `true` if the thread pool currently exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.state.lock().pool.is_some()
    }

    /// Borrows the pool, building it if needed.
    ///
    /// The pool is not retired while any lease is alive.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] if the threads cannot be spawned.
    pub fn acquire(&self) -> Result<PoolLease, ScanError> {
        let mut state = self.inner.state.lock();
        let pool = match &state.pool {
            Some(pool) => Arc::clone(pool),
            None => {
                let pool = Arc::new(
                    ThreadPoolBuilder::new()
                        .num_threads(self.inner.workers)
                        .thread_name(|i| format!("shelf-worker-{i}"))
                        .build()
                        .map_err(|e| ScanError::config(format!("cannot start worker pool: {e}")))?,
                );
                info!(threads = self.inner.workers, "Worker pool started");
                state.pool = Some(Arc::clone(&pool));
                pool
            }
        };
        state.active += 1;
        state.last_used = Instant::now();
        if !state.reaper_running {
            state.reaper_running = self.spawn_reaper();
        }

        Ok(PoolLease {
            pool,
            owner: Arc::clone(&self.inner),
        })
    }

    /// Drops the pool now if it has been idle for the timeout.
    ///
    /// Returns `true` if the pool was retired.
    pub fn retire_if_idle(&self) -> bool {
        retire_if_idle(&self.inner)
    }

    fn spawn_reaper(&self) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let interval = self
            .inner
            .idle_timeout
            .min(MAX_REAP_INTERVAL)
            .max(MIN_REAP_INTERVAL);

        let spawned = std::thread::Builder::new()
            .name("shelf-pool-reaper".to_owned())
            .spawn(move || reap(&weak, interval));
        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Cannot start pool reaper; pool stays alive");
                false
            }
        }
    }
}

fn reap(weak: &Weak<PoolInner>, interval: Duration) {
    loop {
        std::thread::sleep(interval);
        let Some(inner) = weak.upgrade() else {
            return;
        };
        retire_if_idle(&inner);

        let mut state = inner.state.lock();
        if state.pool.is_none() {
            state.reaper_running = false;
            return;
        }
    }
}

fn retire_if_idle(inner: &PoolInner) -> bool {
    let mut state = inner.state.lock();
    if state.pool.is_some() && state.active == 0 && state.last_used.elapsed() >= inner.idle_timeout
    {
        state.pool = None;
        info!(idle_secs = inner.idle_timeout.as_secs(), "Worker pool retired");
        return true;
    }
    false
}

/// A borrowed handle on the live thread pool.
///
/// Dereferences to [`rayon::ThreadPool`].
#[derive(Debug)]
pub struct PoolLease {
    pool: Arc<ThreadPool>,
    owner: Arc<PoolInner>,
}

impl Deref for PoolLease {
    type Target = ThreadPool;

    fn deref(&self) -> &ThreadPool {
        &self.pool
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        let mut state = self.owner.state.lock();
        state.active = state.active.saturating_sub(1);
        state.last_used = Instant::now();
        debug!(active = state.active, "Worker pool lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, workers: usize, idle_timeout_secs: u64) -> PoolConfig {
        PoolConfig {
            enabled,
            max_workers: workers,
            idle_timeout_secs,
        }
    }

    #[test]
    fn test_lazy_creation() {
        let pool = WorkerPool::new(&config(true, 3, 60));
        assert!(!pool.is_alive());
        let lease = pool.acquire().unwrap();
        assert_eq!(lease.current_num_threads(), 3);
        assert!(pool.is_alive());
    }

    #[test]
    fn test_disabled_pool_is_single_threaded() {
        let pool = WorkerPool::new(&config(false, 8, 60));
        assert_eq!(pool.threads(), 1);
        let name = pool
            .acquire()
            .unwrap()
            .install(|| std::thread::current().name().map(str::to_owned));
        assert_eq!(name.as_deref(), Some("shelf-worker-0"));
    }

    #[test]
    fn test_not_retired_while_leased() {
        let pool = WorkerPool::new(&config(true, 1, 0));
        let lease = pool.acquire().unwrap();
        assert!(!pool.retire_if_idle());
        drop(lease);
        // The reaper may get there first.
        pool.retire_if_idle();
        assert!(!pool.is_alive());

        // Recreated on next use.
        let _lease = pool.acquire().unwrap();
        assert!(pool.is_alive());
    }

    #[test]
    fn test_reaper_retires_idle_pool() {
        let pool = WorkerPool::new(&config(true, 1, 0));
        drop(pool.acquire().unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!pool.is_alive());
    }
}
