//! Thumbnail caching.
//!
//! This module provides the [`ThumbnailStore`] abstraction keyed by
//! [`ThumbKey`] (content fingerprint + width), two implementations, the
//! explicit [`EvictionPolicy`] contract, and [`SingleFlight`], which collapses
//! concurrent computations of the same key into one.
//!
//! # Safety Pattern
//!
//! To avoid `DashMap` deadlocks, [`MemoryThumbnailStore`]:
//!
//! - **Never exposes `Ref` types** publicly
//! - **Clones data** on `get()` operations (the bytes are behind an `Arc`)
//! - **Collects before removing** during eviction
//!
//! A cache entry is disposable: unreadable or non-JPEG bytes on disk are
//! reported as a miss, never as an error.

use std::fmt;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use shelf_core::{unix_now, ThumbKey};
use tracing::{debug, warn};

/// A cached thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedThumbnail {
    /// Encoded JPEG bytes.
    pub bytes: Arc<[u8]>,
    /// Unix seconds when the thumbnail was stored.
    pub generated_at: u64,
}

/// Which entries an eviction pass removes.
///
/// Entries older than `max_age` go first; then, while the total exceeds
/// `max_bytes`, the oldest remaining entries are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Maximum entry age.
    pub max_age: Option<Duration>,
    /// Maximum total size of all entries.
    pub max_bytes: Option<u64>,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Entries removed.
    pub removed: u64,
    /// Bytes freed.
    pub freed_bytes: u64,
    /// Entries left.
    pub remaining: u64,
    /// Bytes left.
    pub remaining_bytes: u64,
}

/// Keyed storage for rendered thumbnails.
///
/// Implementations are shared between scan workers and must be thread-safe.
pub trait ThumbnailStore: Send + Sync + fmt::Debug {
    /// Returns the entry for `key`, or `None` on a miss.
    fn get(&self, key: &ThumbKey) -> Option<CachedThumbnail>;

    /// Stores bytes under `key`, replacing any previous entry.
    fn put(&self, key: ThumbKey, bytes: Arc<[u8]>) -> io::Result<()>;

    /// Returns `true` if an entry exists for `key`.
    fn contains(&self, key: &ThumbKey) -> bool;

    /// Removes the entry for `key`. Removing a missing entry succeeds.
    fn remove(&self, key: &ThumbKey) -> io::Result<()>;

    /// Applies an eviction policy at time `now` (Unix seconds).
    fn evict(&self, policy: &EvictionPolicy, now: u64) -> io::Result<EvictionReport>;
}

#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    key: ThumbKey,
    generated_at: u64,
    size: u64,
}

/// Chooses which entries to remove. Oldest first; ties broken by key name.
fn plan_eviction(
    mut entries: Vec<EntryMeta>,
    policy: &EvictionPolicy,
    now: u64,
) -> (Vec<EntryMeta>, EvictionReport) {
    entries.sort_by(|a, b| {
        a.generated_at
            .cmp(&b.generated_at)
            .then_with(|| a.key.file_name().cmp(&b.key.file_name()))
    });

    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    let mut doomed = Vec::new();
    let mut kept = Vec::with_capacity(entries.len());

    for entry in entries {
        let expired = policy
            .max_age
            .is_some_and(|age| now.saturating_sub(entry.generated_at) > age.as_secs());
        if expired {
            total -= entry.size;
            doomed.push(entry);
        } else {
            kept.push(entry);
        }
    }

    if let Some(limit) = policy.max_bytes {
        let mut rest = kept.into_iter();
        kept = Vec::new();
        for entry in rest.by_ref() {
            if total <= limit {
                kept.push(entry);
                break;
            }
            total -= entry.size;
            doomed.push(entry);
        }
        kept.extend(rest);
    }

    let report = EvictionReport {
        removed: doomed.len() as u64,
        freed_bytes: doomed.iter().map(|e| e.size).sum(),
        remaining: kept.len() as u64,
        remaining_bytes: total,
    };
    (doomed, report)
}

/// A thread-safe in-memory [`ThumbnailStore`] backed by [`DashMap`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use shelf_core::{Fingerprint, ThumbKey};
/// use shelf_scanner::{MemoryThumbnailStore, ThumbnailStore};
///
/// let store = MemoryThumbnailStore::new();
/// let key = ThumbKey::new(Fingerprint::from_bytes([1; 32]), 300);
/// store.put(key, Arc::from(&b"\xff\xd8\xff\xd9"[..])).unwrap();
///
/// assert!(store.contains(&key));
/// ```
#[derive(Debug, Default)]
pub struct MemoryThumbnailStore {
    entries: DashMap<ThumbKey, CachedThumbnail>,
}

impl MemoryThumbnailStore {
    /// Creates a new empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached thumbnails.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ThumbnailStore for MemoryThumbnailStore {
    fn get(&self, key: &ThumbKey) -> Option<CachedThumbnail> {
        self.entries.get(key).map(|r| r.clone())
    }

    fn put(&self, key: ThumbKey, bytes: Arc<[u8]>) -> io::Result<()> {
        self.entries.insert(
            key,
            CachedThumbnail {
                bytes,
                generated_at: unix_now(),
            },
        );
        Ok(())
    }

    fn contains(&self, key: &ThumbKey) -> bool {
        self.entries.contains_key(key)
    }

    fn remove(&self, key: &ThumbKey) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn evict(&self, policy: &EvictionPolicy, now: u64) -> io::Result<EvictionReport> {
        let metas: Vec<EntryMeta> = self
            .entries
            .iter()
            .map(|r| EntryMeta {
                key: *r.key(),
                generated_at: r.generated_at,
                size: r.bytes.len() as u64,
            })
            .collect();

        let (doomed, report) = plan_eviction(metas, policy, now);
        for entry in doomed {
            self.entries.remove(&entry.key);
        }
        Ok(report)
    }
}

/// Disambiguates temporary file names within one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An on-disk [`ThumbnailStore`]: one `<hex>-<width>.jpg` file per entry.
///
/// Writes go to a temporary file that is renamed into place, so readers
/// never see a partial thumbnail.
#[derive(Debug, Clone)]
pub struct DiskThumbnailStore {
    dir: Utf8PathBuf,
}

impl DiskThumbnailStore {
    /// Opens (and creates if needed) a cache directory.
    pub fn open(dir: &Utf8Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_owned(),
        })
    }

    /// Returns the cache directory.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn path_for(&self, key: &ThumbKey) -> Utf8PathBuf {
        self.dir.join(key.file_name())
    }

    fn read_entries(&self) -> io::Result<Vec<EntryMeta>> {
        let mut metas = Vec::new();
        for dent in fs::read_dir(&self.dir)? {
            let dent = dent?;
            let Some(key) = dent.file_name().to_str().and_then(ThumbKey::from_file_name) else {
                continue;
            };
            let Ok(meta) = dent.metadata() else {
                continue;
            };
            metas.push(EntryMeta {
                key,
                generated_at: modified_secs(&meta),
                size: meta.len(),
            });
        }
        Ok(metas)
    }
}

fn modified_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

/// Returns `true` if the bytes look like a complete JPEG stream.
#[must_use]
pub fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes.starts_with(&[0xFF, 0xD8, 0xFF]) && bytes.ends_with(&[0xFF, 0xD9])
}

impl ThumbnailStore for DiskThumbnailStore {
    fn get(&self, key: &ThumbKey) -> Option<CachedThumbnail> {
        let path = self.path_for(key);
        let bytes = fs::read(&path).ok()?;
        if !looks_like_jpeg(&bytes) {
            warn!(path = %path, "Discarding corrupt cached thumbnail");
            let _ = fs::remove_file(&path);
            return None;
        }
        let generated_at = fs::metadata(&path).map_or(0, |m| modified_secs(&m));
        Some(CachedThumbnail {
            bytes: Arc::from(bytes),
            generated_at,
        })
    }

    fn put(&self, key: ThumbKey, bytes: Arc<[u8]>) -> io::Result<()> {
        let path = self.path_for(&key);
        let tmp = self.dir.join(format!(
            ".{}.{}-{}.tmp",
            key.file_name(),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    fn contains(&self, key: &ThumbKey) -> bool {
        self.path_for(key).is_file()
    }

    fn remove(&self, key: &ThumbKey) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn evict(&self, policy: &EvictionPolicy, now: u64) -> io::Result<EvictionReport> {
        let (doomed, report) = plan_eviction(self.read_entries()?, policy, now);
        for entry in &doomed {
            self.remove(&entry.key)?;
        }
        debug!(dir = %self.dir, removed = report.removed, freed = report.freed_bytes, "Evicted thumbnails");
        Ok(report)
    }
}

enum FlightState<V> {
    Pending,
    Done(V),
    Abandoned,
}

struct Flight<V> {
    state: Mutex<FlightState<V>>,
    ready: Condvar,
}

/// Collapses concurrent computations of the same key into one.
///
/// The first caller for a key (the leader) runs the computation; callers
/// arriving while it runs block and receive a clone of the leader's result.
/// Once the leader finishes the key is forgotten, so later callers start a
/// fresh flight (and are expected to find the result in a cache).
///
/// # Examples
///
/// ```
/// use shelf_scanner::SingleFlight;
///
/// let flights: SingleFlight<u32, String> = SingleFlight::new();
/// assert_eq!(flights.run(7, || "seven".to_owned()), "seven");
/// ```
pub struct SingleFlight<K, V> {
    inflight: Mutex<FxHashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("inflight", &self.inflight.lock().len())
            .finish()
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(FxHashMap::default()),
        }
    }
}

/// Publishes `Abandoned` if the leader unwinds before completing.
struct LeaderGuard<'a, K: Eq + std::hash::Hash, V> {
    owner: &'a SingleFlight<K, V>,
    key: Option<K>,
    flight: Arc<Flight<V>>,
}

impl<K: Eq + std::hash::Hash, V> LeaderGuard<'_, K, V> {
    fn finish(mut self, value: V) {
        *self.flight.state.lock() = FlightState::Done(value);
        self.flight.ready.notify_all();
        if let Some(key) = self.key.take() {
            self.owner.inflight.lock().remove(&key);
        }
    }
}

impl<K: Eq + std::hash::Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            *self.flight.state.lock() = FlightState::Abandoned;
            self.flight.ready.notify_all();
            self.owner.inflight.lock().remove(&key);
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + std::hash::Hash + Clone,
    V: Clone,
{
    /// Creates an empty flight table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `compute` for `key` unless a flight for `key` is already running,
    /// in which case waits for and returns that flight's result.
    pub fn run<F: FnOnce() -> V>(&self, key: K, compute: F) -> V {
        let mut compute = Some(compute);
        loop {
            let (flight, leader) = {
                let mut inflight = self.inflight.lock();
                if let Some(existing) = inflight.get(&key) {
                    (Arc::clone(existing), false)
                } else {
                    let flight = Arc::new(Flight {
                        state: Mutex::new(FlightState::Pending),
                        ready: Condvar::new(),
                    });
                    inflight.insert(key.clone(), Arc::clone(&flight));
                    (flight, true)
                }
            };

            if leader {
                if let Some(compute) = compute.take() {
                    let guard = LeaderGuard {
                        owner: self,
                        key: Some(key.clone()),
                        flight: Arc::clone(&flight),
                    };
                    let value = compute();
                    guard.finish(value.clone());
                    return value;
                }
            }

            let mut state = flight.state.lock();
            loop {
                match &*state {
                    FlightState::Done(value) => return value.clone(),
                    FlightState::Abandoned => break,
                    FlightState::Pending => flight.ready.wait(&mut state),
                }
            }
        }
    }

    /// Number of flights currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use shelf_core::Fingerprint;

    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0xFF, 0xD9];

    fn key(n: u8, width: u32) -> ThumbKey {
        ThumbKey::new(Fingerprint::from_bytes([n; 32]), width)
    }

    #[test]
    fn test_disk_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskThumbnailStore::open(Utf8Path::from_path(dir.path()).unwrap()).unwrap();

        store.put(key(1, 300), Arc::from(JPEG)).unwrap();
        assert!(store.contains(&key(1, 300)));
        assert!(!store.contains(&key(1, 600)));
        assert_eq!(&*store.get(&key(1, 300)).unwrap().bytes, JPEG);

        store.remove(&key(1, 300)).unwrap();
        store.remove(&key(1, 300)).unwrap();
        assert!(store.get(&key(1, 300)).is_none());
    }

    #[test]
    fn test_disk_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskThumbnailStore::open(Utf8Path::from_path(dir.path()).unwrap()).unwrap();
        let k = key(2, 100);
        fs::write(store.dir().join(k.file_name()), b"not a jpeg").unwrap();

        assert!(store.get(&k).is_none());
        assert!(!store.contains(&k));
    }

    #[test]
    fn test_plan_eviction_age_then_size() {
        let entries = vec![
            EntryMeta { key: key(1, 1), generated_at: 100, size: 10 },
            EntryMeta { key: key(2, 1), generated_at: 200, size: 10 },
            EntryMeta { key: key(3, 1), generated_at: 300, size: 10 },
            EntryMeta { key: key(4, 1), generated_at: 400, size: 10 },
        ];
        let policy = EvictionPolicy {
            max_age: Some(Duration::from_secs(250)),
            max_bytes: Some(15),
        };
        let (doomed, report) = plan_eviction(entries, &policy, 400);
        let removed: Vec<u64> = doomed.iter().map(|e| e.generated_at).collect();
        assert_eq!(removed, [100, 200, 300]);
        assert_eq!(report.remaining, 1);
        assert_eq!(report.remaining_bytes, 10);
        assert_eq!(report.freed_bytes, 30);
    }

    #[test]
    fn test_memory_evict_by_size() {
        let store = MemoryThumbnailStore::new();
        store.put(key(1, 1), Arc::from(JPEG)).unwrap();
        store.put(key(2, 1), Arc::from(JPEG)).unwrap();
        let policy = EvictionPolicy {
            max_age: None,
            max_bytes: Some(JPEG.len() as u64),
        };
        let report = store.evict(&policy, unix_now()).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_single_flight_runs_once() {
        let flights: Arc<SingleFlight<u32, u64>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flights = Arc::clone(&flights);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    flights.run(1, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(100));
                        42
                    })
                })
            })
            .collect();

        let results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|&r| r == 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }
}
