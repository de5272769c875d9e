use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;
use tokio::sync::Notify;

use crate::fs::DirLister;

/// Load state of one directory record.
enum LoadState {
    /// Never loaded, or invalidated since the last load.
    Unloaded,
    /// A listing is in flight. Joiners wait on the record's `Notify`.
    Loading,
    /// The on-disk entry names as of the last load.
    Loaded(Arc<BTreeSet<String>>),
    /// The directory did not exist at the last load. The record is removed
    /// from the map in the same step, so this is only ever observed by
    /// queries that joined the load; it is never served to later queries.
    Missing,
}

struct DirRecord {
    state: Mutex<LoadState>,
    /// Bumped by every invalidation. A load that was claimed before an
    /// invalidation finishes by storing `Unloaded` instead of `Loaded`, so
    /// the next query lists again.
    generation: AtomicU64,
    /// Wakes joiners when `state` leaves `Loading`.
    notify: Notify,
}

impl DirRecord {
    fn new() -> Self {
        Self {
            state: Mutex::new(LoadState::Unloaded),
            generation: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }
}

/// Per-directory cache of on-disk entry names, loaded lazily through the
/// injected [`DirLister`].
///
/// Listings are the expensive operation and every sibling file resolved
/// during a build re-queries the same directory, so caching is per directory
/// rather than per file. Invalidation is also per directory: watchers report
/// directory-level events, and reloading a directory that didn't change is
/// safe while serving a stale listing is not.
///
/// Concurrent queries for the same not-yet-cached directory share a single
/// in-flight listing: the first query claims the load, the rest park on the
/// record's `Notify` until it completes.
pub struct DirEntryCache<F> {
    fs: F,
    dirs: Mutex<HashMap<PathBuf, Arc<DirRecord>>>,
}

impl<F: DirLister> DirEntryCache<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            dirs: Mutex::new(HashMap::new()),
        }
    }

    /// The current entry names of `dir`, or `None` if it doesn't exist.
    ///
    /// Served from cache when a valid record exists; otherwise performs one
    /// listing via the filesystem capability. A missing directory is never
    /// cached: its record (and any records for its descendants) are dropped,
    /// and the next query lists again.
    ///
    /// Transient I/O errors propagate as `Err` and leave the record
    /// reloadable, so a later query retries the listing.
    pub async fn get(&self, dir: &Path) -> io::Result<Option<Arc<BTreeSet<String>>>> {
        loop {
            let record = self.record(dir);

            let claimed_generation = {
                let mut state = lock(&record.state);
                match &*state {
                    LoadState::Loaded(entries) => return Ok(Some(Arc::clone(entries))),
                    LoadState::Missing => return Ok(None),
                    LoadState::Loading => None,
                    LoadState::Unloaded => {
                        *state = LoadState::Loading;
                        Some(record.generation.load(Ordering::Acquire))
                    }
                }
            };

            match claimed_generation {
                Some(generation) => return self.load(dir, &record, generation).await,
                None => {
                    Self::wait_not_loading(&record).await;
                    // The record may have been invalidated or dropped from
                    // the map in the meantime; start over.
                }
            }
        }
    }

    /// Perform the listing for a claimed record and publish the result.
    async fn load(
        &self,
        dir: &Path,
        record: &DirRecord,
        claimed_generation: u64,
    ) -> io::Result<Option<Arc<BTreeSet<String>>>> {
        trace!("Listing directory: {}", dir.display());
        // If this future is dropped mid-listing the record must not stay
        // `Loading` forever; the guard releases the claim so another query
        // can take over.
        let mut claim = ClaimGuard { record, armed: true };
        let listed = self.fs.list_dir(dir).await;
        claim.armed = false;
        match listed {
            Ok(Some(names)) => {
                let entries = Arc::new(names);
                {
                    let mut state = lock(&record.state);
                    if record.generation.load(Ordering::Acquire) == claimed_generation {
                        *state = LoadState::Loaded(Arc::clone(&entries));
                    } else {
                        // Invalidated while listing. The result may already
                        // be stale, so don't cache it.
                        *state = LoadState::Unloaded;
                    }
                }
                record.notify.notify_waiters();
                Ok(Some(entries))
            }
            Ok(None) => {
                *lock(&record.state) = LoadState::Missing;
                record.notify.notify_waiters();
                self.drop_subtree(dir);
                Ok(None)
            }
            Err(err) => {
                *lock(&record.state) = LoadState::Unloaded;
                record.notify.notify_waiters();
                Err(err)
            }
        }
    }

    /// Mark the records for `path` and its parent stale.
    ///
    /// The parent is included because any change to `path` itself (created,
    /// deleted, renamed) also changes the parent's listing. Marking a
    /// directory that didn't actually change just costs one extra listing.
    ///
    /// Never fails; invalidating a path with no record is a no-op.
    pub fn invalidate(&self, path: &Path) {
        self.invalidate_one(path);
        if let Some(parent) = path.parent() {
            self.invalidate_one(parent);
        }
    }

    fn invalidate_one(&self, path: &Path) {
        let record = lock(&self.dirs).get(path).map(Arc::clone);
        let Some(record) = record else {
            return;
        };
        trace!("Invalidating: {}", path.display());
        record.generation.fetch_add(1, Ordering::Release);
        let mut state = lock(&record.state);
        match &*state {
            LoadState::Loaded(_) | LoadState::Missing => *state = LoadState::Unloaded,
            // An in-flight load already sees the generation bump and will
            // store `Unloaded` itself.
            LoadState::Loading | LoadState::Unloaded => {}
        }
    }

    /// Drop every cached record unconditionally. Used at the start of a
    /// fresh, non-incremental build, when the filesystem may have changed
    /// while nothing was watching.
    pub fn clear(&self) {
        lock(&self.dirs).clear();
    }

    /// Drop the record for `dir` and everything below it. A directory that
    /// no longer exists takes all of its descendants with it.
    fn drop_subtree(&self, dir: &Path) {
        lock(&self.dirs).retain(|path, _| !path.starts_with(dir));
    }

    fn record(&self, dir: &Path) -> Arc<DirRecord> {
        let mut dirs = lock(&self.dirs);
        Arc::clone(
            dirs.entry(dir.to_path_buf())
                .or_insert_with(|| Arc::new(DirRecord::new())),
        )
    }

    async fn wait_not_loading(record: &DirRecord) {
        loop {
            // Register with the Notify before re-checking the state, so a
            // notify_waiters() between the check and the await isn't lost.
            let mut notified = std::pin::pin!(record.notify.notified());
            notified.as_mut().enable();
            if !matches!(*lock(&record.state), LoadState::Loading) {
                return;
            }
            notified.await;
        }
    }
}

struct ClaimGuard<'a> {
    record: &'a DirRecord,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *lock(&self.record.state) = LoadState::Unloaded;
            self.record.notify.notify_waiters();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
