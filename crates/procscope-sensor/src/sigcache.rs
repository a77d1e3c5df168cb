//! Content-addressed cache of code-signature results.
//!
//! Keyed by absolute executable path and validated against the file itself:
//! an entry survives only while the file's `(mtime, inode)` pair is
//! unchanged and the entry is younger than the TTL. Capacity-bound with
//! strict LRU eviction. Error results are never cached; they are often
//! transient.

use std::collections::{HashMap, VecDeque};
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, Instant, SystemTime};

use tracing::trace;

use procscope_core::signature::Signature;

const DEFAULT_CAPACITY: usize = 500;
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Signature,
    mtime: SystemTime,
    inode: u64,
    cached_at: Instant,
}

/// Bounded LRU cache from executable path to signature result.
pub struct SignatureCache {
    entries: HashMap<String, CacheEntry>,
    /// LRU order: front is the eviction candidate.
    order: VecDeque<String>,
    capacity: usize,
    ttl: Duration,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    /// Fetch a still-valid cached signature, promoting it to
    /// most-recently-used. Stats the file; TTL expiry, a changed
    /// `(mtime, inode)`, or a missing file all evict and miss.
    pub fn lookup(&mut self, path: &str) -> Option<Signature> {
        let entry = self.entries.get(path)?;

        if entry.cached_at.elapsed() > self.ttl {
            trace!(path, "signature cache entry expired");
            self.evict(path);
            return None;
        }

        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(_) => {
                self.evict(path);
                return None;
            }
        };
        let mtime = meta.modified().ok()?;
        if mtime != entry.mtime || meta.ino() != entry.inode {
            trace!(path, "signature cache entry stale, executable changed");
            self.evict(path);
            return None;
        }

        let result = entry.result.clone();
        self.promote(path);
        Some(result)
    }

    /// Insert a fresh result, evicting the least-recently-used entry at
    /// capacity.
    pub fn insert(&mut self, path: &str, result: Signature, mtime: SystemTime, inode: u64) {
        if !self.entries.contains_key(path) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                result,
                mtime,
                inode,
                cached_at: Instant::now(),
            },
        );
        self.promote(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self, path: &str) {
        self.entries.remove(path);
        self.order.retain(|p| p != path);
    }

    fn promote(&mut self, path: &str) {
        self.order.retain(|p| p != path);
        self.order.push_back(path.to_string());
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Stat helper used by the worker pool before inserting.
pub fn file_identity(path: &str) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta.modified().ok()?;
    Some((mtime, meta.ino()))
}
