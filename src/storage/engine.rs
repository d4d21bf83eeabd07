//! Thread-Safe Key/Value Store with Absolute Expiry
//!
//! This module implements the core store for CinderKV: a concurrent map from
//! binary-safe keys to string values with optional absolute (wall-clock)
//! expiration.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys hash across shards to
//!    reduce contention.
//! 2. **Lazy Expiry**: Every access that observes an expired entry removes it
//!    before reporting its state, so an expired key is indistinguishable from
//!    a missing one. A background reaper sweeps the rest.
//! 3. **Copies out, copies in**: Callers get clones of value bytes; no
//!    reference into a shard escapes its lock.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expiry is tracked as `SystemTime` rather than `Instant` because deadlines
//! must survive a restart: the append-only file logs `EXPIREAT` with absolute
//! unix seconds, and replay has to land on the same wall-clock instant.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of shards for the store.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 64;

/// A stored value with optional absolute expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = persistent)
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    /// Creates a new persistent entry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Checks whether this entry is expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

/// A point-in-time copy of one live entry, independent of the store.
///
/// Produced by [`Store::snapshot`] and consumed by the append-only-file
/// rewrite, which serializes it back as `SET` (+ optional `EXPIREAT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Bytes,
    /// Absolute expiry in unix seconds, if the entry had one.
    pub expires_at_unix: Option<u64>,
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

/// The in-memory store behind every CinderKV command.
///
/// Designed to be wrapped in an `Arc` and shared across all connection
/// handler tasks plus the background reaper. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use cinderkv::storage::Store;
/// use bytes::Bytes;
///
/// let store = Store::new();
///
/// store.set(Bytes::from("name"), Bytes::from("cinder"));
/// assert_eq!(store.get(b"name"), Some(Bytes::from("cinder")));
/// assert_eq!(store.ttl(b"name"), -1);
/// assert_eq!(store.ttl(b"missing"), -2);
/// ```
pub struct Store {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard>,

    /// Statistics: live keys (approximate)
    key_count: AtomicU64,

    /// Statistics: entries evicted because their expiry passed
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            key_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired
    /// entry is removed before reporting absence (lazy expiry).
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = SystemTime::now();
        let shard = self.shard(key);

        // Fast path: read lock for live entries.
        {
            let data = shard.data.read().unwrap();
            match data.get(key) {
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Key exists but is expired: take the write lock to evict it.
        let mut data = shard.data.write().unwrap();
        if let Some(entry) = data.get(key) {
            if entry.is_expired_at(now) {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            // Another task replaced the entry between the two locks.
            return Some(entry.value.clone());
        }
        None
    }

    /// Stores a key-value pair.
    ///
    /// Overwrites any previous entry and clears any previous expiry.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let shard = self.shard(&key);
        let mut data = shard.data.write().unwrap();

        if data.insert(key, Entry::new(value)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Deletes a key.
    ///
    /// Returns `true` only if a live entry was removed; a key whose expiry
    /// already passed is evicted and reported as missing.
    pub fn del(&self, key: &[u8]) -> bool {
        let now = SystemTime::now();
        let shard = self.shard(key);
        let mut data = shard.data.write().unwrap();

        match data.remove(key) {
            Some(entry) => {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                let was_live = !entry.is_expired_at(now);
                if !was_live {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                }
                was_live
            }
            None => false,
        }
    }

    /// Checks if a key exists and is live.
    ///
    /// An expired entry is evicted as a side effect.
    pub fn exists(&self, key: &[u8]) -> bool {
        let now = SystemTime::now();
        let shard = self.shard(key);

        {
            let data = shard.data.read().unwrap();
            match data.get(key) {
                Some(entry) if !entry.is_expired_at(now) => return true,
                Some(_) => {}
                None => return false,
            }
        }

        let mut data = shard.data.write().unwrap();
        if let Some(entry) = data.get(key) {
            if entry.is_expired_at(now) {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            return true;
        }
        false
    }

    /// Sets a relative expiry on a live key.
    ///
    /// Returns `true` iff the key was live and the call changed state:
    /// `secs <= 0` deletes the key immediately (and still returns `true`),
    /// a positive value sets `expires_at = now + secs`. A missing or
    /// already-expired key returns `false` without creating anything.
    pub fn expire(&self, key: &[u8], secs: i64) -> bool {
        let now = SystemTime::now();
        let shard = self.shard(key);
        let mut data = shard.data.write().unwrap();

        let live = match data.get(key) {
            Some(entry) => !entry.is_expired_at(now),
            None => return false,
        };
        if !live {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if secs <= 0 {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            return true;
        }

        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(now + Duration::from_secs(secs as u64));
        }
        true
    }

    /// Sets an absolute expiry (unix seconds) on a live key.
    ///
    /// A past instant deletes the key immediately and returns `true` (the
    /// key existed); a future instant sets the deadline. Missing or expired
    /// keys return `false`.
    pub fn expire_at(&self, key: &[u8], unix_secs: i64) -> bool {
        let now = SystemTime::now();
        let shard = self.shard(key);
        let mut data = shard.data.write().unwrap();

        let live = match data.get(key) {
            Some(entry) => !entry.is_expired_at(now),
            None => return false,
        };
        if !live {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let deadline = unix_time(unix_secs);
        if deadline <= now {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            return true;
        }

        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        true
    }

    /// Gets the remaining time-to-live for a key in whole seconds.
    ///
    /// Returns -2 for a missing or expired key (evicting the latter), -1 for
    /// a live key without expiry, and otherwise the floor of the remaining
    /// seconds. Flooring means a key in its final partial second may report 0.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        let now = SystemTime::now();
        let shard = self.shard(key);
        let mut data = shard.data.write().unwrap();

        // Copy the two fields out so the entry borrow ends before eviction.
        let status = data.get(key).map(|e| (e.is_expired_at(now), e.expires_at));
        match status {
            None => -2,
            Some((true, _)) => {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                -2
            }
            Some((false, None)) => -1,
            Some((false, Some(exp))) => exp
                .duration_since(now)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        }
    }

    /// Takes a point-in-time copy of every live entry.
    ///
    /// Expired entries observed during the scan are purged as a side effect
    /// and never appear in the result.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let now = SystemTime::now();
        let mut out = Vec::new();
        let mut purged = 0u64;

        for shard in &self.shards {
            let mut data = shard.data.write().unwrap();
            data.retain(|key, entry| {
                if entry.is_expired_at(now) {
                    purged += 1;
                    return false;
                }
                out.push(SnapshotEntry {
                    key: key.clone(),
                    value: entry.value.clone(),
                    expires_at_unix: entry.expires_at.map(|exp| {
                        exp.duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or(0)
                    }),
                });
                true
            });
        }

        if purged > 0 {
            self.key_count.fetch_sub(purged, Ordering::Relaxed);
            self.expired_count.fetch_add(purged, Ordering::Relaxed);
        }
        out
    }

    /// Removes every expired entry. Called by the background reaper.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> u64 {
        let now = SystemTime::now();
        let mut purged = 0u64;

        for shard in &self.shards {
            let mut data = shard.data.write().unwrap();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            purged += (before - data.len()) as u64;
        }

        if purged > 0 {
            self.key_count.fetch_sub(purged, Ordering::Relaxed);
            self.expired_count.fetch_add(purged, Ordering::Relaxed);
        }
        purged
    }

    /// Approximate number of keys currently stored.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries evicted because their expiry passed.
    pub fn expired_total(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }
}

/// Converts unix seconds to a `SystemTime`, saturating at the epoch for
/// negative inputs.
fn unix_time(unix_secs: i64) -> SystemTime {
    if unix_secs <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_secs(unix_secs as u64)
    }
}
