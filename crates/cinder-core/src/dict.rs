//! Sharded concurrent dictionary.
//!
//! The keyspace is partitioned into a fixed number of independent
//! segments selected by key hash, so concurrent access to different
//! keys contends only when the keys share a segment. Each logical
//! database holds three instances: data, expiry deadlines, and
//! per-key version counters.
//!
//! A whole-dictionary `clear` is only atomic with respect to concurrent
//! mutation because the owning database suspends mutators behind its
//! flush barrier first; the dictionary itself clears segment by segment.

use std::hash::{Hash, Hasher};

use ahash::AHashMap;
use parking_lot::RwLock;
use rand::seq::{IteratorRandom, SliceRandom};

/// Segment count for the concurrent variant. Must be a power of two.
const DEFAULT_SHARDS: usize = 16;

/// A hash map sharded into independently locked segments.
///
/// Generic over the stored value so the same structure backs the data
/// dictionary (`Value`), the expiry dictionary (`u64` deadlines), and
/// the version dictionary (`u32` counters).
#[derive(Debug)]
pub struct ShardedDict<V> {
    shards: Vec<RwLock<AHashMap<String, V>>>,
    mask: usize,
}

impl<V: Clone> ShardedDict<V> {
    /// Creates a dictionary with the given segment count, rounded up
    /// to a power of two.
    pub fn new(shard_count: usize) -> Self {
        let n = shard_count.max(1).next_power_of_two();
        Self {
            shards: (0..n).map(|_| RwLock::new(AHashMap::new())).collect(),
            mask: n - 1,
        }
    }

    /// Creates the default concurrent dictionary.
    pub fn concurrent() -> Self {
        Self::new(DEFAULT_SHARDS)
    }

    /// Creates the single-segment variant used by embedded databases
    /// (AOF replay scratch state), where concurrency is unnecessary and
    /// the lone uncontended segment lock costs nothing.
    pub fn single() -> Self {
        Self::new(1)
    }

    /// Maps a key to its segment.
    fn shard(&self, key: &str) -> &RwLock<AHashMap<String, V>> {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    /// Returns a clone of the value bound to `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Binds `key` to `val`. Returns 1 if the key was newly inserted,
    /// 0 if an existing binding was replaced.
    pub fn put(&self, key: String, val: V) -> usize {
        match self.shard(&key).write().insert(key, val) {
            Some(_) => 0,
            None => 1,
        }
    }

    /// Binds `key` to `val` only if absent. Returns 1 if inserted.
    pub fn put_if_absent(&self, key: String, val: V) -> usize {
        let mut shard = self.shard(&key).write();
        if shard.contains_key(&key) {
            0
        } else {
            shard.insert(key, val);
            1
        }
    }

    /// Replaces the binding for `key` only if present. Returns 1 if
    /// replaced.
    pub fn put_if_exists(&self, key: String, val: V) -> usize {
        let mut shard = self.shard(&key).write();
        if shard.contains_key(&key) {
            shard.insert(key, val);
            1
        } else {
            0
        }
    }

    /// Replaces the binding for `key` with a value computed from the
    /// current one, atomically with respect to the key's segment. Used
    /// for counters, where separate get-then-put calls would race.
    pub fn compute(&self, key: &str, f: impl FnOnce(Option<&V>) -> V) {
        let mut shard = self.shard(key).write();
        let next = f(shard.get(key));
        shard.insert(key.to_string(), next);
    }

    /// Removes `key`. Returns 1 if it existed.
    pub fn remove(&self, key: &str) -> usize {
        match self.shard(key).write().remove(key) {
            Some(_) => 1,
            None => 0,
        }
    }

    /// Total number of entries across all segments.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Returns `true` when no segment holds an entry.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Visits every entry until the visitor returns `false`.
    ///
    /// Holds one segment read lock at a time; entries added or removed
    /// in segments not yet visited may or may not be seen.
    pub fn for_each(&self, mut visitor: impl FnMut(&str, &V) -> bool) {
        for shard in &self.shards {
            for (key, val) in shard.read().iter() {
                if !visitor(key, val) {
                    return;
                }
            }
        }
    }

    /// Returns all keys.
    pub fn keys(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.len());
        for shard in &self.shards {
            out.extend(shard.read().keys().cloned());
        }
        out
    }

    /// Returns `limit` keys sampled with replacement; the same key may
    /// appear more than once. Empty when the dictionary is empty.
    pub fn random_keys(&self, limit: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let occupied: Vec<_> = self
            .shards
            .iter()
            .filter(|s| !s.read().is_empty())
            .collect();
        let mut out = Vec::with_capacity(limit);
        for _ in 0..limit {
            // pick a random non-empty segment, then a random entry in it
            let Some(shard) = occupied.choose(&mut rng) else {
                break;
            };
            if let Some(key) = shard.read().keys().choose(&mut rng) {
                out.push(key.clone());
            }
        }
        out
    }

    /// Returns up to `limit` distinct keys, capped at the dictionary
    /// size.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let keys = self.keys();
        keys.into_iter().choose_multiple(&mut rng, limit)
    }

    /// Removes every entry, one segment at a time.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}
