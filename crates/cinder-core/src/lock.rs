//! Per-key lock manager with deterministic multi-key acquisition.
//!
//! Keys map by hash to a fixed table of read-write lock slots. To take
//! locks for several keys at once without deadlocking against another
//! task doing the same, the manager collects the *slot indices* of
//! every key involved, sorts them ascending, deduplicates, and acquires
//! in that order. Two tasks locking overlapping key sets therefore
//! always contend on the first shared slot instead of waiting on each
//! other in a cycle. The sort is over slot indices, not key strings —
//! two distinct keys in the same slot are one acquisition.
//!
//! Read and write keys for a command are combined into a single sorted
//! pass: a slot touched by any write key is taken in write mode, even
//! if read keys also map to it.

use std::hash::{Hash, Hasher};

use ahash::AHashSet;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock table size for a live database. Must be a power of two.
const DEFAULT_SLOTS: usize = 1024;

/// A table of hash-addressed lock slots.
#[derive(Debug)]
pub struct KeyLocks {
    table: Vec<RwLock<()>>,
    mask: usize,
}

/// RAII holder for one multi-key acquisition. Dropping it releases
/// every slot taken in the pass.
pub struct KeyLockGuard<'a> {
    #[allow(dead_code)]
    guards: Vec<SlotGuard<'a>>,
}

enum SlotGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl KeyLocks {
    /// Creates a lock table with `slots` entries, rounded up to a power
    /// of two.
    pub fn new(slots: usize) -> Self {
        let n = slots.max(1).next_power_of_two();
        Self {
            table: (0..n).map(|_| RwLock::new(())).collect(),
            mask: n - 1,
        }
    }

    /// Creates the default table for a live database.
    pub fn concurrent() -> Self {
        Self::new(DEFAULT_SLOTS)
    }

    /// Creates a one-slot table for embedded databases, where every key
    /// shares the single uncontended lock.
    pub fn single() -> Self {
        Self::new(1)
    }

    /// Maps a key to its slot index.
    fn slot(&self, key: &str) -> usize {
        let mut hasher = ahash::AHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }

    /// Acquires write locks for `write_keys` and read locks for
    /// `read_keys` in one sorted pass. Duplicate keys and colliding
    /// slots are acquired once; write intent wins over read.
    pub fn lock<'a>(&'a self, write_keys: &[String], read_keys: &[String]) -> KeyLockGuard<'a> {
        let write_slots: AHashSet<usize> = write_keys.iter().map(|k| self.slot(k)).collect();

        let mut slots: Vec<usize> = write_slots
            .iter()
            .copied()
            .chain(read_keys.iter().map(|k| self.slot(k)))
            .collect();
        slots.sort_unstable();
        slots.dedup();

        let guards = slots
            .into_iter()
            .map(|idx| {
                if write_slots.contains(&idx) {
                    SlotGuard::Write(self.table[idx].write())
                } else {
                    SlotGuard::Read(self.table[idx].read())
                }
            })
            .collect();

        KeyLockGuard { guards }
    }

    /// Acquires write locks for the given keys only.
    pub fn lock_writes<'a>(&'a self, write_keys: &[String]) -> KeyLockGuard<'a> {
        self.lock(write_keys, &[])
    }

    /// Number of slots in the table.
    pub fn slots(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn slot_is_stable_and_in_range() {
        let locks = KeyLocks::concurrent();
        let a = locks.slot("alpha");
        assert_eq!(a, locks.slot("alpha"));
        assert!(a < locks.slots());
    }

    #[test]
    fn relocking_same_key_twice_in_one_pass_does_not_deadlock() {
        let locks = KeyLocks::concurrent();
        // duplicate write keys and a read key colliding with a write key
        let guard = locks.lock(&keys(&["k", "k"]), &keys(&["k"]));
        drop(guard);
    }

    #[test]
    fn single_slot_table_serializes_everything() {
        let locks = KeyLocks::single();
        assert_eq!(locks.slots(), 1);
        let _guard = locks.lock_writes(&keys(&["any"]));
        // a second acquisition would block; releasing the first is
        // enough to prove the RAII guard covers the one slot
    }

    #[test]
    fn writers_on_the_same_key_are_mutually_exclusive() {
        let locks = Arc::new(KeyLocks::concurrent());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let _guard = locks.lock_writes(&keys(&["hot"]));
                    // non-atomic read-modify-write protected by the key lock
                    let seen = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(seen + 1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8 * 200);
    }

    // the deadlock-avoidance property: two tasks locking overlapping
    // key sets in opposite textual order must both complete
    #[test]
    fn opposite_order_multi_key_locking_completes() {
        let locks = Arc::new(KeyLocks::concurrent());
        let mut handles = Vec::new();

        for flip in [false, true] {
            let locks = Arc::clone(&locks);
            handles.push(thread::spawn(move || {
                for i in 0..300 {
                    let (a, b) = (format!("k{}", i % 7), format!("k{}", (i + 3) % 7));
                    let pair = if flip { keys(&[&a, &b]) } else { keys(&[&b, &a]) };
                    let _guard = locks.lock_writes(&pair);
                }
            }));
        }

        for h in handles {
            h.join().expect("locking threads must not deadlock");
        }
    }

    #[test]
    fn readers_share_a_slot() {
        let locks = Arc::new(KeyLocks::concurrent());
        let g1 = locks.lock(&[], &keys(&["shared"]));

        let locks2 = Arc::clone(&locks);
        let reader = thread::spawn(move || {
            let _g2 = locks2.lock(&[], &keys(&["shared"]));
        });

        // the second reader must get through while we still hold ours
        thread::sleep(Duration::from_millis(20));
        reader.join().unwrap();
        drop(g1);
    }
}
