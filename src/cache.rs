//! Bounded read caches with generational flush.
//!
//! When an insert would push the cache past its budget, every entry is
//! dropped and the cache starts over empty.  Reads of optical media are
//! mostly sequential, so a whole flush costs little and needs no per-access
//! bookkeeping.  The same type backs the decompressed block cache (budget in
//! bytes) and the on-disk DDT entry cache (budget in entries).

use std::collections::HashMap;
use tracing::debug;

pub struct GenerationalCache<V> {
    name:    &'static str,
    budget:  usize,
    used:    usize,
    flushes: u64,
    entries: HashMap<u64, (V, usize)>,
}

impl<V> GenerationalCache<V> {
    /// A `budget` of 0 disables caching entirely.
    pub fn new(name: &'static str, budget: usize) -> Self {
        Self { name, budget, used: 0, flushes: 0, entries: HashMap::new() }
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        self.entries.get(&key).map(|(v, _)| v)
    }

    /// Insert `value` accounted as `cost`.  Values costing more than the
    /// whole budget are not cached.
    pub fn insert(&mut self, key: u64, value: V, cost: usize) {
        if cost > self.budget {
            return;
        }
        if let Some((_, old)) = self.entries.remove(&key) {
            self.used -= old;
        }
        if self.used + cost > self.budget {
            self.flush();
        }
        self.used += cost;
        self.entries.insert(key, (value, cost));
    }

    /// Drop every entry.
    pub fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        debug!(cache = self.name, entries = self.entries.len(), used = self.used, "flushing cache");
        self.entries.clear();
        self.used = 0;
        self.flushes += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of whole flushes so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}
