//! Versioned attribute lookup cache.
//!
//! A fixed-size table keyed by `(type version, attribute name)`. A hit
//! returns the resolved value (or a recorded miss) without walking the MRO
//! and without touching the mutation lock. Correctness hangs on version
//! tags: any mutation that could change a lookup result bumps the tag to 0
//! for the type and its subtree, so stale entries can never validate.
//!
//! Readers are lock-free in the common case: each entry carries a sequence
//! counter (odd while a writer is mid-update) and the payload sits behind a
//! `parking_lot::RwLock` that readers only `try_read`. A reader that loses
//! the race re-checks the counter and falls back to the slow path rather
//! than block. Writers run only while holding the runtime's mutation lock,
//! so writer/writer races cannot happen.
//!
//! Collisions overwrite blindly. The table is a cache, not a map: losing an
//! entry costs one MRO walk, nothing more.

use crate::object::value::Value;
use pyrite_core::InternedString;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Entries in the table. Power of two so indexing is a mask.
const CACHE_SIZE: usize = 1 << 12;
const CACHE_MASK: u64 = (CACHE_SIZE - 1) as u64;

/// Per-type ceiling on version tag assignments. A type that churns past
/// this many tags stops being cached and degrades to plain MRO walks.
pub const MAX_VERSIONS_PER_CLASS: u32 = 1000;

/// Sentinel stored in a type's assignment counter to opt it out of the
/// cache permanently (custom linearizations, exhausted budgets).
pub const ATTR_CACHE_UNUSED: u32 = 30_000;

/// Number of probe retries before giving up on a contended entry.
const PROBE_RETRIES: u32 = 3;

struct CacheCell {
    version: u32,
    name: Option<InternedString>,
    /// `Some(None)` semantics live one level up: `value: None` with a
    /// matching key records a definitive miss (negative entry).
    value: Option<Value>,
}

struct CacheEntry {
    /// Odd while a writer is updating the cell.
    seq: AtomicU32,
    cell: RwLock<CacheCell>,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            seq: AtomicU32::new(0),
            cell: RwLock::new(CacheCell {
                version: 0,
                name: None,
                value: None,
            }),
        }
    }
}

/// Cache statistics, useful when tuning and in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct AttributeCache {
    entries: Box<[CacheEntry]>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AttributeCache {
    pub fn new() -> Self {
        let entries: Vec<CacheEntry> = (0..CACHE_SIZE).map(|_| CacheEntry::empty()).collect();
        Self {
            entries: entries.into_boxed_slice(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    fn index(version: u32, name: &InternedString) -> usize {
        (((version as u64) ^ name.hash_value()) & CACHE_MASK) as usize
    }

    /// Look up `(version, name)`.
    ///
    /// `None` means no usable entry (absent, contended, or version 0):
    /// take the slow path. `Some(cached)` is authoritative, where a `None`
    /// payload records that the attribute does not exist anywhere in the
    /// MRO.
    pub fn probe(&self, version: u32, name: &InternedString) -> Option<Option<Value>> {
        if version == 0 {
            return None;
        }
        let entry = &self.entries[Self::index(version, name)];

        for _ in 0..PROBE_RETRIES {
            let before = entry.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                // Writer mid-update; the slow path is cheaper than waiting.
                break;
            }
            let result = match entry.cell.try_read() {
                Some(cell) => {
                    if cell.version == version
                        && cell
                            .name
                            .as_ref()
                            .is_some_and(|n| InternedString::ptr_eq(n, name))
                    {
                        Some(cell.value.clone())
                    } else {
                        None
                    }
                }
                None => break,
            };
            if entry.seq.load(Ordering::Acquire) == before {
                match result {
                    Some(hit) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(hit);
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                }
            }
            // Entry changed underneath us; retry.
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Record a lookup result. `value: None` records a definitive miss.
    ///
    /// Callers must hold the mutation lock; entry writers are never
    /// concurrent with each other.
    pub fn store(&self, version: u32, name: &InternedString, value: Option<Value>) {
        if version == 0 {
            return;
        }
        let entry = &self.entries[Self::index(version, name)];

        entry.seq.fetch_add(1, Ordering::AcqRel); // now odd
        {
            let mut cell = entry.cell.write();
            cell.version = version;
            cell.name = Some(name.clone());
            cell.value = value;
        }
        entry.seq.fetch_add(1, Ordering::Release); // even again
    }

    /// Drop every entry recorded under `version`. Called on invalidation,
    /// under the mutation lock.
    pub fn clear_version(&self, version: u32) {
        if version == 0 {
            return;
        }
        for entry in self.entries.iter() {
            let matches = entry
                .cell
                .try_read()
                .map(|cell| cell.version == version)
                .unwrap_or(true);
            if !matches {
                continue;
            }
            entry.seq.fetch_add(1, Ordering::AcqRel);
            {
                let mut cell = entry.cell.write();
                if cell.version == version {
                    cell.version = 0;
                    cell.name = None;
                    cell.value = None;
                }
            }
            entry.seq.fetch_add(1, Ordering::Release);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for AttributeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_core::intern;

    #[test]
    fn test_store_then_probe() {
        let cache = AttributeCache::new();
        let name = intern("method_a");
        cache.store(7, &name, Some(Value::Int(42)));
        assert_eq!(cache.probe(7, &name), Some(Some(Value::Int(42))));
    }

    #[test]
    fn test_negative_entry() {
        let cache = AttributeCache::new();
        let name = intern("nonexistent");
        cache.store(7, &name, None);
        // A recorded miss is a hit that says "absent".
        assert_eq!(cache.probe(7, &name), Some(None));
    }

    #[test]
    fn test_version_zero_never_cached() {
        let cache = AttributeCache::new();
        let name = intern("anything");
        cache.store(0, &name, Some(Value::Int(1)));
        assert_eq!(cache.probe(0, &name), None);
    }

    #[test]
    fn test_wrong_version_misses() {
        let cache = AttributeCache::new();
        let name = intern("attr");
        cache.store(7, &name, Some(Value::Int(1)));
        assert_eq!(cache.probe(8, &name), None);
    }

    #[test]
    fn test_clear_version() {
        let cache = AttributeCache::new();
        let a = intern("a");
        let b = intern("b");
        cache.store(7, &a, Some(Value::Int(1)));
        cache.store(7, &b, Some(Value::Int(2)));
        cache.store(9, &a, Some(Value::Int(3)));

        cache.clear_version(7);
        assert_eq!(cache.probe(7, &a), None);
        assert_eq!(cache.probe(7, &b), None);
        // Other versions untouched.
        assert_eq!(cache.probe(9, &a), Some(Some(Value::Int(3))));
    }

    #[test]
    fn test_collision_overwrites() {
        let cache = AttributeCache::new();
        let name = intern("same_slot");
        cache.store(5, &name, Some(Value::Int(1)));
        // Same index when versions xor to a multiple of the table size.
        cache.store(5 ^ (1 << 12), &name, Some(Value::Int(2)));
        assert_eq!(cache.probe(5, &name), None);
        assert_eq!(
            cache.probe(5 ^ (1 << 12), &name),
            Some(Some(Value::Int(2)))
        );
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = AttributeCache::new();
        let name = intern("counted");
        cache.store(3, &name, Some(Value::Int(9)));
        cache.probe(3, &name);
        cache.probe(4, &name);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_concurrent_readers() {
        use std::sync::Arc;
        let cache = Arc::new(AttributeCache::new());
        let name = intern("shared");
        cache.store(11, &name, Some(Value::Int(7)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let name = name.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(Some(v)) = cache.probe(11, &name) {
                            assert_eq!(v, Value::Int(7));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
