// Wed Jan 15 2026 - Alex

use crate::analysis::arm64::Instruction;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key of a cached decode: the half-open address window `[start, end)`.
pub type RangeKey = (u64, u64);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub address: u64,
    pub instructions: Arc<[Instruction]>,
    pub last_access: Instant,
    tick: u64,
}

/// Entries plus a tick-ordered recency index, so the least recently used
/// window is always the first key of `recency`.
#[derive(Default)]
struct Entries {
    map: HashMap<RangeKey, CacheEntry>,
    recency: BTreeMap<u64, RangeKey>,
}

impl Entries {
    fn touch(&mut self, key: RangeKey, tick: u64) -> Option<&mut CacheEntry> {
        let entry = self.map.get_mut(&key)?;
        self.recency.remove(&entry.tick);
        self.recency.insert(tick, key);
        entry.tick = tick;
        Some(entry)
    }

    fn evict_least_recent(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        self.map.remove(&key);
        log::trace!("Evicted disassembly range 0x{:x}-0x{:x}", key.0, key.1);
        true
    }
}

pub struct DisassemblyCache {
    entries: Mutex<Entries>,
    capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DisassemblyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::with_capacity(capacity.min(1 << 16)),
                recency: BTreeMap::new(),
            }),
            capacity,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: RangeKey) -> Option<Arc<[Instruction]>> {
        let tick = self.next_tick();
        let mut entries = self.entries.lock();
        match entries.touch(key, tick) {
            Some(entry) => {
                entry.last_access = Instant::now();
                let instructions = entry.instructions.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(instructions)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: RangeKey, instructions: Arc<[Instruction]>) {
        let tick = self.next_tick();
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.touch(key, tick) {
            existing.instructions = instructions;
            existing.last_access = Instant::now();
            return;
        }
        while entries.map.len() >= self.capacity {
            if !entries.evict_least_recent() {
                break;
            }
        }

        entries.recency.insert(tick, key);
        entries.map.insert(key, CacheEntry { address: key.0, instructions, last_access: Instant::now(), tick });
    }

    /// Drops every entry that has not been read or written within `max_age`.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let Entries { map, recency } = &mut *entries;
        let before = map.len();
        map.retain(|_, entry| {
            let keep = now.duration_since(entry.last_access) <= max_age;
            if !keep {
                recency.remove(&entry.tick);
            }
            keep
        });
        before - map.len()
    }

    pub fn contains(&self, key: RangeKey) -> bool {
        self.entries.lock().map.contains_key(&key)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.map.clear();
        entries.recency.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} entries, {} hits, {} misses ({:.1}% hit rate)",
            self.size,
            self.capacity,
            self.hits,
            self.misses,
            self.hit_rate * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::decode_all;

    fn entry(addr: u64) -> Arc<[Instruction]> {
        decode_all(&0xd503201fu32.to_le_bytes(), addr).into()
    }

    #[test]
    fn test_least_recently_accessed_entry_is_evicted() {
        let cache = DisassemblyCache::new(3);
        cache.insert((0x0, 0x4), entry(0x0));
        cache.insert((0x4, 0x8), entry(0x4));
        cache.insert((0x8, 0xc), entry(0x8));

        assert!(cache.get((0x0, 0x4)).is_some());
        cache.insert((0xc, 0x10), entry(0xc));

        assert_eq!(cache.len(), 3);
        assert!(cache.contains((0x0, 0x4)));
        assert!(!cache.contains((0x4, 0x8)));
        assert!(cache.contains((0xc, 0x10)));
    }

    #[test]
    fn test_reinserting_existing_key_does_not_evict() {
        let cache = DisassemblyCache::new(2);
        cache.insert((0x0, 0x4), entry(0x0));
        cache.insert((0x4, 0x8), entry(0x4));
        cache.insert((0x0, 0x4), entry(0x0));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains((0x4, 0x8)));
    }

    #[test]
    fn test_eviction_follows_access_order_across_many_entries() {
        let cache = DisassemblyCache::new(64);
        for i in 0..64u64 {
            cache.insert((i * 4, i * 4 + 4), entry(i * 4));
        }
        // Touch the even windows so only odd ones are left cold.
        for i in (0..64u64).step_by(2) {
            assert!(cache.get((i * 4, i * 4 + 4)).is_some());
        }
        for i in 64..96u64 {
            cache.insert((i * 4, i * 4 + 4), entry(i * 4));
        }

        assert_eq!(cache.len(), 64);
        for i in 0..64u64 {
            assert_eq!(cache.contains((i * 4, i * 4 + 4)), i % 2 == 0, "window {}", i);
        }
        let entries = cache.entries.lock();
        assert_eq!(entries.recency.len(), entries.map.len());
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = DisassemblyCache::new(8);
        assert!(cache.get((0x0, 0x4)).is_none());
        cache.insert((0x0, 0x4), entry(0x0));
        assert!(cache.get((0x0, 0x4)).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 8);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_evict_stale() {
        let cache = DisassemblyCache::new(8);
        cache.insert((0x0, 0x4), entry(0x0));
        assert_eq!(cache.evict_stale(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.evict_stale(Duration::ZERO), 1);
        assert!(cache.is_empty());
        assert!(cache.entries.lock().recency.is_empty());
    }
}
