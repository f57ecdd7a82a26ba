/*!
 * Directory-profile cache
 *
 * Profiling a large share costs a full enumeration, so results are cached
 * per normalized path with a freshness window. Eviction is approximate LRU:
 * when the map exceeds capacity by 10%, a random sample is sorted by scan
 * time and the oldest sampled entries are dropped. Minor over-capacity is
 * tolerated in exchange for never scanning the whole map.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Duration;
use rand::seq::IteratorRandom;

use crate::config::CacheConfig;
use crate::core::paths;
use crate::core::profiler::DirectoryProfile;
use crate::system::SharedClock;

/// Eviction samples this many candidates per overflowing entry
const SAMPLE_FACTOR: usize = 5;

/// Counter snapshot for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ProfileCache {
    entries: RwLock<HashMap<String, DirectoryProfile>>,
    config: CacheConfig,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ProfileCache {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch a fresh entry; expired entries are evicted on access
    pub fn get(&self, path: &str) -> Option<DirectoryProfile> {
        let key = paths::normalize(path).to_lowercase();
        let max_age = Duration::hours(self.config.max_age_hours);
        let now = self.clock.now();

        {
            let entries = self.entries.read().unwrap();
            if let Some(profile) = entries.get(&key) {
                if now - profile.last_scanned <= max_age {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(profile.clone());
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        // Entry exists but is stale
        let mut entries = self.entries.write().unwrap();
        if let Some(profile) = entries.get(&key) {
            if now - profile.last_scanned <= max_age {
                // Refreshed between locks
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(profile.clone());
            }
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, profile: DirectoryProfile) {
        let key = paths::normalize(&profile.path).to_lowercase();
        let mut entries = self.entries.write().unwrap();
        entries.insert(key, profile);
        self.evict_overflow(&mut entries);
    }

    /// Approximate-LRU eviction: sample, sort by age, drop the oldest
    fn evict_overflow(&self, entries: &mut HashMap<String, DirectoryProfile>) {
        let threshold = self.config.max_entries + self.config.max_entries / 10;
        if entries.len() <= threshold {
            return;
        }
        let overflow = entries.len() - self.config.max_entries;
        let sample_size = (SAMPLE_FACTOR * overflow).min(entries.len());

        let mut sample: Vec<(String, chrono::DateTime<chrono::Utc>)> = entries
            .iter()
            .map(|(key, profile)| (key.clone(), profile.last_scanned))
            .choose_multiple(&mut rand::rng(), sample_size);
        sample.sort_by_key(|(_, scanned)| *scanned);

        for (key, _) in sample.into_iter().take(overflow) {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
