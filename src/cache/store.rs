//! Settings Cache Module
//!
//! In-memory key → entry store backed by registered defaults. A miss is never
//! an error: it falls back to the caller's fallback or the default.

use std::collections::HashMap;

use serde_json::Value;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, CacheStats};
use crate::models::SettingsMap;

// == Settings Cache ==
/// Single source of truth for reads within one engine.
#[derive(Debug)]
pub struct SettingsCache {
    /// Live entries
    entries: HashMap<String, CacheEntry>,
    /// Registered defaults, served on a miss
    defaults: SettingsMap,
    /// Read statistics
    stats: CacheStats,
    /// Entry lifetime in milliseconds
    ttl_ms: u64,
}

impl SettingsCache {
    // == Constructor ==
    /// Creates a cache populated with `defaults`.
    pub fn new(defaults: SettingsMap, ttl_ms: u64) -> Self {
        let mut cache = Self {
            entries: HashMap::new(),
            defaults,
            stats: CacheStats::new(),
            ttl_ms,
        };
        let initial = cache.defaults.clone();
        cache.update(&initial);
        cache
    }

    // == Get ==
    /// Reads a value.
    ///
    /// A live entry counts as a hit. Otherwise it is a miss and the caller's
    /// fallback is returned, then the registered default. An expired entry
    /// is kept as stale until it is revived, so `snapshot()` still holds it.
    pub fn get(&mut self, key: &str, fallback: Option<&Value>) -> Option<Value> {
        let now = current_timestamp_ms();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired_at(now) {
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
        }

        self.stats.record_miss();
        fallback
            .cloned()
            .or_else(|| self.defaults.get(key).cloned())
    }

    // == Get All ==
    /// Defaults overlaid with every live entry. Does not touch statistics.
    pub fn get_all(&self) -> SettingsMap {
        let now = current_timestamp_ms();
        let mut all = self.defaults.clone();
        for (key, entry) in &self.entries {
            if !entry.is_expired_at(now) {
                all.insert(key.clone(), entry.value.clone());
            }
        }
        all
    }

    /// Defaults overlaid with every entry, expired or not.
    ///
    /// This is what gets persisted, so an entry waiting for the sweep is
    /// never dropped from the durable snapshot.
    pub fn snapshot(&self) -> SettingsMap {
        let mut all = self.defaults.clone();
        for (key, entry) in &self.entries {
            all.insert(key.clone(), entry.value.clone());
        }
        all
    }

    // == Update ==
    /// Overwrites entries and resets their expiry.
    pub fn update(&mut self, settings: &SettingsMap) {
        self.update_at(settings, current_timestamp_ms());
    }

    /// Overwrites entries as if written at `written_at`.
    pub fn update_at(&mut self, settings: &SettingsMap, written_at: u64) {
        for (key, value) in settings {
            self.entries
                .insert(key.clone(), CacheEntry::new(value.clone(), written_at, self.ttl_ms));
        }
        self.stats.set_total_entries(self.entries.len());
    }

    /// Applies the keys of `settings` whose current entry is not newer than
    /// `timestamp`. Returns the subset that was applied.
    pub fn apply_if_newer(&mut self, settings: &SettingsMap, timestamp: u64) -> SettingsMap {
        let applied: SettingsMap = settings
            .iter()
            .filter(|(key, _)| {
                self.entries
                    .get(key.as_str())
                    .map(|entry| timestamp >= entry.written_at)
                    .unwrap_or(true)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.update_at(&applied, timestamp);
        applied
    }

    // == Remove ==
    /// Drops an entry; registered keys fall back to their default afterwards.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key).map(|entry| entry.value);
        self.stats.set_total_entries(self.entries.len());
        removed
    }

    /// Removes an entry only if it is not newer than `timestamp`.
    pub fn remove_if_newer(&mut self, key: &str, timestamp: u64) -> bool {
        let stale = self
            .entries
            .get(key)
            .map(|entry| timestamp >= entry.written_at)
            .unwrap_or(false);
        if stale {
            self.remove(key);
        }
        stale
    }

    // == Expiry ==
    pub fn is_expired(&self, key: &str) -> bool {
        let now = current_timestamp_ms();
        self.entries
            .get(key)
            .map(|entry| entry.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Keys whose entry has expired and waits to be revived.
    pub fn expired_keys(&self) -> Vec<String> {
        let now = current_timestamp_ms();
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Gives an expired entry a fresh lifetime holding `value`.
    ///
    /// `written_at` is kept as given so last-write-wins ordering against
    /// sibling messages is unaffected.
    pub fn revive(&mut self, key: &str, value: Value, written_at: u64) {
        self.entries
            .insert(key.to_string(), CacheEntry::renewed(value, written_at, self.ttl_ms));
        self.stats.record_expirations(1);
        self.stats.set_total_entries(self.entries.len());
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn written_at(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.written_at)
    }

    pub fn default_for(&self, key: &str) -> Option<&Value> {
        self.defaults.get(key)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
