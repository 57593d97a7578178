//! Time-windowed dedup cache keyed by source id.
//!
//! Each source holds at most one entry: the fingerprint of its last report
//! and when it was seen. Entries older than the TTL are treated as absent at
//! lookup time; `prune` removes them physically and runs on insert once the
//! cache is full.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::WatchConfig;
use crate::fingerprint::Fingerprint;

/// Last-seen state for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub last_seen_at: DateTime<Utc>,
}

/// Result of `ExpiringCache::check_and_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCheck {
    pub is_duplicate: bool,
}

pub struct ExpiringCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
}

impl ExpiringCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        ExpiringCache {
            ttl,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        ExpiringCache::new(config.ttl(), config.cache_capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_seen_at > self.ttl
    }

    /// Look up `source_id` and record `fingerprint` as its latest state.
    ///
    /// A report is a duplicate only if a fresh entry exists with the same
    /// fingerprint; that entry's timestamp slides forward to `now`. In every
    /// other case the entry is overwritten.
    pub fn check_and_update(
        &mut self,
        source_id: &str,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
    ) -> CacheCheck {
        let fresh = CacheEntry {
            fingerprint,
            last_seen_at: now,
        };

        if let Some(entry) = self.entries.get(source_id).copied() {
            let is_duplicate = !self.is_expired(&entry, now) && entry.fingerprint == fingerprint;
            self.entries.insert(source_id.to_string(), fresh);
            return CacheCheck { is_duplicate };
        }

        if self.entries.len() >= self.capacity {
            self.make_room(now);
        }
        self.entries.insert(source_id.to_string(), fresh);
        CacheCheck {
            is_duplicate: false,
        }
    }

    /// Entry for `source_id` if it has not expired.
    pub fn get(&self, source_id: &str, now: DateTime<Utc>) -> Option<&CacheEntry> {
        self.entries
            .get(source_id)
            .filter(|entry| !self.is_expired(entry, now))
    }

    /// Remove expired entries. Returns count removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.last_seen_at <= ttl);
        before - self.entries.len()
    }

    fn make_room(&mut self, now: DateTime<Utc>) {
        let pruned = self.prune(now);
        if pruned > 0 {
            debug!(pruned, "dropped expired cache entries");
        }
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_seen_at)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            debug!(source = %key, "cache full, evicting least recently seen");
            self.entries.remove(&key);
        }
    }

    /// Physical entry count, including entries not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ExpiringCache {
    fn default() -> Self {
        ExpiringCache::from_config(&WatchConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecodedReport, MicECategory, Position, ReportCategory};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn fp(lat: f64) -> Fingerprint {
        Fingerprint::compute(&DecodedReport {
            source_id: "DF1JSL-1".into(),
            position: Some(Position::new(lat, 8.3268)),
            course: Some(90),
            speed: Some(10.0),
            category: ReportCategory::MicE(MicECategory::Emergency),
            received_at: t0(),
        })
    }

    fn make_cache() -> ExpiringCache {
        ExpiringCache::new(Duration::minutes(5), 100)
    }

    #[test]
    fn test_first_sighting_not_duplicate() {
        let mut cache = make_cache();
        assert!(!cache.check_and_update("A", fp(51.0), t0()).is_duplicate);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_repeat_within_ttl_is_duplicate() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        let check = cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(2));
        assert!(check.is_duplicate);
    }

    #[test]
    fn test_duplicate_refreshes_timestamp() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(4));

        let entry = cache.get("A", t0() + Duration::minutes(4)).unwrap();
        assert_eq!(entry.last_seen_at, t0() + Duration::minutes(4));

        // 8 minutes after first sighting, but only 4 after the refresh
        let check = cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(8));
        assert!(check.is_duplicate);
    }

    #[test]
    fn test_expired_entry_not_duplicate() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        assert!(cache.get("A", t0() + Duration::minutes(6)).is_none());
        let check = cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(6));
        assert!(!check.is_duplicate);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_boundary_is_still_fresh() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        let check = cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(5));
        assert!(check.is_duplicate);
    }

    #[test]
    fn test_changed_fingerprint_overwrites() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        let check = cache.check_and_update("A", fp(51.1), t0() + Duration::minutes(1));
        assert!(!check.is_duplicate);
        assert_eq!(cache.len(), 1);

        let entry = cache.get("A", t0() + Duration::minutes(1)).unwrap();
        assert_eq!(entry.fingerprint, fp(51.1));

        // Going back to the first state is a change again
        let check = cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(2));
        assert!(!check.is_duplicate);
    }

    #[test]
    fn test_sources_are_independent() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        assert!(!cache.check_and_update("B", fp(51.0), t0()).is_duplicate);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_prune() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        cache.check_and_update("B", fp(51.0), t0() + Duration::minutes(3));

        assert_eq!(cache.prune(t0() + Duration::minutes(4)), 0);
        assert_eq!(cache.prune(t0() + Duration::minutes(7)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("B", t0() + Duration::minutes(7)).is_some());
    }

    #[test]
    fn test_capacity_prunes_expired_first() {
        let mut cache = ExpiringCache::new(Duration::minutes(5), 2);
        cache.check_and_update("A", fp(51.0), t0());
        cache.check_and_update("B", fp(51.0), t0() + Duration::minutes(4));

        cache.check_and_update("C", fp(51.0), t0() + Duration::minutes(6));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("A", t0() + Duration::minutes(6)).is_none());
        assert!(cache.get("B", t0() + Duration::minutes(6)).is_some());
    }

    #[test]
    fn test_capacity_evicts_least_recently_seen() {
        let mut cache = ExpiringCache::new(Duration::minutes(5), 2);
        cache.check_and_update("A", fp(51.0), t0());
        cache.check_and_update("B", fp(51.0), t0() + Duration::minutes(1));
        // Refresh A so B becomes the oldest
        cache.check_and_update("A", fp(51.0), t0() + Duration::minutes(2));

        cache.check_and_update("C", fp(51.0), t0() + Duration::minutes(3));
        let now = t0() + Duration::minutes(3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("A", now).is_some());
        assert!(cache.get("B", now).is_none());
        assert!(cache.get("C", now).is_some());
    }

    #[test]
    fn test_clear() {
        let mut cache = make_cache();
        cache.check_and_update("A", fp(51.0), t0());
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.check_and_update("A", fp(51.0), t0()).is_duplicate);
    }
}
