//! Requeue suppression window.
//!
//! `DedupCache` remembers when each id was last queued. An id queued less
//! than `window` ago is considered recent and must not be queued again.
//!
//! Every entry shares the same window, so insertion order is also expiry
//! order. Timestamps are kept in a queue alongside the map, and `sweep`
//! only walks the expired prefix instead of rebuilding the whole map. An
//! id re-recorded after expiring leaves a stale queue entry behind; it is
//! recognised by its timestamp and skipped.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use super::job::ItemId;

/// Recently queued ids and the time they were last queued.
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    last_queued: HashMap<ItemId, Instant>,
    expiry_order: VecDeque<(Instant, ItemId)>,
}

impl DedupCache {
    /// Creates an empty cache with the given suppression window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_queued: HashMap::new(),
            expiry_order: VecDeque::new(),
        }
    }

    /// Returns true if `id` was recorded less than `window` before `now`.
    pub fn is_recent(&self, id: &ItemId, now: Instant) -> bool {
        self.last_queued
            .get(id)
            .is_some_and(|queued_at| *queued_at + self.window > now)
    }

    /// Records `id` as queued at `now`, replacing any earlier timestamp.
    pub fn record(&mut self, id: ItemId, now: Instant) {
        self.last_queued.insert(id.clone(), now);
        self.expiry_order.push_back((now, id));
    }

    /// Drops every entry whose window has elapsed by `now`.
    ///
    /// Returns the number of ids removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((queued_at, _)) = self.expiry_order.front() {
            if *queued_at + self.window > now {
                break;
            }
            let Some((queued_at, id)) = self.expiry_order.pop_front() else {
                break;
            };
            // Only the newest timestamp for an id owns its map entry.
            if self.last_queued.get(&id) == Some(&queued_at) {
                self.last_queued.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.last_queued.len()
    }

    /// Returns whether no ids are tracked.
    pub fn is_empty(&self) -> bool {
        self.last_queued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn test_recent_within_window() {
        let start = Instant::now();
        let mut cache = DedupCache::new(WINDOW);
        let id = ItemId::from("a");

        assert!(!cache.is_recent(&id, start));
        cache.record(id.clone(), start);

        assert!(cache.is_recent(&id, start));
        assert!(cache.is_recent(&id, start + Duration::from_millis(9_999)));
        // The window is half-open: exactly `window` later the id is free again.
        assert!(!cache.is_recent(&id, start + WINDOW));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let start = Instant::now();
        let mut cache = DedupCache::new(WINDOW);
        cache.record(ItemId::from(1), start);
        cache.record(ItemId::from(2), start + Duration::from_secs(5));

        assert_eq!(cache.sweep(start + Duration::from_secs(9)), 0);
        assert_eq!(cache.sweep(start + WINDOW), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_recent(&ItemId::from(2), start + WINDOW));

        assert_eq!(cache.sweep(start + Duration::from_secs(15)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_rerecorded_id_survives_stale_entry() {
        let start = Instant::now();
        let mut cache = DedupCache::new(WINDOW);
        let id = ItemId::from("x");

        cache.record(id.clone(), start);
        let later = start + Duration::from_secs(12);
        cache.record(id.clone(), later);

        // The first timestamp expires, but the id was queued again since.
        assert_eq!(cache.sweep(later), 0);
        assert!(cache.is_recent(&id, later + Duration::from_secs(1)));

        assert_eq!(cache.sweep(later + WINDOW), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_matches_full_rebuild() {
        let start = Instant::now();
        let mut cache = DedupCache::new(WINDOW);
        for step in 0..40u64 {
            let at = start + Duration::from_secs(step);
            cache.record(ItemId::from((step % 7) as i64), at);
        }

        let now = start + Duration::from_secs(45);
        let expected: HashMap<ItemId, Instant> = cache
            .last_queued
            .iter()
            .filter(|(_, queued_at)| **queued_at + WINDOW > now)
            .map(|(id, at)| (id.clone(), *at))
            .collect();

        cache.sweep(now);
        assert_eq!(cache.last_queued, expected);
    }
}
