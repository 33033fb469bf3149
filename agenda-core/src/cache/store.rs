//! Versioned, time-bounded result cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cache::key::{CacheKey, KeyPrefix};
use crate::utils::lock_recover;

/// A populated cache entry as seen by readers.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: Arc<V>,
    pub version: u64,
    pub fetched_at: Instant,
    /// Set by invalidation; cleared by the next accepted write.
    pub stale: bool,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        CacheEntry {
            value: self.value.clone(),
            version: self.version,
            fetched_at: self.fetched_at,
            stale: self.stale,
        }
    }
}

#[derive(Debug)]
struct Slot<V> {
    value: Option<Arc<V>>,
    version: u64,
    fetched_at: Instant,
    last_access: Instant,
    stale: bool,
}

impl<V> Slot<V> {
    fn placeholder(now: Instant) -> Self {
        Slot {
            value: None,
            version: 0,
            fetched_at: now,
            last_access: now,
            stale: true,
        }
    }

    fn entry(&self) -> Option<CacheEntry<V>> {
        self.value.as_ref().map(|value| CacheEntry {
            value: value.clone(),
            version: self.version,
            fetched_at: self.fetched_at,
            stale: self.stale,
        })
    }
}

/// Rollback information for one optimistically patched entry.
#[derive(Debug)]
pub struct PatchRecord<V> {
    pub key: CacheKey,
    previous: CacheEntry<V>,
    patched_version: u64,
}

/// What happened when a patch was rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The entry was put back exactly as it was before the patch
    Restored,
    /// Something wrote the entry after the patch; it was invalidated instead
    Superseded,
    /// The entry was evicted in the meantime
    Gone,
}

/// In-memory map from query key to result set.
///
/// Every write carries a version drawn from one monotonically increasing
/// counter. A write is accepted only if its version is newer than the
/// entry's, so a fetch that started before an invalidation or an optimistic
/// patch can never overwrite what came after it.
pub struct CacheStore<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
    counter: AtomicU64,
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        CacheStore {
            slots: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }
}

impl<V> CacheStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh version, newer than every version handed out so far.
    pub fn next_version(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reserve a version for a fetch that is about to start.
    ///
    /// Creates an empty slot when the key is unknown so that an invalidation
    /// arriving mid-fetch has something to bump.
    pub fn reserve(&self, key: &CacheKey) -> u64 {
        let version = self.next_version();
        let now = Instant::now();
        let mut slots = lock_recover(&self.slots);
        slots
            .entry(key.clone())
            .or_insert_with(|| Slot::placeholder(now))
            .last_access = now;
        version
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let mut slots = lock_recover(&self.slots);
        let slot = slots.get_mut(key)?;
        slot.last_access = Instant::now();
        slot.entry()
    }

    /// Store a result. Returns `false` when a newer version already owns the entry.
    pub fn put(&self, key: &CacheKey, value: V, version: u64) -> bool {
        self.put_shared(key, Arc::new(value), version)
    }

    pub fn put_shared(&self, key: &CacheKey, value: Arc<V>, version: u64) -> bool {
        let now = Instant::now();
        let mut slots = lock_recover(&self.slots);
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Slot::placeholder(now));

        if version <= slot.version {
            debug!(
                key = %key,
                version,
                current = slot.version,
                "Discarding cache write superseded by a newer version"
            );
            return false;
        }

        slot.value = Some(value);
        slot.version = version;
        slot.fetched_at = now;
        slot.last_access = now;
        slot.stale = false;
        trace!(key = %key, version, "Cache entry stored");
        true
    }

    /// Mark every entry under `prefix` stale and bump its version.
    /// Data is kept so it can still be served while a refetch is pending.
    pub fn invalidate(&self, prefix: &KeyPrefix) -> usize {
        let mut slots = lock_recover(&self.slots);
        let mut count = 0;
        for (key, slot) in slots.iter_mut().filter(|(key, _)| key.has_prefix(prefix)) {
            slot.stale = true;
            slot.version = self.next_version();
            count += 1;
            trace!(key = %key, version = slot.version, "Cache entry invalidated");
        }
        debug!(prefix = %prefix, count, "Invalidated cache prefix");
        count
    }

    /// Mark everything stale, e.g. after push notifications were missed.
    pub fn invalidate_all(&self) -> usize {
        let mut slots = lock_recover(&self.slots);
        for slot in slots.values_mut() {
            slot.stale = true;
            slot.version = self.next_version();
        }
        slots.len()
    }

    /// Whether an entry must be refetched before it is served as fresh.
    pub fn is_stale(entry: &CacheEntry<V>, max_age: Duration) -> bool {
        entry.stale || entry.fetched_at.elapsed() > max_age
    }

    /// Keys under `prefix` that currently hold a value.
    pub fn keys_with_prefix(&self, prefix: &KeyPrefix) -> Vec<CacheKey> {
        let slots = lock_recover(&self.slots);
        let mut keys: Vec<CacheKey> = slots
            .iter()
            .filter(|(key, slot)| key.has_prefix(prefix) && slot.value.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Replace a populated entry with `f(current)` under a fresh version,
    /// returning what is needed to undo it. Unpopulated keys, and keys for
    /// which `f` returns `None`, are left alone.
    pub fn patch(&self, key: &CacheKey, f: impl FnOnce(&V) -> Option<V>) -> Option<PatchRecord<V>> {
        let mut slots = lock_recover(&self.slots);
        let slot = slots.get_mut(key)?;
        let previous = slot.entry()?;

        let patched = f(&previous.value)?;
        slot.value = Some(Arc::new(patched));
        slot.version = self.next_version();

        Some(PatchRecord {
            key: key.clone(),
            previous,
            patched_version: slot.version,
        })
    }

    /// Undo a patch. The previous value is put back only if nothing touched
    /// the entry since; otherwise the entry is invalidated.
    pub fn restore(&self, record: PatchRecord<V>) -> RestoreOutcome {
        let mut slots = lock_recover(&self.slots);
        let Some(slot) = slots.get_mut(&record.key) else {
            return RestoreOutcome::Gone;
        };

        if slot.version != record.patched_version {
            slot.stale = true;
            slot.version = self.next_version();
            return RestoreOutcome::Superseded;
        }

        slot.value = Some(record.previous.value);
        slot.fetched_at = record.previous.fetched_at;
        slot.stale = record.previous.stale;
        slot.version = self.next_version();
        RestoreOutcome::Restored
    }

    /// Drop entries not read or written for longer than `retention(key)`.
    pub fn evict_idle(&self, retention: impl Fn(&CacheKey) -> Duration) -> usize {
        let now = Instant::now();
        let mut slots = lock_recover(&self.slots);
        let before = slots.len();
        slots.retain(|key, slot| now.duration_since(slot.last_access) <= retention(key));
        let evicted = before - slots.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        lock_recover(&self.slots)
            .values()
            .filter(|slot| slot.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::EntityKind;
    use crate::owner::OwnerId;

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id).unwrap()
    }

    fn events_key(owner_id: &str, descriptor: &str) -> CacheKey {
        CacheKey::new(owner(owner_id), EntityKind::Events, descriptor)
    }

    #[tokio::test(start_paused = true)]
    async fn put_then_get() {
        let cache = CacheStore::new();
        let key = events_key("a", "jan");
        let v = cache.next_version();
        assert!(cache.put(&key, vec![1, 2, 3], v));
        let entry = cache.get(&key).unwrap();
        assert_eq!(*entry.value, vec![1, 2, 3]);
        assert_eq!(entry.version, v);
        assert!(!entry.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn older_version_cannot_overwrite() {
        let cache = CacheStore::new();
        let key = events_key("a", "jan");
        let old = cache.next_version();
        let new = cache.next_version();
        assert!(cache.put(&key, vec![2], new));
        assert!(!cache.put(&key, vec![1], old));
        assert_eq!(*cache.get(&key).unwrap().value, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_mid_fetch_rejects_the_fetch() {
        let cache: CacheStore<Vec<u32>> = CacheStore::new();
        let key = events_key("a", "jan");
        let ticket = cache.reserve(&key);
        cache.invalidate(&KeyPrefix::kind(owner("a"), EntityKind::Events));
        assert!(!cache.put(&key, vec![1], ticket));
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_invalidation_spares_other_owners_and_kinds() {
        let cache = CacheStore::new();
        let jan = events_key("a", "jan");
        let feb = events_key("a", "feb");
        let other = events_key("b", "jan");
        let calendars = CacheKey::new(owner("a"), EntityKind::Calendars, "");
        for key in [&jan, &feb, &other, &calendars] {
            let v = cache.next_version();
            cache.put(key, vec![0], v);
        }

        let count = cache.invalidate(&KeyPrefix::kind(owner("a"), EntityKind::Events));
        assert_eq!(count, 2);
        assert!(cache.get(&jan).unwrap().stale);
        assert!(cache.get(&feb).unwrap().stale);
        assert!(!cache.get(&other).unwrap().stale);
        assert!(!cache.get(&calendars).unwrap().stale);

        // Idempotent
        assert_eq!(cache.invalidate(&KeyPrefix::kind(owner("a"), EntityKind::Events)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn staleness_by_age() {
        let cache = CacheStore::new();
        let key = events_key("a", "jan");
        let v = cache.next_version();
        cache.put(&key, vec![0], v);
        let entry = cache.get(&key).unwrap();
        assert!(!CacheStore::is_stale(&entry, Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(CacheStore::is_stale(&entry, Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn patch_and_restore_round_trip() {
        let cache = CacheStore::new();
        let key = events_key("a", "jan");
        let v = cache.next_version();
        cache.put(&key, vec![1, 2], v);

        let record = cache
            .patch(&key, |rows| {
                let mut rows = rows.clone();
                rows.push(3);
                Some(rows)
            })
            .unwrap();
        assert_eq!(*cache.get(&key).unwrap().value, vec![1, 2, 3]);

        assert_eq!(cache.restore(record), RestoreOutcome::Restored);
        let entry = cache.get(&key).unwrap();
        assert_eq!(*entry.value, vec![1, 2]);
        assert!(entry.version > v);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_after_newer_write_invalidates_instead() {
        let cache = CacheStore::new();
        let key = events_key("a", "jan");
        let v = cache.next_version();
        cache.put(&key, vec![1], v);
        let record = cache.patch(&key, |_| Some(vec![1, 2])).unwrap();
        let newer = cache.next_version();
        cache.put(&key, vec![9], newer);

        assert_eq!(cache.restore(record), RestoreOutcome::Superseded);
        let entry = cache.get(&key).unwrap();
        assert_eq!(*entry.value, vec![9]);
        assert!(entry.stale);
    }

    #[tokio::test(start_paused = true)]
    async fn patch_skips_unpopulated_keys() {
        let cache: CacheStore<Vec<u32>> = CacheStore::new();
        let key = events_key("a", "jan");
        cache.reserve(&key);
        assert!(cache.patch(&key, |v| Some(v.clone())).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn declined_patch_keeps_version() {
        let cache = CacheStore::new();
        let key = events_key("a", "jan");
        let v = cache.next_version();
        cache.put(&key, vec![1], v);
        assert!(cache.patch(&key, |_| None).is_none());
        assert_eq!(cache.get(&key).unwrap().version, v);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_evicted() {
        let cache = CacheStore::new();
        let old = events_key("a", "old");
        let fresh = events_key("a", "fresh");
        let v = cache.next_version();
        cache.put(&old, vec![0], v);
        tokio::time::advance(Duration::from_secs(600)).await;
        let v = cache.next_version();
        cache.put(&fresh, vec![0], v);

        assert_eq!(cache.evict_idle(|_| Duration::from_secs(300)), 1);
        assert!(cache.get(&old).is_none());
        assert!(cache.get(&fresh).is_some());
    }
}
