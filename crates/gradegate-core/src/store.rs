use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{deadline, Clock, SystemClock};

/// Key-value store where every key carries its own expiry, set at write time.
///
/// Plain `get`/`put` are atomic per key. `increment` and `put_if_absent` are
/// atomic read-modify-write primitives, so concurrent failures against the
/// same counter are never lost. Nothing spans more than one key.
pub trait KvStore: Send + Sync {
    /// Live value for `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: String, ttl: Duration);

    /// Remove `key`. Returns whether a live value was removed.
    fn remove(&self, key: &str) -> bool;

    /// Add one to the counter at `key` (absent or unparsable counts as zero),
    /// refresh its TTL, and return the new value.
    fn increment(&self, key: &str, ttl: Duration) -> u64;

    /// Store `value` only if `key` holds no live value. Returns whether it was stored.
    fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool;
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process [`KvStore`] with lazy expiry.
///
/// Expired entries read as absent and are dropped on the next access to
/// their key; [`MemoryStore::purge_expired`] reclaims the rest.
pub struct MemoryStore<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, Entry>>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key)
    }
}

impl<C: Clock> KvStore for MemoryStore<C> {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.lock();
        Self::live(&mut entries, key, now).map(|e| e.value.clone())
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = deadline(self.clock.now(), ttl);
        self.lock()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn remove(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock();
        matches!(entries.remove(key), Some(e) if e.expires_at > now)
    }

    fn increment(&self, key: &str, ttl: Duration) -> u64 {
        let now = self.clock.now();
        let mut entries = self.lock();
        let current = Self::live(&mut entries, key, now)
            .and_then(|e| e.value.parse::<u64>().ok())
            .unwrap_or(0);
        let next = current.saturating_add(1);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: deadline(now, ttl),
            },
        );
        next
    }

    fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock();
        if Self::live(&mut entries, key, now).is_some() {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: deadline(now, ttl),
            },
        );
        true
    }
}

impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        (**self).put(key, value, ttl)
    }

    fn remove(&self, key: &str) -> bool {
        (**self).remove(key)
    }

    fn increment(&self, key: &str, ttl: Duration) -> u64 {
        (**self).increment(key, ttl)
    }

    fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        (**self).put_if_absent(key, value, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn test_value_expires_after_ttl() {
        let clock = ManualClock::default();
        let store = MemoryStore::with_clock(clock.clone());
        store.put("k", "v".into(), MIN);

        clock.advance(Duration::from_secs(59));
        assert_eq!(store.get("k").as_deref(), Some("v"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_increment_refreshes_ttl() {
        let clock = ManualClock::default();
        let store = MemoryStore::with_clock(clock.clone());
        assert_eq!(store.increment("n", MIN), 1);
        clock.advance(Duration::from_secs(50));
        assert_eq!(store.increment("n", MIN), 2);
        clock.advance(Duration::from_secs(50));
        // Still live: the second increment pushed expiry out.
        assert_eq!(store.increment("n", MIN), 3);
        clock.advance(MIN);
        assert_eq!(store.increment("n", MIN), 1);
    }

    #[test]
    fn test_increment_treats_garbage_as_zero() {
        let store = MemoryStore::new();
        store.put("n", "not-a-number".into(), MIN);
        assert_eq!(store.increment("n", MIN), 1);
    }

    #[test]
    fn test_put_if_absent_only_once_while_live() {
        let clock = ManualClock::default();
        let store = MemoryStore::with_clock(clock.clone());
        assert!(store.put_if_absent("flag", "TRUE".into(), MIN));
        assert!(!store.put_if_absent("flag", "TRUE".into(), MIN));
        clock.advance(MIN);
        assert!(store.put_if_absent("flag", "TRUE".into(), MIN));
    }

    #[test]
    fn test_remove_reports_live_only() {
        let clock = ManualClock::default();
        let store = MemoryStore::with_clock(clock.clone());
        store.put("a", "1".into(), MIN);
        store.put("b", "1".into(), MIN);
        clock.advance(MIN);
        store.put("a", "2".into(), MIN);
        assert!(store.remove("a"));
        assert!(!store.remove("b"));
        assert!(!store.remove("missing"));
    }

    #[test]
    fn test_purge_expired() {
        let clock = ManualClock::default();
        let store = MemoryStore::with_clock(clock.clone());
        store.put("short", "x".into(), Duration::from_secs(1));
        store.put("long", "x".into(), MIN);
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.increment("n", MIN);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("n").as_deref(), Some("800"));
    }
}
