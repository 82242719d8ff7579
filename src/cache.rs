// TTL Cache
//
// Small expiring lookup cache with an injected clock. Owned by whichever
// component needs it; there is no ambient global cache state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Clock function, injectable for tests
pub type Clock = fn() -> DateTime<Utc>;

fn system_clock() -> DateTime<Utc> {
    Utc::now()
}

/// Expiring key/value cache
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Clock,
    entries: HashMap<K, Entry<V>>,
}

struct Entry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create a cache with the given TTL and the system clock
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, system_clock)
    }

    /// Create a cache with an injected clock
    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            ttl,
            clock,
            entries: HashMap::new(),
        }
    }

    /// Look up a value; expired entries are removed and report a miss
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = (self.clock)();
        let expired = match self.entries.get(key) {
            Some(entry) => self.expired(entry, now),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store a value, resetting its TTL
    pub fn put(&mut self, key: K, value: V) {
        let stored_at = (self.clock)();
        self.entries.insert(key, Entry { value, stored_at });
    }

    /// Remove a single entry immediately
    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn expired(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(entry.stored_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(true)
    }
}
