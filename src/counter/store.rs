//! Bounded-cardinality counter registry.
//!
//! The first `max_unique_counters` distinct keys each get their own
//! counter. Any key first seen after that is folded into one shared overflow
//! counter, so memory stays bounded no matter how many distinct request
//! names a log contains. A key that already has a counter keeps it.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{CounterKey, RequestCounter};
use crate::config::DEFAULT_MAX_UNIQUE_COUNTERS;
use crate::error::Result;
use crate::store::StoreFactory;

/// Reserved name of the counter that absorbs keys past the cap.
pub const OVERFLOW_COUNTER_NAME: &str = "OVERFLOW-COUNTER";

/// Name of the aggregate built by [`CounterStore::total_request_counter`].
pub const TOTAL_COUNTER_NAME: &str = "TOTAL";

pub struct CounterStore {
    name: String,
    factory: StoreFactory,
    max_unique_counters: usize,
    /// Insertion ordered; the overflow counter sits wherever it was created.
    counters: IndexMap<CounterKey, RequestCounter>,
    overflow_key: CounterKey,
}

impl CounterStore {
    /// A cap of zero means "use the default".
    pub fn new(name: impl Into<String>, factory: StoreFactory, max_unique_counters: usize) -> Self {
        let max_unique_counters = if max_unique_counters == 0 {
            DEFAULT_MAX_UNIQUE_COUNTERS
        } else {
            max_unique_counters
        };
        Self {
            name: name.into(),
            factory,
            max_unique_counters,
            counters: IndexMap::new(),
            overflow_key: CounterKey::of(OVERFLOW_COUNTER_NAME),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_unique_counters(&self) -> usize {
        self.max_unique_counters
    }

    /// Record one sample under `key`, or under the overflow counter if `key`
    /// is new and the cap is reached.
    pub fn add(&mut self, key: &CounterKey, timestamp: i64, duration_millis: i32) -> Result<()> {
        self.counter_for_update(key)?
            .inc_requests(timestamp, duration_millis)
    }

    fn counter_for_update(&mut self, key: &CounterKey) -> Result<&mut RequestCounter> {
        if let Some(index) = self.counters.get_index_of(key) {
            return Ok(&mut self.counters[index]);
        }
        if self.unique_counters() < self.max_unique_counters {
            debug!(store = %self.name, counter = %key, "registered counter");
            return self.register(key.clone());
        }
        if let Some(index) = self.counters.get_index_of(&self.overflow_key) {
            return Ok(&mut self.counters[index]);
        }
        warn!(
            store = %self.name,
            max_unique_counters = self.max_unique_counters,
            first_overflowing = %key,
            "counter limit reached, new counters go to {OVERFLOW_COUNTER_NAME}"
        );
        self.register(self.overflow_key.clone())
    }

    fn register(&mut self, key: CounterKey) -> Result<&mut RequestCounter> {
        let counter = RequestCounter::new(key.clone(), self.factory.create()?);
        let (index, _) = self.counters.insert_full(key, counter);
        Ok(&mut self.counters[index])
    }

    /// Dedicated counters, not counting the overflow counter.
    fn unique_counters(&self) -> usize {
        self.counters.len() - usize::from(self.is_overflowing())
    }

    pub fn is_overflowing(&self) -> bool {
        self.counters.contains_key(&self.overflow_key)
    }

    pub fn overflow_counter(&self) -> Option<&RequestCounter> {
        self.counters.get(&self.overflow_key)
    }

    pub fn counter(&self, key: &CounterKey) -> Option<&RequestCounter> {
        self.counters.get(key)
    }

    /// Registered counters in registration order, overflow included.
    pub fn iter(&self) -> impl Iterator<Item = (&CounterKey, &RequestCounter)> {
        self.counters.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CounterKey> {
        self.counters.keys()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Hits over every registered counter, overflow included.
    pub fn total_hits(&self) -> Result<u64> {
        self.counters.values().map(RequestCounter::hits).sum()
    }

    /// Frozen in-memory counter holding every sample of every counter.
    pub fn total_request_counter(&self) -> Result<RequestCounter> {
        let mut all = Vec::new();
        for counter in self.counters.values() {
            for sample in counter.samples()? {
                all.push(sample?);
            }
        }
        all.sort_by_key(|m| m.timestamp);
        let mut total = RequestCounter::in_memory(CounterKey::of(TOTAL_COUNTER_NAME));
        for sample in all {
            total.inc_requests(sample.timestamp, sample.duration_millis)?;
        }
        Ok(total.frozen())
    }
}

/// Routes each sample to a success or a failure store.
pub struct CounterStorePair {
    success: CounterStore,
    failure: CounterStore,
}

impl CounterStorePair {
    pub fn new(factory: StoreFactory, max_unique_counters: usize) -> Self {
        Self {
            success: CounterStore::new("success", factory.clone(), max_unique_counters),
            failure: CounterStore::new("failure", factory, max_unique_counters),
        }
    }

    pub fn add(
        &mut self,
        key: &CounterKey,
        timestamp: i64,
        duration_millis: i32,
        success: bool,
    ) -> Result<()> {
        if success {
            self.success.add(key, timestamp, duration_millis)
        } else {
            self.failure.add(key, timestamp, duration_millis)
        }
    }

    pub fn success(&self) -> &CounterStore {
        &self.success
    }

    pub fn failure(&self) -> &CounterStore {
        &self.failure
    }

    /// Failure counter for `key`; `None` when no failure was ever recorded
    /// under it. Callers analyse such keys without failure awareness.
    pub fn failure_counter(&self, key: &CounterKey) -> Option<&RequestCounter> {
        self.failure.counter(key)
    }

    /// Every key seen in either store, success keys first.
    pub fn keys(&self) -> Vec<CounterKey> {
        let mut keys: Vec<CounterKey> = self.success.keys().cloned().collect();
        for key in self.failure.keys() {
            if self.success.counter(key).is_none() {
                keys.push(key.clone());
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_past_the_cap_share_the_overflow_counter() {
        let mut store = CounterStore::new("test", StoreFactory::memory(), 1);
        let (k1, k2, k3) = (CounterKey::of("key1"), CounterKey::of("key2"), CounterKey::of("key3"));
        store.add(&k1, 0, 10).unwrap();
        store.add(&k2, 1, 10).unwrap();
        store.add(&k3, 2, 10).unwrap();

        assert_eq!(store.len(), 2);
        let names: Vec<&str> = store.keys().map(CounterKey::name).collect();
        assert_eq!(names, vec!["key1", OVERFLOW_COUNTER_NAME]);
        assert_eq!(store.overflow_counter().unwrap().hits().unwrap(), 2);
        assert_eq!(store.total_hits().unwrap(), 3);
    }

    #[test]
    fn registered_keys_keep_their_counter() {
        let mut store = CounterStore::new("test", StoreFactory::memory(), 1);
        let (k1, k2) = (CounterKey::of("key1"), CounterKey::of("key2"));
        store.add(&k1, 0, 1).unwrap();
        store.add(&k2, 1, 1).unwrap();
        store.add(&k1, 2, 1).unwrap();
        assert_eq!(store.counter(&k1).unwrap().hits().unwrap(), 2);
        assert!(store.counter(&k2).is_none());
    }

    #[test]
    fn zero_cap_uses_default() {
        let store = CounterStore::new("test", StoreFactory::memory(), 0);
        assert_eq!(store.max_unique_counters(), DEFAULT_MAX_UNIQUE_COUNTERS);
    }

    #[test]
    fn total_counter_is_ordered() {
        let mut store = CounterStore::new("test", StoreFactory::memory(), 10);
        store.add(&CounterKey::of("a"), 300, 1).unwrap();
        store.add(&CounterKey::of("b"), 100, 1).unwrap();
        store.add(&CounterKey::of("a"), 200, 1).unwrap();
        let total = store.total_request_counter().unwrap();
        let order: Vec<i64> = total.samples().unwrap().map(|m| m.unwrap().timestamp).collect();
        assert_eq!(order, vec![100, 200, 300]);
        assert_eq!(total.key().name(), TOTAL_COUNTER_NAME);
    }

    #[test]
    fn pair_routes_by_outcome() {
        let mut pair = CounterStorePair::new(StoreFactory::memory(), 10);
        let ok = CounterKey::of("GET /");
        let only_failed = CounterKey::of("POST /x");
        pair.add(&ok, 0, 5, true).unwrap();
        pair.add(&ok, 1, 5, true).unwrap();
        pair.add(&only_failed, 2, 5, false).unwrap();

        assert!(pair.failure_counter(&ok).is_none());
        assert_eq!(pair.failure_counter(&only_failed).unwrap().hits().unwrap(), 1);
        assert_eq!(pair.keys(), vec![ok, only_failed]);
    }
}
