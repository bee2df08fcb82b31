//! The in-process ephemeral store.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use audiodrop_core::config::store::StoreConfig;
use audiodrop_core::result::AppResult;

use crate::error::{StoreError, StoreResult};
use crate::pubsub::{Subscribers, SubscriptionId};
use crate::stats::{Counters, StoreStats};
use crate::value::{SortedSet, Value};

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after this long.
    Expires(Duration),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    seq: u64,
}

impl Inner {
    /// Look up a key, dropping it first if its expiry has passed.
    fn live(&mut self, key: &str, now: Instant, counters: &Counters) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            Counters::bump(&counters.expired, 1);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn live_or_insert(
        &mut self,
        key: &str,
        now: Instant,
        counters: &Counters,
        make: impl FnOnce() -> Value,
    ) -> &mut Entry {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            Counters::bump(&counters.expired, 1);
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: make(),
                expires_at: None,
            })
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty_collection())
        {
            self.entries.remove(key);
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &Value) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// In-process key/value store with per-key expiry and pub/sub.
///
/// Missing keys read as `None`, `0` or empty. Expired keys are invisible to
/// every read even before the sweeper removes them.
#[derive(Debug)]
pub struct EphemeralStore {
    inner: Mutex<Inner>,
    subscribers: Subscribers,
    counters: Counters,
    max_list_length: usize,
}

impl EphemeralStore {
    /// Create an empty store.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            subscribers: Subscribers::default(),
            counters: Counters::default(),
            max_list_length: config.max_list_length.max(1),
        }
    }

    /// Create an empty store wrapped in an `Arc`.
    pub fn shared(config: &StoreConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    fn read<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Value) -> StoreResult<T>,
    ) -> StoreResult<Option<T>> {
        let mut inner = self.inner.lock();
        match inner.live(key, Instant::now(), &self.counters) {
            Some(entry) => f(&entry.value).map(Some),
            None => Ok(None),
        }
    }

    fn write<T>(
        &self,
        key: &str,
        make: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut inner = self.inner.lock();
        let entry = inner.live_or_insert(key, Instant::now(), &self.counters, make);
        let out = f(&mut entry.value);
        inner.drop_if_empty(key);
        if out.is_ok() {
            Counters::bump(&self.counters.sets, 1);
        }
        out
    }

    /// Like `read`, recording a hit when the key is live and a miss
    /// otherwise.
    fn read_counted<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Value) -> StoreResult<T>,
    ) -> StoreResult<Option<T>> {
        let found = self.read(key, f)?;
        self.record_read(found.is_some());
        Ok(found)
    }

    fn modify<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Value) -> StoreResult<T>,
    ) -> StoreResult<Option<T>> {
        let mut inner = self.inner.lock();
        let out = match inner.live(key, Instant::now(), &self.counters) {
            Some(entry) => f(&mut entry.value).map(Some),
            None => Ok(None),
        };
        inner.drop_if_empty(key);
        out
    }

    /// Like `modify` for removals: counts a delete when `removed` says the
    /// outcome took something out.
    fn remove_with<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Value) -> StoreResult<T>,
        removed: impl FnOnce(&T) -> bool,
    ) -> StoreResult<Option<T>> {
        let out = self.modify(key, f)?;
        if out.as_ref().is_some_and(removed) {
            Counters::bump(&self.counters.deletes, 1);
        }
        Ok(out)
    }

    fn record_read(&self, hit: bool) {
        if hit {
            Counters::bump(&self.counters.hits, 1);
        } else {
            Counters::bump(&self.counters.misses, 1);
        }
    }

    // ── Scalars ────────────────────────────────────────────

    /// Store a scalar, replacing any previous value and expiry.
    pub fn set(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        let now = Instant::now();
        self.inner.lock().entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.into()),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Counters::bump(&self.counters.sets, 1);
    }

    /// Store a scalar only if the key is absent. Returns `true` if stored.
    pub fn set_nx(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.live(key, now, &self.counters).is_some() {
            return false;
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.into()),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Counters::bump(&self.counters.sets, 1);
        true
    }

    /// Read a scalar.
    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let found = self.read(key, |v| match v {
            Value::Scalar(s) => Ok(s.clone()),
            other => Err(wrong_type(key, "string", other)),
        })?;
        self.record_read(found.is_some());
        Ok(found)
    }

    /// Remove a key of any type. Returns `true` if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let existed = inner.live(key, Instant::now(), &self.counters).is_some();
        if existed {
            inner.entries.remove(key);
            Counters::bump(&self.counters.deletes, 1);
        }
        existed
    }

    /// Remove a scalar only if it still holds `expected`.
    pub fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let mut inner = self.inner.lock();
        let matches = matches!(
            inner.live(key, Instant::now(), &self.counters),
            Some(Entry { value: Value::Scalar(s), .. }) if s.as_str() == expected
        );
        if matches {
            inner.entries.remove(key);
            Counters::bump(&self.counters.deletes, 1);
        }
        matches
    }

    /// Whether a live key exists.
    pub fn exists(&self, key: &str) -> bool {
        self.inner
            .lock()
            .live(key, Instant::now(), &self.counters)
            .is_some()
    }

    /// Read several scalars at once.
    pub fn mget(&self, keys: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let found = match inner.live(key, now, &self.counters) {
                Some(Entry {
                    value: Value::Scalar(s),
                    ..
                }) => Some(s.clone()),
                Some(entry) => return Err(wrong_type(key, "string", &entry.value)),
                None => None,
            };
            self.record_read(found.is_some());
            out.push(found);
        }
        Ok(out)
    }

    /// Store several persistent scalars at once.
    pub fn mset<I, K, V>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut inner = self.inner.lock();
        for (key, value) in pairs {
            inner.entries.insert(
                key.into(),
                Entry {
                    value: Value::Scalar(value.into()),
                    expires_at: None,
                },
            );
            Counters::bump(&self.counters.sets, 1);
        }
    }

    /// Read and deserialize a JSON scalar.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize and store a JSON scalar.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl);
        Ok(())
    }

    // ── Counters ───────────────────────────────────────────

    /// Add `delta` to an integer scalar, creating it at 0. Keeps any expiry.
    pub fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.write(
            key,
            || Value::Scalar("0".to_string()),
            |v| match v {
                Value::Scalar(s) => {
                    let current: i64 = s
                        .parse()
                        .map_err(|_| StoreError::NotAnInteger(key.to_string()))?;
                    let next = current
                        .checked_add(delta)
                        .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;
                    *s = next.to_string();
                    Ok(next)
                }
                other => Err(wrong_type(key, "string", other)),
            },
        )
    }

    /// Increment an integer scalar by one.
    pub fn incr(&self, key: &str) -> StoreResult<i64> {
        self.incr_by(key, 1)
    }

    /// Decrement an integer scalar by one.
    pub fn decr(&self, key: &str) -> StoreResult<i64> {
        self.incr_by(key, -1)
    }

    // ── Hashes ─────────────────────────────────────────────

    /// Set a hash field. Returns `true` if the field was new.
    pub fn hset(&self, key: &str, field: &str, value: impl Into<String>) -> StoreResult<bool> {
        self.write(
            key,
            || Value::Hash(HashMap::new()),
            |v| match v {
                Value::Hash(map) => Ok(map.insert(field.to_string(), value.into()).is_none()),
                other => Err(wrong_type(key, "hash", other)),
            },
        )
    }

    /// Read a hash field.
    pub fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let found = self
            .read(key, |v| match v {
                Value::Hash(map) => Ok(map.get(field).cloned()),
                other => Err(wrong_type(key, "hash", other)),
            })?
            .flatten();
        self.record_read(found.is_some());
        Ok(found)
    }

    /// Remove a hash field. Returns `true` if it existed.
    pub fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self
            .remove_with(
                key,
                |v| match v {
                    Value::Hash(map) => Ok(map.remove(field).is_some()),
                    other => Err(wrong_type(key, "hash", other)),
                },
                |removed| *removed,
            )?
            .unwrap_or(false))
    }

    /// Read every field of a hash.
    pub fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::Hash(map) => Ok(map.clone()),
                other => Err(wrong_type(key, "hash", other)),
            })?
            .unwrap_or_default())
    }

    // ── Lists ──────────────────────────────────────────────

    /// Push to the front of a list, trimming the oldest elements beyond the
    /// configured maximum. Returns the new length.
    pub fn lpush(&self, key: &str, value: impl Into<String>) -> StoreResult<usize> {
        let max = self.max_list_length;
        self.write(
            key,
            || Value::List(VecDeque::new()),
            |v| match v {
                Value::List(list) => {
                    list.push_front(value.into());
                    list.truncate(max);
                    Ok(list.len())
                }
                other => Err(wrong_type(key, "list", other)),
            },
        )
    }

    /// Pop from the back of a list (the oldest element).
    pub fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .remove_with(
                key,
                |v| match v {
                    Value::List(list) => Ok(list.pop_back()),
                    other => Err(wrong_type(key, "list", other)),
                },
                Option::is_some,
            )?
            .flatten())
    }

    /// Length of a list.
    pub fn llen(&self, key: &str) -> StoreResult<usize> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::List(list) => Ok(list.len()),
                other => Err(wrong_type(key, "list", other)),
            })?
            .unwrap_or(0))
    }

    // ── Sets ───────────────────────────────────────────────

    /// Add a set member. Returns `true` if it was new.
    pub fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.write(
            key,
            || Value::Set(BTreeSet::new()),
            |v| match v {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                other => Err(wrong_type(key, "set", other)),
            },
        )
    }

    /// Remove a set member. Returns `true` if it was present.
    pub fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .remove_with(
                key,
                |v| match v {
                    Value::Set(set) => Ok(set.remove(member)),
                    other => Err(wrong_type(key, "set", other)),
                },
                |removed| *removed,
            )?
            .unwrap_or(false))
    }

    /// All members of a set, in lexical order.
    pub fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                other => Err(wrong_type(key, "set", other)),
            })?
            .unwrap_or_default())
    }

    /// Number of members in a set.
    pub fn scard(&self, key: &str) -> StoreResult<usize> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::Set(set) => Ok(set.len()),
                other => Err(wrong_type(key, "set", other)),
            })?
            .unwrap_or(0))
    }

    /// Whether `member` is in the set.
    pub fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::Set(set) => Ok(set.contains(member)),
                other => Err(wrong_type(key, "set", other)),
            })?
            .unwrap_or(false))
    }

    // ── Sorted sets ────────────────────────────────────────

    /// Add or re-score a sorted-set member. Returns `true` if it was new.
    ///
    /// Members with equal scores are ordered by when they were (re-)added.
    pub fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        let entry = inner.live_or_insert(key, Instant::now(), &self.counters, || {
            Value::SortedSet(SortedSet::default())
        });
        let added = match &mut entry.value {
            Value::SortedSet(z) => z.insert(member, score, seq),
            other => return Err(wrong_type(key, "zset", other)),
        };
        Counters::bump(&self.counters.sets, 1);
        Ok(added)
    }

    /// Remove and return the lowest-scored member.
    pub fn zpopmin(&self, key: &str) -> StoreResult<Option<(String, i64)>> {
        Ok(self
            .remove_with(
                key,
                |v| match v {
                    Value::SortedSet(z) => Ok(z.pop_min()),
                    other => Err(wrong_type(key, "zset", other)),
                },
                Option::is_some,
            )?
            .flatten())
    }

    /// Remove a sorted-set member. Returns `true` if it was present.
    pub fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .remove_with(
                key,
                |v| match v {
                    Value::SortedSet(z) => Ok(z.remove(member)),
                    other => Err(wrong_type(key, "zset", other)),
                },
                |removed| *removed,
            )?
            .unwrap_or(false))
    }

    /// Score of a sorted-set member.
    pub fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::SortedSet(z) => Ok(z.score(member)),
                other => Err(wrong_type(key, "zset", other)),
            })?
            .flatten())
    }

    /// Number of members in a sorted set.
    pub fn zcard(&self, key: &str) -> StoreResult<usize> {
        Ok(self
            .read_counted(key, |v| match v {
                Value::SortedSet(z) => Ok(z.len()),
                other => Err(wrong_type(key, "zset", other)),
            })?
            .unwrap_or(0))
    }

    /// Members at ranks `start..=stop` in ascending order.
    pub fn zrange(&self, key: &str, start: usize, stop: usize) -> StoreResult<Vec<(String, i64)>> {
        if stop < start {
            return Ok(Vec::new());
        }
        Ok(self
            .read_counted(key, |v| match v {
                Value::SortedSet(z) => Ok(z
                    .iter()
                    .skip(start)
                    .take((stop - start).saturating_add(1))
                    .map(|(m, s)| (m.to_string(), s))
                    .collect()),
                other => Err(wrong_type(key, "zset", other)),
            })?
            .unwrap_or_default())
    }

    // ── Expiry ─────────────────────────────────────────────

    /// Set a key's remaining lifetime. Returns `false` if the key is missing.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.live(key, now, &self.counters) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }

    /// Clear a key's expiry. Returns `false` if the key is missing.
    pub fn persist(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.live(key, Instant::now(), &self.counters) {
            Some(entry) => {
                entry.expires_at = None;
                true
            }
            None => false,
        }
    }

    /// Remaining lifetime of a key.
    pub fn ttl(&self, key: &str) -> Ttl {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.live(key, now, &self.counters) {
            None => Ttl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => Ttl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => Ttl::Expires(at.saturating_duration_since(now)),
        }
    }

    /// Remove every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.entries.len();
            inner.entries.retain(|_, e| !e.is_expired(now));
            before - inner.entries.len()
        };
        if removed > 0 {
            Counters::bump(&self.counters.expired, removed as u64);
            debug!(removed, "Purged expired store keys");
        }
        removed
    }

    // ── Pub/sub ────────────────────────────────────────────

    /// Publish a message. Returns the number of subscribers reached.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        Counters::bump(&self.counters.published, 1);
        self.subscribers.deliver(channel, message)
    }

    /// Register a callback for a channel.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.subscribers.add(channel, Arc::new(callback))
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Number of subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers.count(channel)
    }

    // ── Administration ─────────────────────────────────────

    /// Whether the store is responsive.
    pub fn ping(&self) -> bool {
        self.inner.try_lock_for(Duration::from_secs(1)).is_some()
    }

    /// Operation counters plus current size.
    pub fn stats(&self) -> StoreStats {
        let size = self.inner.lock().entries.len();
        self.counters.snapshot(size)
    }

    /// Zero the operation counters.
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Number of keys held, including expired keys not yet swept.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key.
    pub fn flush_all(&self) {
        let removed = {
            let mut inner = self.inner.lock();
            let n = inner.entries.len();
            inner.entries.clear();
            n
        };
        debug!(removed, "Flushed store");
    }
}
