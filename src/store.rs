//! Store adapter.
//!
//! The engine coordinates exclusively through atomic multi-key operations
//! against one shared store. This adapter keeps the primitive structures —
//! key/value pairs, hashes, sets, and ordered sets — behind a single lock;
//! a closure passed to [`Store::atomic`] executes as one indivisible
//! operation, the engine's only point of mutual exclusion. No observer can
//! see a job between structures.
//!
//! Closures must validate before mutating: an `Err` returned mid-closure
//! does not roll back writes already made, it only stops the operation.
//! Every transition in this crate checks its preconditions (membership,
//! lease token) before the first write.
//!
//! The store also carries one notification handle per queue, raised when
//! work becomes dequeueable. Workers park on it between polls.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;

/// Shared store handle. Cheap to clone via `Arc`.
#[derive(Default)]
pub struct Store {
    inner: Mutex<StoreInner>,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
}

#[derive(Default)]
struct StoreInner {
    kv: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, ZSet>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one indivisible multi-key operation.
    pub fn atomic<T>(&self, f: impl FnOnce(&mut StoreTx<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock();
        let mut tx = StoreTx { inner: &mut guard };
        f(&mut tx)
    }

    /// Notification handle for a queue. Created on first use.
    pub fn notifier(&self, queue: &str) -> Arc<Notify> {
        let mut notifiers = self.notifiers.lock();
        Arc::clone(
            notifiers
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Wake one worker parked on the queue's notifier.
    pub fn signal(&self, queue: &str) {
        self.notifier(queue).notify_one();
    }
}

/// Handle for store operations within one atomic execution.
pub struct StoreTx<'a> {
    inner: &'a mut StoreInner,
}

impl StoreTx<'_> {
    // -- key/value --

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.kv.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.kv.insert(key.to_string(), value.into());
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.inner.kv.remove(key).is_some()
    }

    /// Increment a numeric key, creating it at 0 first. Returns the new value.
    pub fn incr(&mut self, key: &str) -> i64 {
        let entry = self.inner.kv.entry(key.to_string()).or_insert_with(|| "0".into());
        let next = entry.parse::<i64>().unwrap_or(0) + 1;
        *entry = next.to_string();
        next
    }

    // -- hashes --

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.inner.hashes.get(key)?.get(field).cloned()
    }

    pub fn hset(&mut self, key: &str, field: &str, value: impl Into<String>) {
        self.inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> bool {
        match self.inner.hashes.get_mut(key) {
            Some(hash) => hash.remove(field).is_some(),
            None => false,
        }
    }

    /// Increment a numeric hash field by `by`, creating it at 0 first.
    /// Returns the new value.
    pub fn hincr(&mut self, key: &str, field: &str, by: i64) -> i64 {
        let hash = self.inner.hashes.entry(key.to_string()).or_default();
        let entry = hash.entry(field.to_string()).or_insert_with(|| "0".into());
        let next = entry.parse::<i64>().unwrap_or(0) + by;
        *entry = next.to_string();
        next
    }

    /// Number of fields in a hash; 0 if the hash does not exist.
    pub fn hlen(&self, key: &str) -> usize {
        self.inner.hashes.get(key).map_or(0, HashMap::len)
    }

    /// Remove a hash and all its fields.
    pub fn hclear(&mut self, key: &str) -> bool {
        self.inner.hashes.remove(key).is_some()
    }

    // -- sets --

    pub fn sadd(&mut self, key: &str, member: impl Into<String>) -> bool {
        self.inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.into())
    }

    pub fn srem(&mut self, key: &str, member: &str) -> bool {
        let Some(set) = self.inner.sets.get_mut(key) else {
            return false;
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.inner.sets.remove(key);
        }
        removed
    }

    pub fn scard(&self, key: &str) -> u64 {
        self.inner.sets.get(key).map_or(0, |s| s.len() as u64)
    }

    pub fn smembers(&self, key: &str) -> Vec<String> {
        self.inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sclear(&mut self, key: &str) -> bool {
        self.inner.sets.remove(key).is_some()
    }

    // -- ordered sets --
    //
    // Entries order by (score, member) with numeric-aware member comparison,
    // so equal-priority jobs come out in id order: FIFO within a priority
    // band, oldest delay first in the delayed set.

    pub fn zadd(&mut self, key: &str, member: impl Into<String>, score: i64) {
        self.inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.into(), score);
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> bool {
        let Some(zset) = self.inner.zsets.get_mut(key) else {
            return false;
        };
        let removed = zset.remove(member);
        if zset.is_empty() {
            self.inner.zsets.remove(key);
        }
        removed
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<i64> {
        self.inner.zsets.get(key)?.score(member)
    }

    pub fn zcard(&self, key: &str) -> u64 {
        self.inner.zsets.get(key).map_or(0, |z| z.len() as u64)
    }

    /// Remove and return the lowest-ordered member.
    pub fn zpop_min(&mut self, key: &str) -> Option<(String, i64)> {
        let zset = self.inner.zsets.get_mut(key)?;
        let popped = zset.pop_min();
        if zset.is_empty() {
            self.inner.zsets.remove(key);
        }
        popped
    }

    /// All members with score <= `max_score`, ascending.
    pub fn zrange_upto(&self, key: &str, max_score: i64) -> Vec<(String, i64)> {
        self.inner
            .zsets
            .get(key)
            .map(|z| z.range_upto(max_score))
            .unwrap_or_default()
    }

    /// Up to `limit` members in ascending order.
    pub fn zmembers(&self, key: &str, limit: usize) -> Vec<String> {
        self.inner
            .zsets
            .get(key)
            .map(|z| z.members(limit))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Ordered set
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ZSet {
    ord: BTreeSet<Entry>,
    scores: HashMap<String, i64>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone)]
struct Entry {
    score: i64,
    num: Option<u64>,
    member: String,
}

impl Entry {
    fn new(member: String, score: i64) -> Self {
        let num = member.parse::<u64>().ok();
        Self { score, num, member }
    }
}

impl ZSet {
    fn insert(&mut self, member: String, score: i64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ord.remove(&Entry::new(member.clone(), old));
        }
        self.ord.insert(Entry::new(member, score));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.ord.remove(&Entry::new(member.to_string(), score)),
            None => false,
        }
    }

    fn score(&self, member: &str) -> Option<i64> {
        self.scores.get(member).copied()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn pop_min(&mut self) -> Option<(String, i64)> {
        let first = self.ord.first()?.clone();
        self.ord.remove(&first);
        self.scores.remove(&first.member);
        Some((first.member, first.score))
    }

    fn range_upto(&self, max_score: i64) -> Vec<(String, i64)> {
        self.ord
            .iter()
            .take_while(|e| e.score <= max_score)
            .map(|e| (e.member.clone(), e.score))
            .collect()
    }

    fn members(&self, limit: usize) -> Vec<String> {
        self.ord.iter().take(limit).map(|e| e.member.clone()).collect()
    }
}
