//! Count- and size-bounded LRU map used as the in-memory cache layer.

use lru::LruCache;
use serde::Deserialize;

/// Ceilings for one in-memory cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheLimits {
  /// Maximum number of entries kept in memory
  pub max_entries: usize,
  /// Maximum aggregate weight (bytes) of the entries kept in memory
  pub max_bytes: usize,
}

impl CacheLimits {
  pub const fn new(max_entries: usize, max_bytes: usize) -> Self {
    Self {
      max_entries,
      max_bytes,
    }
  }

  /// 50 images, 20 MiB.
  pub const fn images() -> Self {
    Self::new(50, 20 * 1024 * 1024)
  }

  pub const fn memos() -> Self {
    Self::new(1000, 16 * 1024 * 1024)
  }

  pub const fn counters() -> Self {
    Self::new(16, 64 * 1024)
  }
}

/// LRU map bounded by both entry count and total weight.
///
/// Eviction is strict least-recently-used: `get` refreshes recency, `peek`
/// does not. A value heavier than the whole byte budget is never admitted.
pub struct BoundedLru<V> {
  entries: LruCache<String, (V, usize)>,
  limits: CacheLimits,
  total_bytes: usize,
}

impl<V> BoundedLru<V> {
  pub fn new(limits: CacheLimits) -> Self {
    Self {
      entries: LruCache::unbounded(),
      limits,
      total_bytes: 0,
    }
  }

  pub fn get(&mut self, key: &str) -> Option<&V> {
    self.entries.get(key).map(|(value, _)| value)
  }

  pub fn peek(&self, key: &str) -> Option<&V> {
    self.entries.peek(key).map(|(value, _)| value)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries.contains(key)
  }

  /// Insert or replace `key`, returning the keys evicted to make room.
  pub fn insert(&mut self, key: String, value: V, weight: usize) -> Vec<String> {
    self.remove(&key);

    if self.limits.max_entries == 0 || weight > self.limits.max_bytes {
      return Vec::new();
    }

    self.total_bytes += weight;
    self.entries.push(key, (value, weight));

    let mut evicted = Vec::new();
    while self.entries.len() > self.limits.max_entries || self.total_bytes > self.limits.max_bytes {
      match self.entries.pop_lru() {
        Some((old_key, (_, old_weight))) => {
          self.total_bytes -= old_weight;
          evicted.push(old_key);
        }
        None => break,
      }
    }
    evicted
  }

  pub fn remove(&mut self, key: &str) -> Option<V> {
    self.entries.pop(key).map(|(value, weight)| {
      self.total_bytes -= weight;
      value
    })
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.total_bytes = 0;
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn total_bytes(&self) -> usize {
    self.total_bytes
  }
}
