//! Two-tier cache store: bounded memory layer over a durable backing store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use super::bounded::{BoundedLru, CacheLimits};
use super::key::{Namespace, RecordPath};
use super::scheduler::{FlushReport, Flushable};
use super::storage::DurableStore;
use super::traits::{CacheValue, Cacheable, EntityCache};

/// When a `set` reaches durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
  /// Left dirty for the persistence scheduler.
  Deferred,
  /// Written immediately; stays dirty only if that write fails.
  WriteThrough,
}

/// Outcome of one durable write or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persisted {
  Written,
  /// A newer change to the key landed first; its own write covers it.
  Superseded,
  Failed,
}

/// Durable state not yet confirmed for a key.
struct Pending<V> {
  /// `None` is a pending delete.
  value: Option<V>,
  generation: u64,
}

struct StoreState<V> {
  memory: BoundedLru<V>,
  pending: HashMap<String, Pending<V>>,
  generation: u64,
}

impl<V> StoreState<V> {
  fn mark(&mut self, key: &str, value: Option<V>) -> u64 {
    self.generation += 1;
    let generation = self.generation;
    self
      .pending
      .insert(key.to_string(), Pending { value, generation });
    generation
  }

  fn is_current(&self, key: &str, generation: u64) -> bool {
    self.pending.get(key).map(|p| p.generation) == Some(generation)
  }

  /// Clear the pending entry for `key` if nothing touched it since `generation`.
  fn settle(&mut self, key: &str, generation: u64) {
    if self.is_current(key, generation) {
      self.pending.remove(key);
    }
  }
}

/// Cache for one record kind, scoped to one identity namespace.
///
/// Reads check memory, then unflushed writes, then durable storage. Writes
/// land in memory at once and are queued for durable storage. Entries evicted
/// from memory by LRU pressure stay queued until flushed, so eviction never
/// loses a write.
pub struct CacheStore<V: CacheValue> {
  namespace: Namespace,
  durable: Arc<dyn DurableStore>,
  policy: WritePolicy,
  state: Mutex<StoreState<V>>,
  /// Serializes durable reads and writes. Taken before `state`, never after.
  io: Mutex<()>,
}

impl<V: CacheValue> CacheStore<V> {
  pub fn new(
    namespace: Namespace,
    durable: Arc<dyn DurableStore>,
    limits: CacheLimits,
    policy: WritePolicy,
  ) -> Self {
    Self {
      namespace,
      durable,
      policy,
      state: Mutex::new(StoreState {
        memory: BoundedLru::new(limits),
        pending: HashMap::new(),
        generation: 0,
      }),
      io: Mutex::new(()),
    }
  }

  pub fn namespace(&self) -> &Namespace {
    &self.namespace
  }

  fn lock(&self) -> MutexGuard<'_, StoreState<V>> {
    // State is plain data; a panic elsewhere can't leave it half-updated
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_io(&self) -> MutexGuard<'_, ()> {
    self.io.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn path(&self, key: &str) -> RecordPath {
    self.namespace.record(V::KIND, key)
  }

  fn remember(state: &mut StoreState<V>, key: &str, value: V) {
    let weight = value.weight();
    let evicted = state.memory.insert(key.to_string(), value, weight);
    if !evicted.is_empty() {
      trace!(kind = %V::KIND, evicted = evicted.len(), "Evicted cache entries from memory");
    }
  }

  /// Look up `key`. Misses and unreadable records both return `None`.
  pub fn get(&self, key: &str) -> Option<V> {
    {
      let mut state = self.lock();
      if let Some(value) = state.memory.get(key) {
        return Some(value.clone());
      }
      if let Some(pending) = state.pending.get(key) {
        let value = pending.value.clone()?;
        Self::remember(&mut state, key, value.clone());
        return Some(value);
      }
    }

    let path = self.path(key);
    // Held until the result is cached so a delete can't land in between
    let _io = self.lock_io();
    let bytes = match self.durable.read(&path) {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return None,
      Err(e) => {
        warn!(record = %path, error = %e, "Failed to read cache record");
        return None;
      }
    };

    let value = match V::decode(&bytes) {
      Ok(value) => value,
      Err(e) => {
        warn!(record = %path, error = %e, "Ignoring malformed cache record");
        return None;
      }
    };

    let mut state = self.lock();
    // A write that raced the durable read wins
    if let Some(current) = state.memory.peek(key) {
      return Some(current.clone());
    }
    if let Some(pending) = state.pending.get(key) {
      return pending.value.clone();
    }
    debug!(record = %path, "Loaded cache record from durable storage");
    Self::remember(&mut state, key, value.clone());
    Some(value)
  }

  /// Store `value` under `key`. Unchanged values are not re-persisted.
  pub fn set(&self, key: &str, value: V) {
    let generation = {
      let mut state = self.lock();
      let unchanged = match state.pending.get(key) {
        Some(pending) => pending.value.as_ref() == Some(&value),
        None => state.memory.peek(key) == Some(&value),
      };
      Self::remember(&mut state, key, value.clone());
      if unchanged {
        return;
      }
      state.mark(key, Some(value.clone()))
    };

    if self.policy == WritePolicy::WriteThrough {
      self.persist(key, Some(&value), generation);
    }
  }

  /// Remove `key` from both tiers. Durable removal is best-effort and
  /// retried by the next flush when it fails.
  pub fn delete(&self, key: &str) {
    let generation = {
      let mut state = self.lock();
      state.memory.remove(key);
      state.mark(key, None)
    };

    self.persist(key, None, generation);
  }

  fn persist(&self, key: &str, value: Option<&V>, generation: u64) -> Persisted {
    let path = self.path(key);
    let _io = self.lock_io();
    if !self.lock().is_current(key, generation) {
      trace!(record = %path, "Skipping superseded cache write");
      return Persisted::Superseded;
    }

    let result = match value {
      Some(value) => value
        .encode()
        .and_then(|bytes| self.durable.write(&path, &bytes)),
      None => self.durable.remove(&path),
    };

    match result {
      Ok(()) => {
        self.lock().settle(key, generation);
        Persisted::Written
      }
      Err(e) => {
        warn!(
          record = %path,
          delete = value.is_none(),
          error = %e,
          "Failed to persist cache record, will retry"
        );
        Persisted::Failed
      }
    }
  }

  /// Write every dirty entry to durable storage.
  pub fn flush(&self) -> FlushReport {
    let batch: Vec<(String, Option<V>, u64)> = {
      let state = self.lock();
      state
        .pending
        .iter()
        .map(|(key, p)| (key.clone(), p.value.clone(), p.generation))
        .collect()
    };

    let mut report = FlushReport::default();
    for (key, value, generation) in batch {
      match self.persist(&key, value.as_ref(), generation) {
        Persisted::Written => report.written += 1,
        Persisted::Failed => report.failed += 1,
        Persisted::Superseded => {}
      }
    }
    report
  }

  /// Drop everything held in memory, including unflushed writes.
  pub fn clear_memory(&self) {
    let mut state = self.lock();
    state.memory.clear();
    state.pending.clear();
  }

  /// Number of entries waiting for a durable write or delete.
  pub fn dirty_count(&self) -> usize {
    self.lock().pending.len()
  }

  pub fn is_dirty(&self, key: &str) -> bool {
    self.lock().pending.contains_key(key)
  }

  pub fn memory_len(&self) -> usize {
    self.lock().memory.len()
  }

  pub fn in_memory(&self, key: &str) -> bool {
    self.lock().memory.contains(key)
  }
}

impl<V: CacheValue> Flushable for CacheStore<V> {
  fn name(&self) -> &'static str {
    V::KIND.as_str()
  }

  fn flush(&self) -> FlushReport {
    CacheStore::flush(self)
  }
}

impl<V: Cacheable> EntityCache<V> for CacheStore<V> {
  fn put(&self, key: &str, value: &V) {
    self.set(key, value.clone());
  }

  fn remove(&self, key: &str) {
    self.delete(key);
  }
}
