//! Caching implementations for memo types.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::cache::{
  CacheLimits, CacheStore, CacheValue, Cacheable, DurableStore, EntityCache, FlushReport,
  Flushable, Namespace, RecordKind, RecordPath, WritePolicy,
};

use super::types::{HomeStats, ImageBlob, Memo, MemoMeta, MemoState};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl CacheValue for Memo {
  const KIND: RecordKind = RecordKind::Memos;

  fn encode(&self) -> Result<Vec<u8>> {
    serde_json::to_vec(self).map_err(|e| eyre!("Failed to serialize memo {}: {}", self.name, e))
  }

  fn decode(bytes: &[u8]) -> Result<Self> {
    serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to deserialize memo: {}", e))
  }

  fn weight(&self) -> usize {
    std::mem::size_of::<Self>()
      + self.name.len()
      + self.content.len()
      + self.display_time.len()
      + self.tags.iter().map(String::len).sum::<usize>()
      + self.resources.len() * 128
      + self.relations.len() * 96
      + self.reactions.len() * 64
  }
}

impl Cacheable for Memo {
  fn cache_key(&self) -> &str {
    &self.name
  }

  fn sort_key(&self) -> &str {
    &self.display_time
  }
}

impl CacheValue for HomeStats {
  const KIND: RecordKind = RecordKind::Counters;

  fn encode(&self) -> Result<Vec<u8>> {
    serde_json::to_vec(self).map_err(|e| eyre!("Failed to serialize home stats: {}", e))
  }

  fn decode(bytes: &[u8]) -> Result<Self> {
    serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to deserialize home stats: {}", e))
  }

  fn weight(&self) -> usize {
    std::mem::size_of::<Self>() + self.tags.iter().map(String::len).sum::<usize>()
  }

  fn cached_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
    Some(self.refreshed_at)
  }
}

impl CacheValue for ImageBlob {
  const KIND: RecordKind = RecordKind::Images;

  fn encode(&self) -> Result<Vec<u8>> {
    Ok(self.0.clone())
  }

  fn decode(bytes: &[u8]) -> Result<Self> {
    Ok(Self(bytes.to_vec()))
  }

  fn weight(&self) -> usize {
    self.0.len()
  }
}

// ============================================================================
// Memo cache with list index
// ============================================================================

/// Record key of the persisted memo index
const INDEX_KEY: &str = "_index";

/// Offline list query over cached memos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
  pub offset: usize,
  pub limit: usize,
  pub tag: Option<String>,
  /// Pinned memos when set, unpinned memos otherwise
  pub pinned: bool,
  pub archived: bool,
}

impl Default for ListQuery {
  fn default() -> Self {
    Self {
      offset: 0,
      limit: 10,
      tag: None,
      pinned: false,
      archived: false,
    }
  }
}

impl ListQuery {
  fn matches(&self, meta: &MemoMeta) -> bool {
    let state = if self.archived {
      MemoState::Archived
    } else {
      MemoState::Normal
    };

    meta.pinned == self.pinned
      && meta.state == state
      && self
        .tag
        .as_ref()
        .map_or(true, |tag| meta.tags.iter().any(|t| t == tag))
  }
}

#[derive(Default)]
struct MemoIndex {
  entries: BTreeMap<String, MemoMeta>,
  dirty: bool,
  generation: u64,
}

/// Memo records plus a compact index of every cached memo.
///
/// The index lets the cache answer list queries without the server and is
/// persisted as a single record next to the memos.
pub struct MemoCache {
  store: CacheStore<Memo>,
  durable: Arc<dyn DurableStore>,
  index_path: RecordPath,
  index: Mutex<MemoIndex>,
}

impl MemoCache {
  pub fn new(namespace: Namespace, durable: Arc<dyn DurableStore>, limits: CacheLimits) -> Self {
    let index_path = namespace.record(RecordKind::Memos, INDEX_KEY);
    Self {
      store: CacheStore::new(namespace, Arc::clone(&durable), limits, WritePolicy::Deferred),
      durable,
      index_path,
      index: Mutex::new(MemoIndex::default()),
    }
  }

  fn lock_index(&self) -> MutexGuard<'_, MemoIndex> {
    self.index.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Load the persisted index. A missing or unreadable index starts empty.
  pub fn load_index(&self) {
    let entries = match self.durable.read(&self.index_path) {
      Ok(Some(bytes)) => match serde_json::from_slice::<BTreeMap<String, MemoMeta>>(&bytes) {
        Ok(entries) => entries,
        Err(e) => {
          warn!(record = %self.index_path, error = %e, "Ignoring malformed memo index");
          BTreeMap::new()
        }
      },
      Ok(None) => BTreeMap::new(),
      Err(e) => {
        warn!(record = %self.index_path, error = %e, "Failed to read memo index");
        BTreeMap::new()
      }
    };

    debug!(memos = entries.len(), "Loaded memo index");
    let mut index = self.lock_index();
    index.entries = entries;
    index.dirty = false;
  }

  /// Get a cached memo by name.
  pub fn memo(&self, name: &str) -> Option<Memo> {
    self.store.get(name)
  }

  pub fn store(&self) -> &CacheStore<Memo> {
    &self.store
  }

  pub fn indexed_len(&self) -> usize {
    self.lock_index().entries.len()
  }

  /// List cached memos matching `query`, newest display time first.
  pub fn list_cached(&self, query: &ListQuery) -> Vec<Memo> {
    let names: Vec<String> = {
      let index = self.lock_index();
      let mut matching: Vec<&MemoMeta> = index
        .entries
        .values()
        .filter(|meta| query.matches(meta))
        .collect();
      matching.sort_by(|a, b| {
        b.display_time
          .cmp(&a.display_time)
          .then_with(|| a.name.cmp(&b.name))
      });
      matching
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .map(|meta| meta.name.clone())
        .collect()
    };

    names.iter().filter_map(|name| self.store.get(name)).collect()
  }

  /// Drop in-memory memos and index. Durable records stay.
  pub fn clear_memory(&self) {
    self.store.clear_memory();
    let mut index = self.lock_index();
    index.entries.clear();
    index.dirty = false;
  }

  fn flush_index(&self) -> FlushReport {
    let (snapshot, generation) = {
      let index = self.lock_index();
      if !index.dirty {
        return FlushReport::default();
      }
      (index.entries.clone(), index.generation)
    };

    let result = serde_json::to_vec(&snapshot)
      .map_err(|e| eyre!("Failed to serialize memo index: {}", e))
      .and_then(|bytes| self.durable.write(&self.index_path, &bytes));

    match result {
      Ok(()) => {
        let mut index = self.lock_index();
        if index.generation == generation {
          index.dirty = false;
        }
        FlushReport {
          written: 1,
          failed: 0,
        }
      }
      Err(e) => {
        warn!(record = %self.index_path, error = %e, "Failed to persist memo index, will retry");
        FlushReport {
          written: 0,
          failed: 1,
        }
      }
    }
  }
}

impl EntityCache<Memo> for MemoCache {
  fn put(&self, key: &str, value: &Memo) {
    self.store.set(key, value.clone());

    let meta = MemoMeta::from(value);
    let mut index = self.lock_index();
    if index.entries.get(key) != Some(&meta) {
      index.entries.insert(key.to_string(), meta);
      index.dirty = true;
      index.generation += 1;
    }
  }

  fn remove(&self, key: &str) {
    self.store.delete(key);

    let mut index = self.lock_index();
    if index.entries.remove(key).is_some() {
      index.dirty = true;
      index.generation += 1;
    }
  }
}

impl Flushable for MemoCache {
  fn name(&self) -> &'static str {
    "memos"
  }

  fn flush(&self) -> FlushReport {
    let mut report = self.store.flush();
    report += self.flush_index();
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::testing::memo;

  fn cache(durable: Arc<MemoryStorage>) -> MemoCache {
    MemoCache::new(
      Namespace::new("https://memos.example.com", "users/1").unwrap(),
      durable,
      CacheLimits::memos(),
    )
  }

  #[test]
  fn test_memo_record_round_trip() {
    let mut m = memo("memos/1", "2024-01-01T00:00:00Z");
    m.tags = vec!["work".into()];
    let decoded = Memo::decode(&m.encode().unwrap()).unwrap();
    assert_eq!(decoded, m);
  }

  #[test]
  fn test_list_cached_filters_and_orders() {
    let memos = cache(Arc::new(MemoryStorage::new()));
    let mut pinned = memo("memos/p", "2024-01-05T00:00:00Z");
    pinned.pinned = true;
    let mut archived = memo("memos/a", "2024-01-04T00:00:00Z");
    archived.state = MemoState::Archived;
    let mut tagged = memo("memos/t", "2024-01-02T00:00:00Z");
    tagged.tags = vec!["work".into()];

    memos.put("memos/1", &memo("memos/1", "2024-01-01T00:00:00Z"));
    memos.put("memos/3", &memo("memos/3", "2024-01-03T00:00:00Z"));
    memos.put("memos/p", &pinned);
    memos.put("memos/a", &archived);
    memos.put("memos/t", &tagged);

    let home: Vec<String> = memos
      .list_cached(&ListQuery::default())
      .into_iter()
      .map(|m| m.name)
      .collect();
    assert_eq!(home, vec!["memos/3", "memos/t", "memos/1"]);

    let page: Vec<String> = memos
      .list_cached(&ListQuery {
        offset: 1,
        limit: 1,
        ..ListQuery::default()
      })
      .into_iter()
      .map(|m| m.name)
      .collect();
    assert_eq!(page, vec!["memos/t"]);

    let work = memos.list_cached(&ListQuery {
      tag: Some("work".into()),
      ..ListQuery::default()
    });
    assert_eq!(work.len(), 1);

    let pins = memos.list_cached(&ListQuery {
      pinned: true,
      ..ListQuery::default()
    });
    assert_eq!(pins.len(), 1);
    assert_eq!(pins[0].name, "memos/p");

    let archive = memos.list_cached(&ListQuery {
      archived: true,
      ..ListQuery::default()
    });
    assert_eq!(archive[0].name, "memos/a");
  }

  #[test]
  fn test_index_survives_reload() {
    let durable = Arc::new(MemoryStorage::new());
    {
      let memos = cache(durable.clone());
      memos.put("memos/1", &memo("memos/1", "2024-01-01T00:00:00Z"));
      memos.put("memos/2", &memo("memos/2", "2024-01-02T00:00:00Z"));
      memos.remove("memos/1");
      let report = Flushable::flush(&memos);
      assert_eq!(report.failed, 0);
    }

    let memos = cache(durable);
    memos.load_index();
    assert_eq!(memos.indexed_len(), 1);
    let listed = memos.list_cached(&ListQuery::default());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "memos/2");
  }

  #[test]
  fn test_clean_index_is_not_rewritten() {
    let durable = Arc::new(MemoryStorage::new());
    let memos = cache(durable.clone());
    memos.put("memos/1", &memo("memos/1", "2024-01-01T00:00:00Z"));
    Flushable::flush(&memos);
    let writes = durable.write_count();

    memos.put("memos/1", &memo("memos/1", "2024-01-01T00:00:00Z"));
    Flushable::flush(&memos);
    assert_eq!(durable.write_count(), writes);
  }
}
