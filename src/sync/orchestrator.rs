//! Drives page-by-page merges against the remote collection.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::EntityCache;
use crate::memos::source::MemoSource;
use crate::memos::types::{Memo, MemoState, PageRequest};

use super::merge::merge;

/// Default page size requested from the server
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default bound on a single fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// What to sync and when to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
  /// Fetch the pinned set instead of walking pages
  pub pinned: bool,
  pub state: Option<MemoState>,
  pub tag: Option<String>,
  /// Stop once this many items have been fetched
  pub max_items: Option<usize>,
  pub page_size: usize,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      pinned: false,
      state: None,
      tag: None,
      max_items: None,
      page_size: DEFAULT_PAGE_SIZE,
    }
  }
}

/// Walks server pages and merges each into a local timeline.
///
/// The caller owns the timeline and must not run two syncs over the same one
/// at once; `Session` guarantees that with a per-timeline async mutex.
pub struct SyncOrchestrator {
  source: Arc<dyn MemoSource>,
  fetch_timeout: Duration,
}

impl SyncOrchestrator {
  pub fn new(source: Arc<dyn MemoSource>, fetch_timeout: Duration) -> Self {
    Self {
      source,
      fetch_timeout,
    }
  }

  async fn bounded<T>(&self, what: &str, fetch: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(self.fetch_timeout, fetch)
      .await
      .map_err(|_| {
        eyre!(
          "Timed out fetching {} after {}ms",
          what,
          self.fetch_timeout.as_millis()
        )
      })?
  }

  /// Bring `local` in line with the server.
  ///
  /// Returns the cursor to continue from when stopped by `max_items`, or
  /// `None` once the collection is exhausted. A failed fetch aborts the walk;
  /// pages merged before it stay merged.
  pub async fn sync_online<C>(
    &self,
    local: &mut Vec<Memo>,
    cache: &C,
    options: &SyncOptions,
  ) -> Result<Option<String>>
  where
    C: EntityCache<Memo> + ?Sized,
  {
    if options.pinned {
      self.sync_pinned(local, cache).await?;
      return Ok(None);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut processed = 0;
    let mut pages = 0;
    let mut page_token: Option<String> = None;

    loop {
      let request = PageRequest {
        page_size: options.page_size,
        page_token: page_token.clone(),
        state: options.state,
        tag: options.tag.clone(),
      };
      let page = self
        .bounded("memos", self.source.list_memos(&request))
        .await?;

      pages += 1;
      processed += page.memos.len();
      seen.extend(page.memos.iter().map(|m| m.name.clone()));

      let range = merge(local, page.memos, cache);
      debug!(
        page = pages,
        start = range.start,
        end = range.end,
        "Merged page"
      );

      page_token = page.next_page_token;
      let capped = options.max_items.is_some_and(|max| processed >= max);
      if page_token.is_none() || capped {
        break;
      }
    }

    let evicted = evict_unseen(local, cache, &seen);
    info!(
      pages,
      processed,
      evicted,
      tag = options.tag.as_deref(),
      more = page_token.is_some(),
      "Synced memos"
    );

    Ok(page_token)
  }

  async fn sync_pinned<C>(&self, local: &mut Vec<Memo>, cache: &C) -> Result<()>
  where
    C: EntityCache<Memo> + ?Sized,
  {
    let mut pinned = self
      .bounded("pinned memos", self.source.list_pinned())
      .await?;
    pinned.sort_by(|a, b| b.display_time.cmp(&a.display_time));

    let seen: HashSet<String> = pinned.iter().map(|m| m.name.clone()).collect();
    let count = pinned.len();

    // The pinned set arrives whole. Anything else was unpinned, not deleted,
    // so it leaves this sequence but stays cached with the flag cleared.
    let unpinning = Unpinning {
      cache,
      previous: local.iter().map(|m| (m.name.clone(), m.clone())).collect(),
    };
    merge(local, pinned, &unpinning);
    local.retain(|memo| {
      let keep = seen.contains(&memo.name);
      if !keep {
        unpinning.unpin(&memo.name);
      }
      keep
    });

    let unpinned = unpinning
      .previous
      .keys()
      .filter(|name| !seen.contains(*name))
      .count();
    info!(pinned = count, unpinned, "Synced pinned memos");
    Ok(())
  }
}

/// Cache view for a pinned-set merge: memos leaving the set are rewritten
/// with `pinned` cleared instead of being removed.
struct Unpinning<'a, C: ?Sized> {
  cache: &'a C,
  previous: HashMap<String, Memo>,
}

impl<C> Unpinning<'_, C>
where
  C: EntityCache<Memo> + ?Sized,
{
  fn unpin(&self, name: &str) {
    if let Some(memo) = self.previous.get(name).filter(|m| m.pinned) {
      let unpinned = Memo {
        pinned: false,
        ..memo.clone()
      };
      self.cache.put(name, &unpinned);
    }
  }
}

impl<C> EntityCache<Memo> for Unpinning<'_, C>
where
  C: EntityCache<Memo> + ?Sized,
{
  fn put(&self, key: &str, value: &Memo) {
    self.cache.put(key, value);
  }

  fn remove(&self, key: &str) {
    self.unpin(key);
  }
}

/// Drop entries the walk did not reconfirm, from `local` and from `cache`.
fn evict_unseen<C>(local: &mut Vec<Memo>, cache: &C, seen: &HashSet<String>) -> usize
where
  C: EntityCache<Memo> + ?Sized,
{
  let before = local.len();
  local.retain(|memo| {
    let keep = seen.contains(&memo.name);
    if !keep {
      cache.remove(&memo.name);
    }
    keep
  });
  before - local.len()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{memo, names, FakeSource, RecordingCache};

  fn orchestrator(source: &Arc<FakeSource>) -> SyncOrchestrator {
    SyncOrchestrator::new(source.clone(), DEFAULT_FETCH_TIMEOUT)
  }

  #[tokio::test]
  async fn test_walks_all_pages() {
    let source = Arc::new(FakeSource::new());
    source.push_page(vec![memo("A", "05"), memo("B", "04")], Some("p2"));
    source.push_page(vec![memo("C", "03"), memo("D", "02")], None);
    let cache = RecordingCache::default();
    let mut local = Vec::new();

    let next = orchestrator(&source)
      .sync_online(&mut local, &cache, &SyncOptions::default())
      .await
      .unwrap();

    assert_eq!(next, None);
    assert_eq!(names(&local), vec!["A", "B", "C", "D"]);

    let requests = source.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].page_token, None);
    assert_eq!(requests[0].page_size, DEFAULT_PAGE_SIZE);
    assert_eq!(requests[1].page_token.as_deref(), Some("p2"));
  }

  #[tokio::test]
  async fn test_stops_at_max_items() {
    let source = Arc::new(FakeSource::new());
    source.push_page(vec![memo("A", "05"), memo("B", "04")], Some("p2"));
    source.push_page(vec![memo("C", "03"), memo("D", "02")], Some("p3"));
    source.push_page(vec![memo("E", "01")], None);
    let cache = RecordingCache::default();
    let mut local = Vec::new();

    let options = SyncOptions {
      max_items: Some(3),
      page_size: 2,
      ..SyncOptions::default()
    };
    let next = orchestrator(&source)
      .sync_online(&mut local, &cache, &options)
      .await
      .unwrap();

    assert_eq!(next.as_deref(), Some("p3"));
    assert_eq!(names(&local), vec!["A", "B", "C", "D"]);
    assert_eq!(source.requests().len(), 2);
  }

  #[tokio::test]
  async fn test_max_items_evicts_unwalked_tail() {
    let source = Arc::new(FakeSource::new());
    source.push_page(vec![memo("A", "09"), memo("C", "07")], Some("p2"));
    source.push_page(vec![memo("X", "02")], None);
    let cache = RecordingCache::default();
    let mut local = vec![
      memo("A", "09"),
      memo("B", "08"),
      memo("C", "07"),
      memo("X", "02"),
      memo("Y", "01"),
    ];
    cache.seed(&local);

    let options = SyncOptions {
      max_items: Some(2),
      page_size: 2,
      ..SyncOptions::default()
    };
    let next = orchestrator(&source)
      .sync_online(&mut local, &cache, &options)
      .await
      .unwrap();

    assert_eq!(next.as_deref(), Some("p2"));
    assert_eq!(source.requests().len(), 1);
    assert_eq!(names(&local), vec!["A", "C"]);
    let mut removed = cache.removes();
    removed.sort();
    assert_eq!(removed, vec!["B", "X", "Y"]);
    assert!(cache.get("A").is_some());
  }

  #[tokio::test]
  async fn test_unconfirmed_entries_are_evicted() {
    let source = Arc::new(FakeSource::new());
    source.push_page(vec![memo("A", "09"), memo("C", "07")], Some("p2"));
    source.push_page(vec![memo("E", "05")], None);
    let cache = RecordingCache::default();
    let mut local = vec![
      memo("A", "09"),
      memo("B", "08"),
      memo("C", "07"),
      memo("D", "06"),
      memo("E", "05"),
      memo("F", "01"),
    ];
    cache.seed(&local);

    orchestrator(&source)
      .sync_online(&mut local, &cache, &SyncOptions::default())
      .await
      .unwrap();

    assert_eq!(names(&local), vec!["A", "C", "E"]);
    let mut removed = cache.removes();
    removed.sort();
    assert_eq!(removed, vec!["B", "D", "F"]);
    assert!(cache.get("F").is_none());
  }

  #[tokio::test]
  async fn test_fetch_error_keeps_merged_pages() {
    let source = Arc::new(FakeSource::new());
    source.push_page(vec![memo("A", "05")], Some("p2"));
    source.push_error("connection refused");
    let cache = RecordingCache::default();
    let mut local = vec![memo("Z", "01")];

    let result = orchestrator(&source)
      .sync_online(&mut local, &cache, &SyncOptions::default())
      .await;

    assert!(result.is_err());
    assert_eq!(names(&local), vec!["A", "Z"]);
    assert!(cache.removes().is_empty());
    assert!(cache.get("A").is_some());
  }

  #[tokio::test]
  async fn test_passes_tag_and_state() {
    let source = Arc::new(FakeSource::new());
    source.push_page(Vec::new(), None);
    let cache = RecordingCache::default();
    let mut local = Vec::new();

    let options = SyncOptions {
      state: Some(MemoState::Archived),
      tag: Some("work".to_string()),
      ..SyncOptions::default()
    };
    orchestrator(&source)
      .sync_online(&mut local, &cache, &options)
      .await
      .unwrap();

    let requests = source.requests();
    assert_eq!(requests[0].state, Some(MemoState::Archived));
    assert_eq!(requests[0].tag.as_deref(), Some("work"));
  }

  #[tokio::test]
  async fn test_pinned_fetches_once_and_replaces_set() {
    let source = Arc::new(FakeSource::new());
    source.set_pinned(vec![memo("P2", "03"), memo("P1", "05")]);
    let cache = RecordingCache::default();
    let mut old = memo("OLD", "04");
    old.pinned = true;
    let mut local = vec![memo("P1", "05"), old];
    cache.seed(&local);

    let options = SyncOptions {
      pinned: true,
      ..SyncOptions::default()
    };
    let next = orchestrator(&source)
      .sync_online(&mut local, &cache, &options)
      .await
      .unwrap();

    assert_eq!(next, None);
    assert_eq!(source.pinned_calls(), 1);
    assert!(source.requests().is_empty());
    assert_eq!(names(&local), vec!["P1", "P2"]);
    // Unpinned memos stay cached
    assert!(cache.removes().is_empty());
    let old = cache.get("OLD").unwrap();
    assert!(!old.pinned);
    assert_eq!(old.content, "content of OLD");
  }

  #[tokio::test]
  async fn test_slow_fetch_times_out() {
    let source = Arc::new(FakeSource::new());
    source.set_delay(Duration::from_secs(5));
    source.push_page(vec![memo("A", "05")], None);
    let cache = RecordingCache::default();
    let mut local = Vec::new();

    let sync = SyncOrchestrator::new(source.clone(), Duration::from_millis(20));
    let err = sync
      .sync_online(&mut local, &cache, &SyncOptions::default())
      .await
      .unwrap_err();

    assert!(err.to_string().contains("Timed out"));
    assert!(local.is_empty());
  }
}
