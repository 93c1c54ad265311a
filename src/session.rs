//! Per-identity context owning caches, timelines and the flush task.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};
use url::{Origin, Url};

use crate::cache::{
  CacheResult, CacheStore, DurableStore, EntityCache, FlushReport, Flushable, Namespace,
  PersistenceScheduler, WritePolicy,
};
use crate::config::{Config, ServerConfig};
use crate::memos::cache::{ListQuery, MemoCache};
use crate::memos::source::MemoSource;
use crate::memos::types::{HomeStats, ImageBlob, Memo, MemoState};
use crate::sync::{SyncOptions, SyncOrchestrator};

/// Counter record holding the home-screen stats
const HOME_STATS_KEY: &str = "home";

/// Memos preloaded per timeline by `warm_up`
const WARM_UP_COUNT: usize = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Who the session belongs to. Cached data never crosses identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub server_url: String,
  pub user_name: String,
}

impl From<&ServerConfig> for Identity {
  fn from(server: &ServerConfig) -> Self {
    Self {
      server_url: server.url.clone(),
      user_name: server.user.clone(),
    }
  }
}

/// A locally held, server-ordered view of memos.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimelineKind {
  Home,
  Pinned,
  Archived,
  Tag(String),
}

impl TimelineKind {
  fn sync_options(&self, page_size: usize) -> SyncOptions {
    let base = SyncOptions {
      page_size,
      ..SyncOptions::default()
    };
    match self {
      Self::Home => SyncOptions {
        state: Some(MemoState::Normal),
        ..base
      },
      Self::Pinned => SyncOptions {
        pinned: true,
        ..base
      },
      Self::Archived => SyncOptions {
        state: Some(MemoState::Archived),
        ..base
      },
      Self::Tag(tag) => SyncOptions {
        state: Some(MemoState::Normal),
        tag: Some(tag.clone()),
        ..base
      },
    }
  }

  /// Whether `memo` belongs in this timeline.
  fn accepts(&self, memo: &Memo) -> bool {
    match self {
      Self::Home => memo.state == MemoState::Normal,
      Self::Pinned => memo.pinned && memo.state == MemoState::Normal,
      Self::Archived => memo.state == MemoState::Archived,
      Self::Tag(tag) => memo.state == MemoState::Normal && memo.tags.iter().any(|t| t == tag),
    }
  }

  fn cached_query(&self) -> ListQuery {
    let all = ListQuery {
      limit: usize::MAX,
      ..ListQuery::default()
    };
    match self {
      Self::Home => all,
      Self::Pinned => ListQuery {
        pinned: true,
        ..all
      },
      Self::Archived => ListQuery {
        archived: true,
        ..all
      },
      Self::Tag(tag) => ListQuery {
        tag: Some(tag.clone()),
        ..all
      },
    }
  }
}

/// One ordered memo sequence plus its sync cursor.
///
/// The sequence sits behind an async mutex so a second sync of the same
/// timeline waits for the first.
pub struct Timeline {
  memos: tokio::sync::Mutex<Vec<Memo>>,
  members: Mutex<HashSet<String>>,
  next_page_token: Mutex<Option<String>>,
}

impl Timeline {
  fn new(memos: Vec<Memo>) -> Self {
    let members = memos.iter().map(|m| m.name.clone()).collect();
    Self {
      memos: tokio::sync::Mutex::new(memos),
      members: Mutex::new(members),
      next_page_token: Mutex::new(None),
    }
  }

  pub async fn snapshot(&self) -> Vec<Memo> {
    self.memos.lock().await.clone()
  }

  /// Cursor left by the last sync; `None` when it reached the end.
  pub fn next_page_token(&self) -> Option<String> {
    lock(&self.next_page_token).clone()
  }

  fn holds(&self, name: &str) -> bool {
    lock(&self.members).contains(name)
  }

  fn record_members(&self, memos: &[Memo]) {
    *lock(&self.members) = memos.iter().map(|m| m.name.clone()).collect();
  }

  /// Replace any copy of `memo`, inserting it at its sorted position when
  /// `keep` is set and dropping it otherwise.
  async fn upsert(&self, memo: &Memo, keep: bool) {
    let mut memos = self.memos.lock().await;
    memos.retain(|m| m.name != memo.name);
    if keep {
      let at = memos.partition_point(|m| m.display_time > memo.display_time);
      memos.insert(at, memo.clone());
    }
    self.record_members(&memos);
  }

  async fn forget(&self, name: &str) {
    let mut memos = self.memos.lock().await;
    memos.retain(|m| m.name != name);
    self.record_members(&memos);
  }
}

/// Memo cache as seen from one timeline's sync.
///
/// Evictions are skipped for memos another open timeline still shows, so
/// syncing a narrow view (pinned, a tag) never drops what home displays.
struct TimelineCache<'a> {
  memos: &'a MemoCache,
  others: Vec<Arc<Timeline>>,
}

impl EntityCache<Memo> for TimelineCache<'_> {
  fn put(&self, key: &str, value: &Memo) {
    self.memos.put(key, value);
  }

  fn remove(&self, key: &str) {
    if self.others.iter().any(|t| t.holds(key)) {
      trace!(key, "Keeping memo shown by another timeline");
      return;
    }
    self.memos.remove(key);
  }
}

/// Everything cached for one signed-in identity.
pub struct Session {
  identity: Identity,
  origin: Origin,
  source: Arc<dyn MemoSource>,
  sync: SyncOrchestrator,
  page_size: usize,
  memos: Arc<MemoCache>,
  images: Arc<CacheStore<ImageBlob>>,
  counters: Arc<CacheStore<HomeStats>>,
  scheduler: Mutex<Option<PersistenceScheduler>>,
  timelines: Mutex<HashMap<TimelineKind, Arc<Timeline>>>,
}

impl Session {
  /// Build the caches for `identity` and start periodic persistence.
  ///
  /// Must be called from within a tokio runtime.
  pub fn open(
    identity: Identity,
    config: &Config,
    source: Arc<dyn MemoSource>,
    storage: Arc<dyn DurableStore>,
  ) -> Result<Self> {
    let namespace = Namespace::new(&identity.server_url, &identity.user_name)?;
    let origin = Url::parse(&identity.server_url)
      .map_err(|e| eyre!("Invalid server URL {}: {}", identity.server_url, e))?
      .origin();

    let memos = Arc::new(MemoCache::new(
      namespace.clone(),
      Arc::clone(&storage),
      config.cache.memos,
    ));
    memos.load_index();

    let images = Arc::new(CacheStore::new(
      namespace.clone(),
      Arc::clone(&storage),
      config.cache.images,
      WritePolicy::WriteThrough,
    ));
    let counters = Arc::new(CacheStore::new(
      namespace.clone(),
      storage,
      config.cache.counters,
      WritePolicy::WriteThrough,
    ));

    let targets: Vec<Arc<dyn Flushable>> = vec![
      memos.clone() as Arc<dyn Flushable>,
      images.clone() as Arc<dyn Flushable>,
      counters.clone() as Arc<dyn Flushable>,
    ];
    let scheduler = PersistenceScheduler::start(targets, config.cache.flush_interval());

    info!(namespace = %namespace, cached_memos = memos.indexed_len(), "Opened session");

    Ok(Self {
      identity,
      origin,
      sync: SyncOrchestrator::new(Arc::clone(&source), config.server.timeout()),
      source,
      page_size: config.sync.page_size,
      memos,
      images,
      counters,
      scheduler: Mutex::new(Some(scheduler)),
      timelines: Mutex::new(HashMap::new()),
    })
  }

  pub fn identity(&self) -> &Identity {
    &self.identity
  }

  /// Get the timeline for `kind`, seeding a new one from the cache.
  pub fn timeline(&self, kind: &TimelineKind) -> Arc<Timeline> {
    let mut timelines = lock(&self.timelines);
    if let Some(timeline) = timelines.get(kind) {
      return Arc::clone(timeline);
    }

    let seeded = self.memos.list_cached(&kind.cached_query());
    debug!(?kind, memos = seeded.len(), "Seeded timeline from cache");
    let timeline = Arc::new(Timeline::new(seeded));
    timelines.insert(kind.clone(), Arc::clone(&timeline));
    timeline
  }

  /// Sync one timeline with the server.
  ///
  /// Returns the cursor to continue from when `max_items` cut the walk short.
  pub async fn sync(&self, kind: &TimelineKind, max_items: Option<usize>) -> Result<Option<String>> {
    let timeline = self.timeline(kind);
    let others: Vec<Arc<Timeline>> = lock(&self.timelines)
      .iter()
      .filter(|(k, _)| *k != kind)
      .map(|(_, t)| Arc::clone(t))
      .collect();

    let options = SyncOptions {
      max_items,
      ..kind.sync_options(self.page_size)
    };
    let cache = TimelineCache {
      memos: &self.memos,
      others,
    };

    let mut memos = timeline.memos.lock().await;
    let result = self.sync.sync_online(&mut memos, &cache, &options).await;
    timeline.record_members(&memos);

    let next = result?;
    *lock(&timeline.next_page_token) = next.clone();
    Ok(next)
  }

  fn open_timelines(&self) -> Vec<(TimelineKind, Arc<Timeline>)> {
    lock(&self.timelines)
      .iter()
      .map(|(kind, timeline)| (kind.clone(), Arc::clone(timeline)))
      .collect()
  }

  /// Write back a memo changed locally, e.g. after an edit, pin or archive.
  ///
  /// The cache and its index take the new version, and every open timeline
  /// moves, gains or drops it according to its filter.
  pub async fn store_memo(&self, memo: Memo) {
    self.memos.put(&memo.name, &memo);
    for (kind, timeline) in self.open_timelines() {
      timeline.upsert(&memo, kind.accepts(&memo)).await;
    }
    debug!(name = %memo.name, "Stored memo");
  }

  /// Drop a memo deleted locally from the cache and every open timeline.
  pub async fn forget_memo(&self, name: &str) {
    self.memos.remove(name);
    for (_, timeline) in self.open_timelines() {
      timeline.forget(name).await;
    }
    debug!(name, "Forgot memo");
  }

  /// Get a cached memo by name.
  pub fn memo(&self, name: &str) -> Option<Memo> {
    self.memos.memo(name)
  }

  /// List cached memos without touching the network.
  pub fn list_cached(&self, query: &ListQuery) -> Vec<Memo> {
    self.memos.list_cached(query)
  }

  /// Pull the first memos of home and pinned into memory.
  pub fn warm_up(&self) -> usize {
    let home = self.memos.list_cached(&ListQuery {
      limit: WARM_UP_COUNT,
      ..ListQuery::default()
    });
    let pinned = self.memos.list_cached(&ListQuery {
      limit: WARM_UP_COUNT,
      pinned: true,
      ..ListQuery::default()
    });

    let loaded = home.len() + pinned.len();
    debug!(loaded, "Warmed up memo cache");
    loaded
  }

  fn same_origin(&self, url: &str) -> bool {
    Url::parse(url)
      .map(|u| u.origin() == self.origin)
      .unwrap_or(false)
  }

  /// Load an image from the session's server, cache first.
  ///
  /// Images hosted elsewhere are refused; the access token is never sent to
  /// another origin.
  pub async fn image(&self, url: &str) -> Result<CacheResult<ImageBlob>> {
    if !self.same_origin(url) {
      return Err(eyre!("Image is not hosted on {}: {}", self.identity.server_url, url));
    }

    self
      .images
      .fetch_one(url, || async {
        self.source.fetch_image(url).await.map(ImageBlob)
      })
      .await
  }

  /// Home-screen counters, network first with the cached copy as fallback.
  pub async fn home_stats(&self) -> Result<CacheResult<HomeStats>> {
    self
      .counters
      .fetch_fresh(HOME_STATS_KEY, || {
        self.source.user_stats(&self.identity.user_name)
      })
      .await
  }

  /// Flush every dirty record now.
  pub fn flush(&self) -> FlushReport {
    match lock(&self.scheduler).as_ref() {
      Some(scheduler) => scheduler.flush_now(),
      None => FlushReport::default(),
    }
  }

  /// Stop periodic persistence after a final flush.
  pub async fn close(&self) -> FlushReport {
    let scheduler = lock(&self.scheduler).take();
    match scheduler {
      Some(scheduler) => scheduler.shutdown().await,
      None => FlushReport::default(),
    }
  }

  /// Close, then forget everything held in memory for this identity.
  ///
  /// Durable records are kept for the next sign-in.
  pub async fn logout(&self) -> FlushReport {
    let report = self.close().await;

    self.memos.clear_memory();
    self.images.clear_memory();
    self.counters.clear_memory();
    lock(&self.timelines).clear();

    info!(namespace = %self.memos.store().namespace(), "Logged out");
    report
  }
}
