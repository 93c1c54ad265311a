//! Periodic flush of dirty cache state to durable storage.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  pub written: usize,
  pub failed: usize,
}

impl AddAssign for FlushReport {
  fn add_assign(&mut self, other: Self) {
    self.written += other.written;
    self.failed += other.failed;
  }
}

/// Something holding dirty state that can be pushed to durable storage.
///
/// Flushing must be safe to repeat: failures leave the state dirty so the
/// next pass retries it.
pub trait Flushable: Send + Sync {
  fn name(&self) -> &'static str;

  fn flush(&self) -> FlushReport;
}

fn flush_all(targets: &[Arc<dyn Flushable>]) -> FlushReport {
  let mut total = FlushReport::default();
  for target in targets {
    let report = target.flush();
    if report.written > 0 || report.failed > 0 {
      debug!(
        target = target.name(),
        written = report.written,
        failed = report.failed,
        "Flushed cache"
      );
    }
    total += report;
  }
  total
}

/// Background task flushing registered caches on a fixed interval.
///
/// Many mutations to one record inside an interval cost one durable write.
pub struct PersistenceScheduler {
  targets: Arc<Vec<Arc<dyn Flushable>>>,
  shutdown: Option<oneshot::Sender<()>>,
  handle: Option<JoinHandle<()>>,
}

impl PersistenceScheduler {
  /// Spawn the flush task. Must be called from within a tokio runtime.
  pub fn start(targets: Vec<Arc<dyn Flushable>>, interval: Duration) -> Self {
    let targets = Arc::new(targets);
    let (shutdown, mut stop) = oneshot::channel();

    let task_targets = Arc::clone(&targets);
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
        tokio::select! {
          _ = ticker.tick() => {
            let targets = Arc::clone(&task_targets);
            let result = tokio::task::spawn_blocking(move || flush_all(&targets)).await;
            if let Err(e) = result {
              warn!(error = %e, "Cache flush task failed");
            }
          }
          _ = &mut stop => break,
        }
      }
    });

    debug!(interval_ms = interval.as_millis() as u64, "Started cache persistence");

    Self {
      targets,
      shutdown: Some(shutdown),
      handle: Some(handle),
    }
  }

  /// Flush every target now, on the calling thread.
  pub fn flush_now(&self) -> FlushReport {
    flush_all(&self.targets)
  }

  /// Stop the periodic task and run one final flush.
  pub async fn shutdown(mut self) -> FlushReport {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
    if let Some(handle) = self.handle.take() {
      if let Err(e) = handle.await {
        warn!(error = %e, "Cache persistence task ended abnormally");
      }
    }

    let report = flush_all(&self.targets);
    debug!(
      written = report.written,
      failed = report.failed,
      "Stopped cache persistence"
    );
    report
  }
}

impl Drop for PersistenceScheduler {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::bounded::CacheLimits;
  use crate::cache::key::{Namespace, RecordKind};
  use crate::cache::memory::MemoryStorage;
  use crate::cache::store::{CacheStore, WritePolicy};
  use crate::memos::types::HomeStats;

  fn counters(durable: Arc<MemoryStorage>) -> Arc<CacheStore<HomeStats>> {
    let ns = Namespace::new("https://memos.example.com", "users/1").unwrap();
    Arc::new(CacheStore::new(
      ns,
      durable,
      CacheLimits::counters(),
      WritePolicy::Deferred,
    ))
  }

  fn stats(memos: usize) -> HomeStats {
    HomeStats {
      memos_count: memos,
      ..HomeStats::default()
    }
  }

  #[tokio::test]
  async fn test_tick_flushes_dirty_entries_once() {
    let durable = Arc::new(MemoryStorage::new());
    let cache = counters(durable.clone());
    let targets = vec![cache.clone() as Arc<dyn Flushable>];
    let scheduler = PersistenceScheduler::start(targets, Duration::from_millis(20));

    // Several mutations inside one interval
    cache.set("home", stats(1));
    cache.set("home", stats(2));
    cache.set("home", stats(3));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(durable.write_count(), 1);

    scheduler.shutdown().await;
  }

  #[tokio::test]
  async fn test_failed_flush_is_retried_on_next_tick() {
    let durable = Arc::new(MemoryStorage::new());
    durable.set_failing(true);
    let cache = counters(durable.clone());
    let targets = vec![cache.clone() as Arc<dyn Flushable>];
    let scheduler = PersistenceScheduler::start(targets, Duration::from_millis(20));

    cache.set("home", stats(5));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(cache.is_dirty("home"));

    durable.set_failing(false);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!cache.is_dirty("home"));
    assert!(durable.contains(
      &Namespace::new("https://memos.example.com", "users/1")
        .unwrap()
        .record(RecordKind::Counters, "home")
    ));

    scheduler.shutdown().await;
  }

  #[tokio::test]
  async fn test_shutdown_runs_final_flush() {
    let durable = Arc::new(MemoryStorage::new());
    let cache = counters(durable.clone());
    let targets = vec![cache.clone() as Arc<dyn Flushable>];
    let scheduler = PersistenceScheduler::start(targets, Duration::from_secs(3600));

    cache.set("home", stats(9));
    let report = scheduler.shutdown().await;

    assert_eq!(report.written, 1);
    assert_eq!(cache.dirty_count(), 0);
  }
}
