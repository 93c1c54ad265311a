//! Fetch strategies that combine a cache store with network fetching.

use color_eyre::Result;
use std::future::Future;
use tracing::{debug, warn};

use super::store::CacheStore;
use super::traits::{CacheResult, CacheValue};

impl<V: CacheValue> CacheStore<V> {
  /// Fetch a single value with a cache-first strategy.
  ///
  /// 1. Check cache - if present, return immediately
  /// 2. If missing, fetch from network
  /// 3. Store the fetched value
  pub async fn fetch_one<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<V>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
  {
    if let Some(cached) = self.get(key) {
      let cached_at = cached.cached_at();
      return Ok(CacheResult::from_cache(cached, cached_at));
    }

    let data = fetcher().await?;
    self.set(key, data.clone());
    Ok(CacheResult::from_network(data))
  }

  /// Fetch a single value with a network-first strategy.
  ///
  /// On network failure the cached value is served (offline mode); with
  /// nothing cached the network error is returned.
  pub async fn fetch_fresh<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<V>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
  {
    match fetcher().await {
      Ok(data) => {
        self.set(key, data.clone());
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match self.get(key) {
        Some(cached) => {
          warn!(kind = %V::KIND, key, error = %e, "Network unavailable, serving cached data");
          let cached_at = cached.cached_at();
          Ok(CacheResult::offline(cached, cached_at))
        }
        None => {
          debug!(kind = %V::KIND, key, "Network unavailable and nothing cached");
          Err(e)
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::bounded::CacheLimits;
  use crate::cache::key::Namespace;
  use crate::cache::memory::MemoryStorage;
  use crate::cache::store::WritePolicy;
  use crate::cache::traits::CacheSource;
  use crate::memos::types::{HomeStats, ImageBlob};
  use color_eyre::eyre::eyre;
  use std::sync::Arc;

  fn store<V: CacheValue>(limits: CacheLimits) -> CacheStore<V> {
    CacheStore::new(
      Namespace::new("https://memos.example.com", "users/1").unwrap(),
      Arc::new(MemoryStorage::new()),
      limits,
      WritePolicy::WriteThrough,
    )
  }

  #[tokio::test]
  async fn test_fetch_one_hits_cache_second_time() {
    let images = store::<ImageBlob>(CacheLimits::images());

    let first = images
      .fetch_one("https://memos.example.com/file/a.png", || async {
        Ok(ImageBlob(vec![1, 2, 3]))
      })
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let second = images
      .fetch_one("https://memos.example.com/file/a.png", || async {
        Err(eyre!("network must not be touched"))
      })
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data, ImageBlob(vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_fetch_fresh_falls_back_offline() {
    let counters = store::<HomeStats>(CacheLimits::counters());
    let stats = HomeStats {
      memos_count: 4,
      ..HomeStats::default()
    };

    counters
      .fetch_fresh("home", || async { Ok(stats.clone()) })
      .await
      .unwrap();

    let offline = counters
      .fetch_fresh("home", || async { Err(eyre!("Connection timeout")) })
      .await
      .unwrap();
    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data.memos_count, 4);
    assert_eq!(offline.cached_at, Some(stats.refreshed_at));
  }

  #[tokio::test]
  async fn test_fetch_fresh_without_cache_propagates_error() {
    let counters = store::<HomeStats>(CacheLimits::counters());
    let result = counters
      .fetch_fresh("home", || async { Err(eyre!("Connection timeout")) })
      .await;
    assert!(result.is_err());
  }
}
