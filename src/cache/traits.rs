//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::key::RecordKind;

/// A value that can be held by a [`CacheStore`](super::CacheStore).
///
/// The encoding is what lands in the durable store; the weight is what the
/// value costs against the in-memory byte ceiling.
pub trait CacheValue: Clone + PartialEq + Send + Sync + 'static {
  /// Record kind this value is filed under.
  const KIND: RecordKind;

  fn encode(&self) -> Result<Vec<u8>>;

  fn decode(bytes: &[u8]) -> Result<Self>;

  /// Approximate in-memory size in bytes.
  fn weight(&self) -> usize;

  /// When this value was fetched from the server, for values that record it.
  fn cached_at(&self) -> Option<DateTime<Utc>> {
    None
  }
}

/// Trait for entities that live in an ordered, server-synced sequence.
///
/// Implementors must provide a unique cache key and the string-comparable
/// sort key the server orders by (descending).
pub trait Cacheable: CacheValue {
  /// Unique identifier for this entity (e.g. memo name)
  fn cache_key(&self) -> &str;

  /// Sort key; sequences are kept in non-increasing order of this value.
  fn sort_key(&self) -> &str;
}

/// Keyed sink the merge engine reports writes and evictions to.
pub trait EntityCache<T> {
  fn put(&self, key: &str, value: &T);

  fn remove(&self, key: &str);
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was produced, if known
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from cache without touching the network
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
