//! The remote collection as seen by the sync engine.

use color_eyre::Result;
use futures::future::BoxFuture;

use super::types::{HomeStats, Memo, MemoPage, PageRequest};

/// Remote memo collection.
///
/// Object-safe so a session can hold any implementation behind an `Arc`; the
/// HTTP client is one, test fakes are another.
pub trait MemoSource: Send + Sync {
  /// Fetch one page of memos, newest display time first.
  fn list_memos<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<MemoPage>>;

  /// Fetch the complete pinned set (not paginated).
  fn list_pinned(&self) -> BoxFuture<'_, Result<Vec<Memo>>>;

  /// Fetch the home-screen counters for `user`.
  fn user_stats<'a>(&'a self, user: &'a str) -> BoxFuture<'a, Result<HomeStats>>;

  /// Fetch raw image bytes from an authenticated URL.
  fn fetch_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}
