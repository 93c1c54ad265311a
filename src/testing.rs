//! In-memory fakes shared by unit tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::cache::EntityCache;
use crate::memos::source::MemoSource;
use crate::memos::types::{HomeStats, Memo, MemoPage, PageRequest};

pub fn memo(name: &str, display_time: &str) -> Memo {
  Memo {
    name: name.to_string(),
    display_time: display_time.to_string(),
    create_time: display_time.to_string(),
    content: format!("content of {}", name),
    ..Memo::default()
  }
}

pub fn names(memos: &[Memo]) -> Vec<&str> {
  memos.iter().map(|m| m.name.as_str()).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap()
}

/// Entity cache that records every call.
#[derive(Default)]
pub struct RecordingCache {
  puts: Mutex<Vec<String>>,
  removes: Mutex<Vec<String>>,
  entries: Mutex<BTreeMap<String, Memo>>,
}

impl RecordingCache {
  pub fn puts(&self) -> Vec<String> {
    lock(&self.puts).clone()
  }

  pub fn removes(&self) -> Vec<String> {
    lock(&self.removes).clone()
  }

  pub fn get(&self, key: &str) -> Option<Memo> {
    lock(&self.entries).get(key).cloned()
  }

  pub fn snapshot(&self) -> BTreeMap<String, Memo> {
    lock(&self.entries).clone()
  }

  pub fn seed(&self, memos: &[Memo]) {
    let mut entries = lock(&self.entries);
    for m in memos {
      entries.insert(m.name.clone(), m.clone());
    }
  }
}

impl EntityCache<Memo> for RecordingCache {
  fn put(&self, key: &str, value: &Memo) {
    lock(&self.puts).push(key.to_string());
    lock(&self.entries).insert(key.to_string(), value.clone());
  }

  fn remove(&self, key: &str) {
    lock(&self.removes).push(key.to_string());
    lock(&self.entries).remove(key);
  }
}

/// Scripted remote collection.
#[derive(Default)]
pub struct FakeSource {
  pages: Mutex<VecDeque<Result<MemoPage, String>>>,
  requests: Mutex<Vec<PageRequest>>,
  pinned: Mutex<Option<Vec<Memo>>>,
  pinned_calls: Mutex<usize>,
  stats: Mutex<Option<HomeStats>>,
  images: Mutex<HashMap<String, Vec<u8>>>,
  image_calls: Mutex<usize>,
  delay: Mutex<Option<Duration>>,
}

impl FakeSource {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_page(&self, memos: Vec<Memo>, next_page_token: Option<&str>) {
    lock(&self.pages).push_back(Ok(MemoPage {
      memos,
      next_page_token: next_page_token.map(str::to_string),
    }));
  }

  pub fn push_error(&self, message: &str) {
    lock(&self.pages).push_back(Err(message.to_string()));
  }

  pub fn set_pinned(&self, memos: Vec<Memo>) {
    *lock(&self.pinned) = Some(memos);
  }

  pub fn set_stats(&self, stats: Option<HomeStats>) {
    *lock(&self.stats) = stats;
  }

  pub fn add_image(&self, url: &str, bytes: &[u8]) {
    lock(&self.images).insert(url.to_string(), bytes.to_vec());
  }

  pub fn set_delay(&self, delay: Duration) {
    *lock(&self.delay) = Some(delay);
  }

  pub fn requests(&self) -> Vec<PageRequest> {
    lock(&self.requests).clone()
  }

  pub fn pinned_calls(&self) -> usize {
    *lock(&self.pinned_calls)
  }

  pub fn image_calls(&self) -> usize {
    *lock(&self.image_calls)
  }
}

impl MemoSource for FakeSource {
  fn list_memos<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<MemoPage>> {
    async move {
      lock(&self.requests).push(request.clone());
      let delay = *lock(&self.delay);
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      let next = lock(&self.pages).pop_front();
      match next {
        Some(Ok(page)) => Ok(page),
        Some(Err(message)) => Err(eyre!(message)),
        None => Ok(MemoPage::default()),
      }
    }
    .boxed()
  }

  fn list_pinned(&self) -> BoxFuture<'_, Result<Vec<Memo>>> {
    async move {
      *lock(&self.pinned_calls) += 1;
      let pinned = lock(&self.pinned).clone();
      pinned.ok_or_else(|| eyre!("Failed to get pinned memos: offline"))
    }
    .boxed()
  }

  fn user_stats<'a>(&'a self, _user: &'a str) -> BoxFuture<'a, Result<HomeStats>> {
    async move {
      let stats = lock(&self.stats).clone();
      stats.ok_or_else(|| eyre!("Failed to get user stats: offline"))
    }
    .boxed()
  }

  fn fetch_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
    async move {
      *lock(&self.image_calls) += 1;
      let bytes = lock(&self.images).get(url).cloned();
      bytes.ok_or_else(|| eyre!("Failed to fetch image {}: not found", url))
    }
    .boxed()
  }
}
