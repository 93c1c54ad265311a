//! In-process durable store, for tests and `backend: memory`.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::key::RecordPath;
use super::storage::DurableStore;

/// Durable store backed by a map. Can be switched into a failing mode to
/// simulate an unavailable disk.
#[derive(Default)]
pub struct MemoryStorage {
  records: Mutex<HashMap<String, Vec<u8>>>,
  failing: AtomicBool,
  writes: AtomicUsize,
  removes: AtomicUsize,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every subsequent read, write and remove fail until reset.
  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Number of successful writes so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  /// Number of successful removes so far.
  pub fn remove_count(&self) -> usize {
    self.removes.load(Ordering::SeqCst)
  }

  pub fn contains(&self, path: &RecordPath) -> bool {
    self
      .records
      .lock()
      .map(|records| records.contains_key(&path.to_string()))
      .unwrap_or(false)
  }

  pub fn len(&self) -> usize {
    self.records.lock().map(|r| r.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn check(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(eyre!("Storage unavailable"));
    }
    Ok(())
  }
}

impl DurableStore for MemoryStorage {
  fn read(&self, path: &RecordPath) -> Result<Option<Vec<u8>>> {
    self.check()?;
    let records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(records.get(&path.to_string()).cloned())
  }

  fn write(&self, path: &RecordPath, data: &[u8]) -> Result<()> {
    self.check()?;
    let mut records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    records.insert(path.to_string(), data.to_vec());
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn remove(&self, path: &RecordPath) -> Result<()> {
    self.check()?;
    let mut records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    records.remove(&path.to_string());
    self.removes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}
