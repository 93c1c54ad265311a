//! Plain-file durable storage: `{root}/{namespace}/{kind}/{key}`.

use color_eyre::{eyre::eyre, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::key::RecordPath;
use super::storage::DurableStore;

pub struct FileStorage {
  root: PathBuf,
}

impl FileStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn file_path(&self, path: &RecordPath) -> PathBuf {
    self
      .root
      .join(&path.namespace)
      .join(path.kind.as_str())
      .join(&path.key)
  }
}

impl DurableStore for FileStorage {
  fn read(&self, path: &RecordPath) -> Result<Option<Vec<u8>>> {
    let file = self.file_path(path);
    match std::fs::read(&file) {
      Ok(data) => Ok(Some(data)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(eyre!("Failed to read cache file {}: {}", file.display(), e)),
    }
  }

  fn write(&self, path: &RecordPath, data: &[u8]) -> Result<()> {
    let file = self.file_path(path);
    if let Some(parent) = file.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory {}: {}", parent.display(), e))?;
    }

    // Write beside the target and rename so readers never see a torn record
    let mut tmp_name = file.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = file.with_file_name(tmp_name);
    std::fs::write(&tmp, data)
      .map_err(|e| eyre!("Failed to write cache file {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &file)
      .map_err(|e| eyre!("Failed to replace cache file {}: {}", file.display(), e))?;

    Ok(())
  }

  fn remove(&self, path: &RecordPath) -> Result<()> {
    let file = self.file_path(path);
    match std::fs::remove_file(&file) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to delete cache file {}: {}", file.display(), e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::key::{Namespace, RecordKind};

  #[test]
  fn test_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    let ns = Namespace::new("https://memos.example.com", "users/1").unwrap();
    let path = ns.record(RecordKind::Images, "https://memos.example.com/file/a.png");

    storage.write(&path, b"png").unwrap();

    let expected = dir
      .path()
      .join("https_memos.example.com_users_1")
      .join("images")
      .join("https_memos.example.com_file_a.png");
    assert_eq!(std::fs::read(expected).unwrap(), b"png");
    assert_eq!(storage.read(&path).unwrap(), Some(b"png".to_vec()));
  }

  #[test]
  fn test_missing_file_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path());
    let ns = Namespace::new("https://memos.example.com", "users/1").unwrap();
    let path = ns.record(RecordKind::Memos, "memos/none");

    assert_eq!(storage.read(&path).unwrap(), None);
    storage.remove(&path).unwrap();
  }
}
