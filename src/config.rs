use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{
  CacheLimits, DurableStore, FileStorage, MemoryStorage, NoopStorage, SqliteStorage,
};
use crate::sync::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// Directory for log files (defaults to the cache directory)
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the Memos server, e.g. "https://memos.example.com"
  pub url: String,
  /// User resource name, e.g. "users/1"
  pub user: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_timeout_secs() -> u64 {
  10
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// Single SQLite database under the cache directory
  #[default]
  Sqlite,
  /// One file per record under the cache directory
  Files,
  /// Process-local only, lost on exit
  Memory,
  /// Nothing is persisted
  None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub backend: StorageBackend,
  /// Cache directory (defaults to the platform cache dir)
  pub dir: Option<PathBuf>,
  /// How often dirty records are flushed to durable storage
  #[serde(default = "default_flush_interval_ms")]
  pub flush_interval_ms: u64,
  #[serde(default = "CacheLimits::images")]
  pub images: CacheLimits,
  #[serde(default = "CacheLimits::memos")]
  pub memos: CacheLimits,
  #[serde(default = "CacheLimits::counters")]
  pub counters: CacheLimits,
}

fn default_flush_interval_ms() -> u64 {
  1000
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      backend: StorageBackend::default(),
      dir: None,
      flush_interval_ms: default_flush_interval_ms(),
      images: CacheLimits::images(),
      memos: CacheLimits::memos(),
      counters: CacheLimits::counters(),
    }
  }
}

impl CacheConfig {
  pub fn flush_interval(&self) -> Duration {
    Duration::from_millis(self.flush_interval_ms.max(1))
  }

  pub fn dir(&self) -> Result<PathBuf> {
    match &self.dir {
      Some(dir) => Ok(dir.clone()),
      None => SqliteStorage::default_dir(),
    }
  }

  /// Open the configured durable store.
  pub fn open_storage(&self) -> Result<Arc<dyn DurableStore>> {
    let storage: Arc<dyn DurableStore> = match self.backend {
      StorageBackend::Sqlite => Arc::new(SqliteStorage::open(&self.dir()?)?),
      StorageBackend::Files => Arc::new(FileStorage::new(self.dir()?)),
      StorageBackend::Memory => Arc::new(MemoryStorage::new()),
      StorageBackend::None => Arc::new(NoopStorage),
    };
    Ok(storage)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_page_size")]
  pub page_size: usize,
}

fn default_page_size() -> usize {
  DEFAULT_PAGE_SIZE
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      page_size: default_page_size(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./memos-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/memos-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/memos-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("memos-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("memos-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    if config.server.url.trim().is_empty() {
      return Err(eyre!("server.url must not be empty"));
    }
    if config.server.user.trim().is_empty() {
      return Err(eyre!("server.user must not be empty"));
    }
    if config.sync.page_size == 0 {
      return Err(eyre!("sync.page_size must be at least 1"));
    }

    Ok(config)
  }

  /// Directory for log files
  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log_dir {
      Some(dir) => Ok(dir.clone()),
      None => self.cache.dir(),
    }
  }

  /// Get the Memos access token from environment variables.
  ///
  /// Checks MEMOS_SYNC_TOKEN first, then MEMOS_ACCESS_TOKEN as fallback.
  pub fn get_access_token() -> Result<String> {
    std::env::var("MEMOS_SYNC_TOKEN")
      .or_else(|_| std::env::var("MEMOS_ACCESS_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Memos access token not found. Set MEMOS_SYNC_TOKEN or MEMOS_ACCESS_TOKEN environment variable."
        )
      })
  }
}
