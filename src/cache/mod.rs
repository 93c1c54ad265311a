//! Multi-tier caching for memos, images and counters.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Keeps a count- and size-bounded LRU layer in memory
//! - Backs it with a durable store (SQLite, plain files, or nothing)
//! - Scopes every record under a per-identity namespace
//! - Defers durable writes to a periodic flush

mod bounded;
mod file;
mod key;
mod layer;
mod memory;
mod scheduler;
mod storage;
mod store;
mod traits;

pub use bounded::{BoundedLru, CacheLimits};
pub use file::FileStorage;
pub use key::{sanitize_file_name, sanitize_key, Namespace, RecordKind, RecordPath};
pub use memory::MemoryStorage;
pub use scheduler::{FlushReport, Flushable, PersistenceScheduler};
pub use storage::{DurableStore, NoopStorage, SqliteStorage};
pub use store::{CacheStore, WritePolicy};
pub use traits::{CacheResult, CacheSource, CacheValue, Cacheable, EntityCache};
