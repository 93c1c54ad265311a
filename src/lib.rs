//! Offline-first sync and cache engine for a Memos server.
//!
//! Server pages are merged into locally held timelines by range splicing, and
//! every memo, image and counter is kept in a bounded in-memory cache backed by
//! durable storage that a background task flushes periodically.

pub mod cache;
pub mod config;
pub mod logging;
pub mod memos;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use session::{Identity, Session, Timeline, TimelineKind};
