//! Keeping local memo timelines in step with the server.

mod merge;
mod orchestrator;

pub use merge::merge;
pub use orchestrator::{SyncOptions, SyncOrchestrator, DEFAULT_FETCH_TIMEOUT, DEFAULT_PAGE_SIZE};
