pub mod api_types;
pub mod cache;
pub mod client;
pub mod source;
pub mod types;

pub use cache::{ListQuery, MemoCache};
pub use client::MemosClient;
pub use source::MemoSource;
pub use types::{HomeStats, ImageBlob, Memo, MemoMeta, MemoPage, MemoState, PageRequest};
