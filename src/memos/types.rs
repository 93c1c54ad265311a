use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Memo visibility
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
  VisibilityUnspecified,
  #[default]
  Private,
  Protected,
  Public,
}

impl Visibility {
  pub fn parse(value: &str) -> Self {
    match value {
      "PRIVATE" => Self::Private,
      "PROTECTED" => Self::Protected,
      "PUBLIC" => Self::Public,
      _ => Self::VisibilityUnspecified,
    }
  }
}

/// Row state of a memo on the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoState {
  StateUnspecified,
  #[default]
  Normal,
  Archived,
}

impl MemoState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::StateUnspecified => "STATE_UNSPECIFIED",
      Self::Normal => "NORMAL",
      Self::Archived => "ARCHIVED",
    }
  }

  pub fn parse(value: &str) -> Self {
    match value {
      "NORMAL" => Self::Normal,
      "ARCHIVED" => Self::Archived,
      _ => Self::StateUnspecified,
    }
  }
}

/// Attachment on a memo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resource {
  pub name: String,
  pub create_time: String,
  pub filename: String,
  pub external_link: String,
  #[serde(rename = "type")]
  pub content_type: String,
  pub size: String,
  pub memo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelatedMemo {
  pub name: String,
  pub uid: String,
  pub snippet: String,
}

/// Reference or comment link between two memos
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoRelation {
  pub memo: RelatedMemo,
  pub related_memo: RelatedMemo,
  #[serde(rename = "type")]
  pub relation_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reaction {
  pub id: i64,
  pub creator: String,
  pub content_id: String,
  pub reaction_type: String,
}

/// A memo as held locally and in the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memo {
  /// Server-assigned identity, e.g. "memos/abc123"
  pub name: String,
  #[serde(default)]
  pub creator: String,
  #[serde(default)]
  pub create_time: String,
  #[serde(default)]
  pub update_time: String,
  /// Sort key, compared as a string
  pub display_time: String,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub visibility: Visibility,
  #[serde(default)]
  pub state: MemoState,
  #[serde(default)]
  pub pinned: bool,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub resources: Vec<Resource>,
  #[serde(default)]
  pub relations: Vec<MemoRelation>,
  #[serde(default)]
  pub reactions: Vec<Reaction>,
}

/// Compact per-memo record used to answer list queries from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoMeta {
  pub name: String,
  pub create_time: String,
  pub update_time: String,
  pub display_time: String,
  pub visibility: Visibility,
  pub pinned: bool,
  pub tags: Vec<String>,
  pub state: MemoState,
}

impl From<&Memo> for MemoMeta {
  fn from(memo: &Memo) -> Self {
    Self {
      name: memo.name.clone(),
      create_time: memo.create_time.clone(),
      update_time: memo.update_time.clone(),
      display_time: memo.display_time.clone(),
      visibility: memo.visibility,
      pinned: memo.pinned,
      tags: memo.tags.clone(),
      state: memo.state,
    }
  }
}

/// One page of the memo listing
#[derive(Debug, Clone, Default)]
pub struct MemoPage {
  pub memos: Vec<Memo>,
  /// Cursor for the next page; `None` on the last page
  pub next_page_token: Option<String>,
}

/// Parameters for one page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub page_size: usize,
  pub page_token: Option<String>,
  pub state: Option<MemoState>,
  pub tag: Option<String>,
}

/// Aggregate counters shown on the home screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeStats {
  pub tags: Vec<String>,
  pub memos_count: usize,
  pub tags_count: usize,
  pub pinned_memos_count: usize,
  pub refreshed_at: DateTime<Utc>,
}

/// Raw image bytes fetched from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob(pub Vec<u8>);
