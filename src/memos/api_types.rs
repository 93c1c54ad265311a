//! Serde-deserializable types matching Memos API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! (every field is optional on the wire) while keeping domain types focused on
//! application needs.

use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::types::{
  HomeStats, Memo, MemoPage, MemoRelation, MemoState, Reaction, Resource, Visibility,
};

// ============================================================================
// Memo
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiMemo {
  pub name: Option<String>,
  pub state: Option<String>,
  pub creator: Option<String>,
  pub create_time: Option<String>,
  pub update_time: Option<String>,
  pub display_time: Option<String>,
  pub content: Option<String>,
  pub visibility: Option<String>,
  pub tags: Vec<String>,
  pub pinned: Option<bool>,
  pub resources: Vec<Resource>,
  pub relations: Vec<MemoRelation>,
  pub reactions: Vec<Reaction>,
}

impl ApiMemo {
  /// Convert to a domain memo. Memos without a name can't be cached or
  /// merged and are dropped.
  pub fn into_memo(self) -> Option<Memo> {
    let name = self.name.filter(|n| !n.is_empty())?;
    let create_time = self.create_time.unwrap_or_default();
    // Older servers omit displayTime; creation time is what they sort by
    let display_time = self
      .display_time
      .filter(|t| !t.is_empty())
      .unwrap_or_else(|| create_time.clone());

    Some(Memo {
      name,
      creator: self.creator.unwrap_or_default(),
      create_time,
      update_time: self.update_time.unwrap_or_default(),
      display_time,
      content: self.content.unwrap_or_default(),
      visibility: self
        .visibility
        .as_deref()
        .map(Visibility::parse)
        .unwrap_or_default(),
      state: self
        .state
        .as_deref()
        .map(MemoState::parse)
        .unwrap_or_default(),
      pinned: self.pinned.unwrap_or(false),
      tags: self.tags,
      resources: self.resources,
      relations: self.relations,
      reactions: self.reactions,
    })
  }
}

// ============================================================================
// ListMemos endpoint response
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiListMemosResponse {
  pub memos: Vec<ApiMemo>,
  pub next_page_token: Option<String>,
}

impl From<ApiListMemosResponse> for MemoPage {
  fn from(response: ApiListMemosResponse) -> Self {
    Self {
      memos: response
        .memos
        .into_iter()
        .filter_map(ApiMemo::into_memo)
        .collect(),
      next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
    }
  }
}

// ============================================================================
// User stats endpoint response
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiUserStats {
  pub name: Option<String>,
  pub memo_display_timestamps: Vec<String>,
  pub tag_count: BTreeMap<String, u64>,
  pub pinned_memos: Vec<String>,
  pub total_memo_count: Option<u64>,
}

impl From<ApiUserStats> for HomeStats {
  fn from(stats: ApiUserStats) -> Self {
    let memos_count = stats
      .total_memo_count
      .map(|n| n as usize)
      .unwrap_or(stats.memo_display_timestamps.len());
    let tags: Vec<String> = stats.tag_count.into_keys().collect();

    Self {
      tags_count: tags.len(),
      tags,
      memos_count,
      pinned_memos_count: stats.pinned_memos.len(),
      refreshed_at: Utc::now(),
    }
  }
}
