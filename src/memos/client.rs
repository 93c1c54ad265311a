use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::ServerConfig;
use crate::memos::api_types::{ApiListMemosResponse, ApiUserStats};
use crate::memos::source::MemoSource;
use crate::memos::types::{HomeStats, Memo, MemoPage, MemoState, PageRequest};

/// Page size the server is asked for when listing pinned memos
const PINNED_PAGE_SIZE: usize = 50;

/// Memos API client
#[derive(Clone)]
pub struct MemosClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl MemosClient {
  pub fn new(server: &ServerConfig, token: String) -> Result<Self> {
    let base = Url::parse(&server.url)
      .map_err(|e| eyre!("Invalid server URL {}: {}", server.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(server.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, token })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    let url = format!(
      "{}/api/v1/{}",
      self.base.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&url).map_err(|e| eyre!("Invalid endpoint {}: {}", url, e))
  }

  /// List memos with an optional filter expression
  async fn list(
    &self,
    page_size: usize,
    page_token: Option<&str>,
    state: MemoState,
    filter: Option<String>,
  ) -> Result<MemoPage> {
    let endpoint = self.endpoint("memos")?;

    let mut query = vec![
      ("pageSize", page_size.to_string()),
      ("pageToken", page_token.unwrap_or_default().to_string()),
      ("state", state.as_str().to_string()),
    ];
    if let Some(filter) = filter {
      query.push(("filter", filter));
    }

    debug!(?query, "Listing memos");

    let response: ApiListMemosResponse = self
      .http
      .get(endpoint)
      .query(&query)
      .bearer_auth(&self.token)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to list memos: {}", describe(&e)))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse memo list: {}", describe(&e)))?;

    Ok(response.into())
  }

  /// List one page of memos, filtered by tag and state
  pub async fn get_memos(&self, request: &PageRequest) -> Result<MemoPage> {
    let filter = request.tag.as_deref().map(tag_filter);
    self
      .list(
        request.page_size,
        request.page_token.as_deref(),
        request.state.unwrap_or_default(),
        filter,
      )
      .await
  }

  /// Get the pinned memos
  pub async fn get_pinned(&self) -> Result<Vec<Memo>> {
    let page = self
      .list(
        PINNED_PAGE_SIZE,
        None,
        MemoState::Normal,
        Some("pinned".to_string()),
      )
      .await
      .map_err(|e| eyre!("Failed to get pinned memos: {}", e))?;

    Ok(page.memos)
  }

  /// Get aggregate stats for a user (e.g. "users/1")
  pub async fn get_user_stats(&self, user: &str) -> Result<HomeStats> {
    let endpoint = self.endpoint(&format!("{}/stats", user))?;

    let stats: ApiUserStats = self
      .http
      .get(endpoint)
      .bearer_auth(&self.token)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to get user stats: {}", describe(&e)))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse user stats: {}", describe(&e)))?;

    Ok(stats.into())
  }

  /// Download an image, sending the access token
  pub async fn get_image(&self, url: &str) -> Result<Vec<u8>> {
    let bytes = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("Failed to fetch image {}: {}", url, describe(&e)))?
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read image {}: {}", url, describe(&e)))?;

    Ok(bytes.to_vec())
  }
}

impl MemoSource for MemosClient {
  fn list_memos<'a>(&'a self, request: &'a PageRequest) -> BoxFuture<'a, Result<MemoPage>> {
    self.get_memos(request).boxed()
  }

  fn list_pinned(&self) -> BoxFuture<'_, Result<Vec<Memo>>> {
    self.get_pinned().boxed()
  }

  fn user_stats<'a>(&'a self, user: &'a str) -> BoxFuture<'a, Result<HomeStats>> {
    self.get_user_stats(user).boxed()
  }

  fn fetch_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
    self.get_image(url).boxed()
  }
}

/// Filter expression selecting memos carrying `tag`
fn tag_filter(tag: &str) -> String {
  format!("tag in [\"{}\"]", tag.replace('\\', "\\\\").replace('"', "\\\""))
}

fn describe(e: &reqwest::Error) -> String {
  if e.is_timeout() {
    "Connection timeout".to_string()
  } else {
    e.to_string()
  }
}
