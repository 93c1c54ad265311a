//! Record naming: per-identity namespaces and path-safe keys.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest sanitized key kept verbatim. Longer keys are truncated and
/// suffixed with a digest of the original key.
const MAX_KEY_LEN: usize = 200;
const TRUNCATED_PREFIX_LEN: usize = 180;
const DIGEST_LEN: usize = 16;

/// Record kinds stored by the cache. Each kind gets its own directory (or
/// key space) under the identity namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
  Images,
  Memos,
  Counters,
}

impl RecordKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Images => "images",
      Self::Memos => "memos",
      Self::Counters => "counters",
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Cache namespace for one authenticated identity.
///
/// Derived from the server URL and the user name, so two identities never
/// read each other's records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
  pub fn new(server_url: &str, user_name: &str) -> Result<Self> {
    if server_url.trim().is_empty() || user_name.trim().is_empty() {
      return Err(eyre!(
        "Cannot derive cache namespace without a server URL and user name"
      ));
    }

    Ok(Self(format!(
      "{}_{}",
      sanitize_file_name(server_url),
      sanitize_file_name(user_name)
    )))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Durable location of `key` for records of `kind`.
  pub fn record(&self, kind: RecordKind, key: &str) -> RecordPath {
    RecordPath {
      namespace: self.0.clone(),
      kind,
      key: sanitize_key(key),
    }
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Fully qualified durable record location: `{namespace}/{kind}/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPath {
  pub namespace: String,
  pub kind: RecordKind,
  /// Already sanitized
  pub key: String,
}

impl fmt::Display for RecordPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}/{}", self.namespace, self.kind, self.key)
  }
}

/// Make a string safe to use as a single file name component.
///
/// Reserved characters become `_`, `..` is broken up, leading and trailing
/// dots are dropped, whitespace runs become `_` and runs of `_` collapse.
pub fn sanitize_file_name(name: &str) -> String {
  let replaced: String = name
    .chars()
    .map(|ch| match ch {
      '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
      _ => ch,
    })
    .collect();

  let replaced = replaced.replace("..", "_");
  let trimmed = replaced.trim_start_matches('.').trim_end_matches('.');
  let joined = trimmed.split_whitespace().collect::<Vec<_>>().join("_");

  let mut out = String::with_capacity(joined.len());
  for ch in joined.chars() {
    if ch == '_' && out.ends_with('_') {
      continue;
    }
    out.push(ch);
  }

  out.chars().take(255).collect()
}

/// Sanitize a semantic key (memo name, image URL, counter name).
///
/// Long keys such as image URLs with query strings would otherwise collide
/// once truncated, so they keep a prefix plus a SHA-256 digest of the raw key.
pub fn sanitize_key(key: &str) -> String {
  let sanitized = sanitize_file_name(key);
  if sanitized.chars().count() <= MAX_KEY_LEN {
    return sanitized;
  }

  let prefix: String = sanitized.chars().take(TRUNCATED_PREFIX_LEN).collect();
  let digest = hex::encode(Sha256::digest(key.as_bytes()));
  format!("{}-{}", prefix, &digest[..DIGEST_LEN])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sanitize_reserved_characters() {
    assert_eq!(sanitize_file_name("a<b>c"), "a_b_c");
    assert_eq!(sanitize_file_name("memos/abc"), "memos_abc");
    assert_eq!(sanitize_file_name("what?*"), "what_");
  }

  #[test]
  fn test_sanitize_dots_and_whitespace() {
    assert_eq!(sanitize_file_name("up..dir"), "up_dir");
    assert_eq!(sanitize_file_name(".hidden."), "hidden");
    assert_eq!(sanitize_file_name("two  words\there"), "two_words_here");
    assert_eq!(sanitize_file_name("a____b"), "a_b");
  }

  #[test]
  fn test_namespace_from_identity() {
    let ns = Namespace::new("https://memos.example.com", "users/1").unwrap();
    assert_eq!(ns.as_str(), "https_memos.example.com_users_1");
  }

  #[test]
  fn test_namespace_requires_identity() {
    assert!(Namespace::new("", "users/1").is_err());
    assert!(Namespace::new("https://memos.example.com", "  ").is_err());
  }

  #[test]
  fn test_distinct_identities_get_distinct_namespaces() {
    let a = Namespace::new("https://a.example.com", "users/1").unwrap();
    let b = Namespace::new("https://a.example.com", "users/2").unwrap();
    let c = Namespace::new("https://b.example.com", "users/1").unwrap();
    assert_ne!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn test_record_path_display() {
    let ns = Namespace::new("http://localhost:5230", "users/7").unwrap();
    let path = ns.record(RecordKind::Memos, "memos/xyz");
    assert_eq!(path.to_string(), "http_localhost_5230_users_7/memos/memos_xyz");
  }

  #[test]
  fn test_long_keys_do_not_collide() {
    let base = format!("https://memos.example.com/file/{}", "x".repeat(300));
    let a = sanitize_key(&format!("{}?size=small", base));
    let b = sanitize_key(&format!("{}?size=large", base));
    assert_ne!(a, b);
    assert_eq!(a.chars().count(), TRUNCATED_PREFIX_LEN + 1 + DIGEST_LEN);
  }

  #[test]
  fn test_short_keys_are_plain() {
    assert_eq!(sanitize_key("home_stats"), "home_stats");
  }
}
