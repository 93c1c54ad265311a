//! Range-splicing merge of a server page into a locally ordered sequence.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, trace};

use crate::cache::{Cacheable, EntityCache};

/// Merge one page of server results into `local`.
///
/// `local` and `incoming` are both ordered by descending sort key, and
/// `incoming` is taken to be the complete server truth for the key interval it
/// spans. Local entries inside that interval are replaced by the page; entries
/// that are no longer present are evicted from `cache`. Every incoming entry is
/// written to `cache`.
///
/// Returns the post-merge index range occupied by the page.
pub fn merge<T, C>(local: &mut Vec<T>, incoming: Vec<T>, cache: &C) -> Range<usize>
where
  T: Cacheable,
  C: EntityCache<T> + ?Sized,
{
  let (newest, oldest) = match (incoming.first(), incoming.last()) {
    (Some(first), Some(last)) => (first.sort_key().to_string(), last.sort_key().to_string()),
    _ => return 0..0,
  };

  let incoming = dedupe_keep_last(incoming);
  let keys: HashSet<String> = incoming
    .iter()
    .map(|item| item.cache_key().to_string())
    .collect();

  let start = local.partition_point(|item| item.sort_key() > newest.as_str());

  // Page identities already sitting inside the replaced range
  let mut in_range = 0;
  let range = if start == local.len() {
    for item in &incoming {
      cache.put(item.cache_key(), item);
    }
    let old_len = local.len();
    local.extend(incoming);
    old_len..local.len()
  } else {
    let end = local
      .partition_point(|item| item.sort_key() >= oldest.as_str())
      .max(start);

    for item in &local[start..end] {
      if keys.contains(item.cache_key()) {
        in_range += 1;
      } else {
        trace!(key = item.cache_key(), "Evicting entry missing from page");
        cache.remove(item.cache_key());
      }
    }
    for item in &incoming {
      cache.put(item.cache_key(), item);
    }

    let len = incoming.len();
    local.splice(start..end, incoming);
    start..start + len
  };

  // Identities are unique in `local`, so none can be left outside the range
  if in_range == keys.len() {
    return range;
  }
  drop_moved_entries(local, range, &keys)
}

/// Collapse repeated identities in a page, keeping the last occurrence.
fn dedupe_keep_last<T: Cacheable>(items: Vec<T>) -> Vec<T> {
  let mut last: HashMap<&str, usize> = HashMap::with_capacity(items.len());
  for (index, item) in items.iter().enumerate() {
    last.insert(item.cache_key(), index);
  }
  if last.len() == items.len() {
    return items;
  }

  debug!(
    duplicates = items.len() - last.len(),
    "Page repeats identities, keeping last occurrence"
  );
  let keep: HashSet<usize> = last.into_values().collect();
  items
    .into_iter()
    .enumerate()
    .filter(|(index, _)| keep.contains(index))
    .map(|(_, item)| item)
    .collect()
}

/// Remove older copies of page identities that sit outside `range`.
///
/// An entry whose sort key changed on the server shows up in the page at its
/// new position while the old copy is still elsewhere in `local`. The cache
/// already holds the new version, so only the sequence is touched.
fn drop_moved_entries<T: Cacheable>(
  local: &mut Vec<T>,
  range: Range<usize>,
  keys: &HashSet<String>,
) -> Range<usize> {
  let mut index = 0;
  let mut removed_before = 0;
  local.retain(|item| {
    let position = index;
    index += 1;
    let moved = !range.contains(&position) && keys.contains(item.cache_key());
    if moved && position < range.start {
      removed_before += 1;
    }
    !moved
  });

  range.start - removed_before..range.end - removed_before
}
