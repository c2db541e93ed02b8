//! Deduplication of filtered local sources.
//!
//! Filtering a local source to a set of include patterns is keyed by
//! [`shared_key_hint`]: the source name, the normalized patterns and a
//! best-effort identity of each pattern path. The first request for a key
//! builds the node; later requests in the same process get that node back.
//!
//! # Staleness
//!
//! Entries are never evicted. A key is computed once per request from the
//! filesystem as it is at that moment, and a cached node is reused for as
//! long as the key matches, even if file contents changed in between. Use
//! [`Graph::clear_include_cache`](crate::facade::Graph::clear_include_cache)
//! when that is not acceptable.

mod pattern;

pub use pattern::{normalize_includes, shared_key_hint, shared_key_hint_with};

use std::collections::HashMap;

use tracing::debug;

use crate::facade::GraphBackend;
use crate::llb::{self, LocalOption};

/// The name and options a local source was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalSource {
  name: String,
  options: Vec<LocalOption>,
  /// Set on sources produced by [`IncludeCache::filter`].
  filtered: bool,
}

impl LocalSource {
  pub fn new(name: impl Into<String>, options: Vec<LocalOption>) -> Self {
    Self {
      name: name.into(),
      options,
      filtered: false,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn options(&self) -> &[LocalOption] {
    &self.options
  }

  /// Whether this source already had an include filter applied.
  ///
  /// Filtered sources are not narrowed again.
  pub fn is_filtered(&self) -> bool {
    self.filtered
  }

  /// Effective include patterns: the last ones set, if any.
  pub fn include_patterns(&self) -> Option<&[String]> {
    self.options.iter().rev().find_map(|opt| match opt {
      LocalOption::IncludePatterns(patterns) => Some(patterns.as_slice()),
      _ => None,
    })
  }

  /// Effective shared key hint, if any.
  pub fn shared_key_hint(&self) -> Option<&str> {
    self.options.iter().rev().find_map(|opt| match opt {
      LocalOption::SharedKeyHint(key) => Some(key.as_str()),
      _ => None,
    })
  }

  /// This source's options followed by an include filter and its key.
  fn filtered(&self, includes: Vec<String>, key: &str) -> LocalSource {
    let mut options = self.options.clone();
    options.push(LocalOption::IncludePatterns(includes));
    options.push(LocalOption::SharedKeyHint(key.to_string()));
    LocalSource {
      name: self.name.clone(),
      options,
      filtered: true,
    }
  }
}

/// A filtered local source node and what it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLocal {
  pub state: llb::State,
  pub source: LocalSource,
}

/// Process-lifetime map from cache key to filtered local source.
#[derive(Debug)]
pub struct IncludeCache {
  enabled: bool,
  entries: HashMap<String, CachedLocal>,
}

impl IncludeCache {
  /// A cache that reuses entries only when `enabled`.
  pub fn new(enabled: bool) -> Self {
    Self {
      enabled,
      entries: HashMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, key: &str) -> Option<&CachedLocal> {
    self.entries.get(key)
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// Return `local` filtered to `includes`, building it through `backend` on a miss.
  ///
  /// The built node carries the key as its shared key hint, so the execution
  /// engine also treats equal requests as one transfer.
  pub fn filter<B, S>(&mut self, backend: &mut B, local: &LocalSource, includes: &[S]) -> CachedLocal
  where
    B: GraphBackend + ?Sized,
    S: AsRef<str>,
  {
    let includes = normalize_includes(includes);
    debug!(name = %local.name(), includes = ?includes, "normalized include patterns");

    let key = shared_key_hint(local.name(), &includes);
    if self.enabled
      && let Some(hit) = self.entries.get(&key)
    {
      debug!(key = %key, name = %local.name(), "re-using cached local source");
      return hit.clone();
    }

    let source = local.filtered(includes, &key);
    let state = backend.local(source.name(), source.options());
    let entry = CachedLocal { state, source };

    if self.enabled {
      debug!(key = %key, name = %local.name(), "caching local source");
      self.entries.insert(key, entry.clone());
    }
    entry
  }
}
