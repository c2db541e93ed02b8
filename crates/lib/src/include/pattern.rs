//! Include pattern normalization and cache key derivation.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::consts::{CURRENT_DIR, DIR_CONTENTS_WILDCARD};
use crate::platform::inode_best_effort;

/// Rewrite patterns whose last component is `.` to match that directory's contents.
///
/// A bare `.` matches nothing under include-filter semantics, so `.` becomes
/// `./*` and `a/b/.` becomes `a/b/*`. Other patterns are returned unchanged,
/// in their original order.
pub fn normalize_includes<S: AsRef<str>>(includes: &[S]) -> Vec<String> {
  includes.iter().map(|inc| normalize_include(inc.as_ref())).collect()
}

fn normalize_include(pattern: &str) -> String {
  if pattern == CURRENT_DIR {
    return format!("{}/{}", CURRENT_DIR, DIR_CONTENTS_WILDCARD);
  }
  match pattern.rsplit_once(is_separator) {
    Some((_, last)) if last == CURRENT_DIR => {
      let parent = &pattern[..pattern.len() - CURRENT_DIR.len()];
      format!("{}{}", parent, DIR_CONTENTS_WILDCARD)
    }
    _ => pattern.to_string(),
  }
}

/// Path separators of the host: `/`, and also `\` on Windows.
fn is_separator(c: char) -> bool {
  c == '/' || (cfg!(windows) && c == '\\')
}

/// Cache key for a local source filtered to `includes`.
///
/// Hex SHA-256 over the name and then each include, each entry followed by
/// the little-endian identity of that path (see [`inode_best_effort`]).
/// Order and duplicates are significant.
pub fn shared_key_hint<S: AsRef<str>>(name: &str, includes: &[S]) -> String {
  shared_key_hint_with(name, includes, |path| inode_best_effort(Path::new(path)))
}

/// [`shared_key_hint`] with a caller-supplied identity probe.
pub fn shared_key_hint_with<S: AsRef<str>>(name: &str, includes: &[S], probe: impl Fn(&str) -> u64) -> String {
  let mut hasher = Sha256::new();
  let mut add = |path: &str| {
    hasher.update(path.as_bytes());
    hasher.update(probe(path).to_le_bytes());
  };

  add(name);
  for include in includes {
    add(include.as_ref());
  }
  hex::encode(hasher.finalize())
}
