//! Runtime configuration for a [`Graph`](crate::facade::Graph).

use crate::consts::INCLUDE_CACHE_ENV;

/// Settings that shape how a graph handles local-source filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
  /// Reuse previously built filtered local sources within this process.
  ///
  /// When disabled, every filter request builds a fresh node. Cache keys are
  /// still attached as shared key hints, so execution-time dedup is unaffected.
  pub include_cache: bool,
}

impl Default for GraphConfig {
  fn default() -> Self {
    Self { include_cache: true }
  }
}

impl GraphConfig {
  /// Read configuration from the environment, falling back to defaults.
  ///
  /// `PLLB_INCLUDE_CACHE` set to `0`, `false`, `off` or `no` disables the
  /// in-memory include cache. Any other value leaves it enabled.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Ok(value) = std::env::var(INCLUDE_CACHE_ENV) {
      config.include_cache = !is_disabled(&value);
    }
    config
  }

  pub fn with_include_cache(mut self, enabled: bool) -> Self {
    self.include_cache = enabled;
    self
  }
}

fn is_disabled(value: &str) -> bool {
  matches!(
    value.trim().to_ascii_lowercase().as_str(),
    "0" | "false" | "off" | "no"
  )
}
