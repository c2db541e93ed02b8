//! Crate-wide constants.

/// Environment variable toggling the in-memory include cache.
pub const INCLUDE_CACHE_ENV: &str = "PLLB_INCLUDE_CACHE";

/// Algorithm prefix on every op digest in a marshaled definition.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Path component meaning "the current directory" in include patterns.
pub const CURRENT_DIR: &str = ".";

/// Replacement for a trailing [`CURRENT_DIR`] component in include patterns.
pub const DIR_CONTENTS_WILDCARD: &str = "*";

/// Working directory of a state that never had one set.
pub const DEFAULT_DIR: &str = "/";

/// Attribute keys recorded on local source ops.
pub mod local_attrs {
  pub const INCLUDE_PATTERNS: &str = "local.includepattern";
  pub const EXCLUDE_PATTERNS: &str = "local.excludepatterns";
  pub const FOLLOW_PATHS: &str = "local.followpaths";
  pub const SHARED_KEY_HINT: &str = "local.sharedkeyhint";
  pub const SESSION: &str = "local.session";
}

/// Attribute keys recorded on image and git source ops.
pub mod source_attrs {
  pub const IMAGE_RESOLVE_MODE: &str = "image.resolvemode";
  pub const GIT_KEEP_DIR: &str = "git.keepgitdir";
  pub const GIT_FULL_URL: &str = "git.fullurl";
  pub const GIT_AUTH_TOKEN_SECRET: &str = "git.authtokensecret";
  pub const GIT_KNOWN_SSH_HOSTS: &str = "git.knownsshhosts";
}

/// Metadata description key carrying a user-facing op name.
pub const CUSTOM_NAME_KEY: &str = "llb.customname";
