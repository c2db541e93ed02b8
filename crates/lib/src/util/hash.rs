//! Hashing utilities for content-addressed op digests.
//!
//! This module provides:
//! - `Digest`: a prefixed, full-length SHA-256 digest (`sha256:<hex>`)
//! - `Hashable`: canonical JSON serialization plus digest for graph records
//! - `hash_bytes()`: arbitrary byte hashing

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::consts::DIGEST_PREFIX;

pub type HashError = serde_json::Error;

/// A content digest identifying one serialized op.
///
/// # Format
///
/// The algorithm prefix followed by 64 lowercase hex characters, e.g.
/// `"sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(pub String);

impl Digest {
  /// Returns the hex part of the digest, without the algorithm prefix.
  pub fn hex(&self) -> &str {
    self.0.strip_prefix(DIGEST_PREFIX).unwrap_or(&self.0)
  }
}

impl std::fmt::Display for Digest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Types whose canonical form is their JSON serialization.
///
/// The serialized bytes are what ends up in a marshaled definition, and the
/// digest of those exact bytes is how other ops refer to them.
pub trait Hashable: Serialize {
  fn canonical_bytes(&self) -> Result<Vec<u8>, HashError> {
    serde_json::to_vec(self)
  }

  fn compute_digest(&self) -> Result<Digest, HashError> {
    Ok(hash_bytes(&self.canonical_bytes()?))
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Digest {
  let mut hasher = Sha256::new();
  hasher.update(data);
  Digest(format!("{}{}", DIGEST_PREFIX, hex::encode(hasher.finalize())))
}
