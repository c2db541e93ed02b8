//! Host platform detection and filesystem identity.
//!
//! [`Platform`] is the OCI-style target (`os`/`architecture`/`variant`) that
//! ops are marshaled for. When nothing more specific is requested, the host
//! platform is used.

pub mod inode;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use inode::inode_best_effort;

/// Target platform of an op (e.g., `linux/arm64`, `linux/arm/v7`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
  pub os: String,
  pub architecture: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,
}

impl Platform {
  /// Create a new platform without a variant
  pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
    Self {
      os: os.into(),
      architecture: architecture.into(),
      variant: None,
    }
  }

  pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
    self.variant = Some(variant.into());
    self
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture has no known OCI name
  pub fn current() -> Option<Self> {
    Some(Self::new(oci_os(std::env::consts::OS)?, oci_arch(std::env::consts::ARCH)?))
  }

  /// Parse `os/arch` or `os/arch/variant`
  pub fn parse(value: &str) -> Option<Self> {
    let mut parts = value.split('/');
    let os = parts.next().filter(|s| !s.is_empty())?;
    let arch = parts.next().filter(|s| !s.is_empty())?;
    let variant = parts.next();
    if parts.next().is_some() {
      return None;
    }

    let platform = Self::new(os, arch);
    match variant {
      Some(v) if !v.is_empty() => Some(platform.with_variant(v)),
      Some(_) => None,
      None => Some(platform),
    }
  }
}

/// OCI name for a Rust target OS, e.g. `macos` is `darwin`.
fn oci_os(os: &str) -> Option<&'static str> {
  match os {
    "linux" => Some("linux"),
    "macos" => Some("darwin"),
    "windows" => Some("windows"),
    "freebsd" => Some("freebsd"),
    _ => None,
  }
}

/// OCI name for a Rust target architecture.
fn oci_arch(arch: &str) -> Option<&'static str> {
  match arch {
    "x86_64" => Some("amd64"),
    "aarch64" => Some("arm64"),
    "x86" => Some("386"),
    "arm" => Some("arm"),
    "riscv64" => Some("riscv64"),
    "powerpc64" => Some("ppc64"),
    "s390x" => Some("s390x"),
    _ => None,
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.os, self.architecture)?;
    if let Some(variant) = &self.variant {
      write!(f, "/{}", variant)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_format() {
    assert_eq!(Platform::new("linux", "amd64").to_string(), "linux/amd64");
    assert_eq!(
      Platform::new("linux", "arm").with_variant("v7").to_string(),
      "linux/arm/v7"
    );
  }

  #[test]
  fn parse_accepts_two_or_three_components() {
    assert_eq!(Platform::parse("linux/arm64"), Some(Platform::new("linux", "arm64")));
    assert_eq!(
      Platform::parse("linux/arm/v7"),
      Some(Platform::new("linux", "arm").with_variant("v7"))
    );
    assert_eq!(Platform::parse("linux"), None);
    assert_eq!(Platform::parse("linux/"), None);
    assert_eq!(Platform::parse("linux/arm/v7/extra"), None);
  }

  #[test]
  fn current_uses_oci_names() {
    if let Some(platform) = Platform::current() {
      assert_eq!(Some(platform.os.as_str()), oci_os(std::env::consts::OS));
      assert_eq!(Some(platform.architecture.as_str()), oci_arch(std::env::consts::ARCH));
      assert!(platform.variant.is_none());
    }
  }

  #[test]
  fn rust_target_names_map_to_oci() {
    assert_eq!(oci_os("macos"), Some("darwin"));
    assert_eq!(oci_os("linux"), Some("linux"));
    assert_eq!(oci_os("haiku"), None);
    assert_eq!(oci_arch("x86_64"), Some("amd64"));
    assert_eq!(oci_arch("aarch64"), Some("arm64"));
    assert_eq!(oci_arch("sparc64"), None);
  }
}
