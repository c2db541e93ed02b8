//! Options accepted by graph constructors and transformations.
//!
//! Options are applied in order. When two options set the same thing, the
//! later one wins.

use serde::{Deserialize, Serialize};

use super::state::State;
use crate::platform::Platform;

/// Options for a local (client-side directory) source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalOption {
  /// Only transfer paths matching these patterns.
  IncludePatterns(Vec<String>),
  /// Never transfer paths matching these patterns.
  ExcludePatterns(Vec<String>),
  /// Transfer these paths and the targets of symlinks along them.
  FollowPaths(Vec<String>),
  /// Key under which the execution engine may share this source's transfer cache.
  SharedKeyHint(String),
  /// Client session that owns the directory.
  SessionId(String),
  CustomName(String),
}

/// How an image reference is resolved when the op runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResolveMode {
  #[default]
  Default,
  ForcePull,
  PreferLocal,
}

impl ResolveMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Default => "default",
      Self::ForcePull => "pull",
      Self::PreferLocal => "local",
    }
  }
}

/// Options for an image source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageOption {
  Platform(Platform),
  ResolveMode(ResolveMode),
  CustomName(String),
}

/// Options for a git source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GitOption {
  KeepGitDir,
  /// Name of the secret holding an auth token for the remote.
  AuthTokenSecret(String),
  /// Contents of a known_hosts file for SSH remotes.
  KnownSshHosts(String),
  CustomName(String),
}

/// Network access granted to an exec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetMode {
  #[default]
  Sandbox,
  Host,
  None,
}

/// Sharing mode of a cache mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSharing {
  #[default]
  Shared,
  Private,
  Locked,
}

/// Options for a mount added to an exec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MountOption {
  /// Mount without producing an output.
  Readonly,
  /// Mount only this path of the source.
  SourcePath(String),
  /// Persistent cache mount shared across runs under `id`.
  Cache { id: String, sharing: CacheSharing },
  /// Empty in-memory filesystem.
  Tmpfs,
}

/// A mount requested as a run option.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountRequest {
  pub dest: String,
  pub source: State,
  pub options: Vec<MountOption>,
}

/// Options for running a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunOption {
  Args(Vec<String>),
  /// Run the command through `/bin/sh -c`.
  Shell(String),
  AddEnv(String, String),
  Dir(String),
  User(String),
  Mount(MountRequest),
  Network(NetMode),
  IgnoreCache,
  CustomName(String),
}

/// Constraints applied to individual ops or to a whole marshal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
  Platform(Platform),
  IgnoreCache,
  CustomName(String),
  Description(String, String),
}

/// Owner of a created or copied path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
  pub uid: u32,
  pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MkdirOption {
  MakeParents,
  Chown(Owner),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MkfileOption {
  Chown(Owner),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RmOption {
  AllowNotFound,
  AllowWildcard,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CopyOption {
  CreateDestPath,
  AllowWildcard,
  FollowSymlinks,
  Mode(u32),
  Chown(Owner),
  IncludePatterns(Vec<String>),
  ExcludePatterns(Vec<String>),
}
