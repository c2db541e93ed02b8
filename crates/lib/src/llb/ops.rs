//! Serialized op records and the marshaled definition.
//!
//! Every vertex is marshaled as one [`OpRecord`], encoded as canonical JSON.
//! Records refer to their inputs by the digest of the input's encoded bytes,
//! so identical sub-graphs encode identically regardless of which builder
//! (or which vertex of one builder) produced them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::options::{CacheSharing, NetMode, Owner};
use crate::platform::Platform;
use crate::util::hash::{Digest, HashError, Hashable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
  Source(SourceOp),
  Exec(ExecOp),
  File(FileOp),
}

impl Op {
  pub fn kind(&self) -> &'static str {
    match self {
      Op::Source(_) => "source",
      Op::Exec(_) => "exec",
      Op::File(_) => "file",
    }
  }
}

/// A leaf op importing content from outside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOp {
  /// `local://<name>`, `docker-image://<ref>` or `git://<remote>#<ref>`.
  pub identifier: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOp {
  pub meta: ExecMeta,
  pub mounts: Vec<Mount>,
  pub network: NetMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecMeta {
  pub args: Vec<String>,
  /// `KEY=value` entries.
  pub env: Vec<String>,
  pub cwd: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub user: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountType {
  #[default]
  Bind,
  Cache,
  Tmpfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
  /// Index into the op's inputs; `None` mounts an empty directory.
  pub input: Option<u32>,
  pub dest: String,
  /// Output slot this mount produces; `None` for read-only mounts.
  pub output: Option<u32>,
  pub readonly: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub selector: Option<String>,
  pub mount_type: MountType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cache: Option<CacheOpt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOpt {
  pub id: String,
  pub sharing: CacheSharing,
}

/// A sequence of filesystem edits producing a single output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOp {
  /// Input the edits start from; `None` starts from an empty filesystem.
  pub base: Option<u32>,
  pub actions: Vec<FileOpAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum FileOpAction {
  Mkdir {
    path: String,
    mode: u32,
    make_parents: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<Owner>,
  },
  Mkfile {
    path: String,
    mode: u32,
    #[serde(with = "hex_bytes")]
    data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<Owner>,
  },
  Rm {
    path: String,
    allow_not_found: bool,
    allow_wildcard: bool,
  },
  Copy {
    /// Index into the op's inputs; `None` copies from an empty filesystem.
    source: Option<u32>,
    src: String,
    dest: String,
    create_dest_path: bool,
    allow_wildcard: bool,
    follow_symlinks: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<Owner>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    include_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude_patterns: Vec<String>,
  },
}

/// Reference from one record to an output of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
  pub digest: Digest,
  pub index: u32,
}

/// The encoded form of one vertex.
///
/// The final record of a definition has no `op` and a single input: the
/// output the definition was marshaled for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRecord {
  pub inputs: Vec<InputRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub op: Option<Op>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<Platform>,
}

impl Hashable for OpRecord {}

/// Execution hints attached to an op; not part of its digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpMetadata {
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub ignore_cache: bool,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub description: BTreeMap<String, String>,
}

impl OpMetadata {
  pub(crate) fn merge(&mut self, other: &OpMetadata) {
    self.ignore_cache |= other.ignore_cache;
    for (key, value) in &other.description {
      self.description.entry(key.clone()).or_insert_with(|| value.clone());
    }
  }
}

/// A marshaled execution plan.
///
/// `def` holds encoded records in dependency order: every record appears
/// after all of its inputs, and content-identical records appear once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
  #[serde(with = "hex_bytes_list")]
  pub def: Vec<Vec<u8>>,
  pub metadata: BTreeMap<Digest, OpMetadata>,
}

impl Definition {
  pub fn is_empty(&self) -> bool {
    self.def.is_empty()
  }

  /// Serialized form handed to the execution engine.
  pub fn to_bytes(&self) -> Result<Vec<u8>, HashError> {
    serde_json::to_vec(self)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
    serde_json::from_slice(bytes)
  }

  /// Decode every record, in order.
  pub fn records(&self) -> Result<Vec<OpRecord>, HashError> {
    self.def.iter().map(|bytes| serde_json::from_slice(bytes)).collect()
  }

  /// Digest of the output the definition was marshaled for.
  pub fn head(&self) -> Result<Option<Digest>, HashError> {
    let Some(last) = self.def.last() else {
      return Ok(None);
    };
    let terminal: OpRecord = serde_json::from_slice(last)?;
    Ok(terminal.inputs.into_iter().next().map(|input| input.digest))
  }
}

mod hex_bytes {
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    hex::decode(s).map_err(serde::de::Error::custom)
  }
}

mod hex_bytes_list {
  use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};

  pub fn serialize<S: Serializer>(list: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(list.len()))?;
    for bytes in list {
      seq.serialize_element(&hex::encode(bytes))?;
    }
    seq.end()
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
    let list = Vec::<String>::deserialize(deserializer)?;
    list
      .into_iter()
      .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
      .collect()
  }
}
