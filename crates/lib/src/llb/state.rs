//! Raw graph values handed out by a [`Builder`](super::Builder).
//!
//! These are plain data: they can be cloned, compared and sent anywhere. Only
//! the builder that created them can turn them into new nodes or marshal them.

use petgraph::graph::NodeIndex;

use super::options::{Constraint, CopyOption, MkdirOption, MkfileOption, RmOption};
use crate::consts::DEFAULT_DIR;
use crate::platform::Platform;

/// One output of one vertex in a builder's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Output {
  pub(crate) builder: u64,
  pub(crate) vertex: NodeIndex,
  pub(crate) index: u32,
}

impl Output {
  /// Output slot on the producing vertex.
  pub fn index(&self) -> u32 {
    self.index
  }
}

/// Metadata carried alongside an output; inherited by subsequent execs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Meta {
  pub(crate) env: Vec<(String, String)>,
  pub(crate) dir: Option<String>,
  pub(crate) user: Option<String>,
  pub(crate) platform: Option<Platform>,
  pub(crate) defaults: Vec<Constraint>,
}

impl Meta {
  /// Set `key`, replacing an existing value in place.
  pub(crate) fn set_env(&mut self, key: &str, value: &str) {
    set_env(&mut self.env, key, value);
  }
}

pub(crate) fn set_env(env: &mut Vec<(String, String)>, key: &str, value: &str) {
  match env.iter_mut().find(|(k, _)| k == key) {
    Some(entry) => entry.1 = value.to_string(),
    None => env.push((key.to_string(), value.to_string())),
  }
}

/// A node in the build graph: an optional output plus its metadata.
///
/// A state without an output is the empty filesystem (scratch).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct State {
  pub(crate) output: Option<Output>,
  pub(crate) meta: Meta,
}

impl State {
  pub fn output(&self) -> Option<Output> {
    self.output
  }

  pub fn is_scratch(&self) -> bool {
    self.output.is_none()
  }

  pub fn env(&self) -> &[(String, String)] {
    &self.meta.env
  }

  pub fn get_env(&self, key: &str) -> Option<&str> {
    self.meta.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
  }

  pub fn user(&self) -> Option<&str> {
    self.meta.user.as_deref()
  }

  pub fn platform(&self) -> Option<&Platform> {
    self.meta.platform.as_ref()
  }

  pub fn marshal_defaults(&self) -> &[Constraint] {
    &self.meta.defaults
  }

  pub(crate) fn with_output(&self, output: Option<Output>) -> State {
    State {
      output,
      meta: self.meta.clone(),
    }
  }

  /// Working directory, without validation.
  pub(crate) fn dir_or_default(&self) -> &str {
    self.meta.dir.as_deref().unwrap_or(DEFAULT_DIR)
  }
}

/// A pending process execution.
///
/// The exec vertex already exists in the builder's arena; mounts added later
/// extend it in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecState {
  pub(crate) builder: u64,
  pub(crate) vertex: NodeIndex,
  pub(crate) base: State,
}

/// One recorded filesystem edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileStep {
  Mkdir {
    path: String,
    mode: u32,
    options: Vec<MkdirOption>,
  },
  Mkfile {
    path: String,
    mode: u32,
    data: Vec<u8>,
    options: Vec<MkfileOption>,
  },
  Rm {
    path: String,
    options: Vec<RmOption>,
  },
  Copy {
    source: State,
    src: String,
    dest: String,
    options: Vec<CopyOption>,
  },
}

/// An ordered chain of filesystem edits, applied with [`Builder::file`](super::Builder::file).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FileAction {
  pub(crate) steps: Vec<FileStep>,
}

impl FileAction {
  pub fn steps(&self) -> &[FileStep] {
    &self.steps
  }

  /// A new chain: these steps followed by `step`.
  pub(crate) fn then(prev: Option<&FileAction>, step: FileStep) -> FileAction {
    let mut steps = prev.map(|p| p.steps.clone()).unwrap_or_default();
    steps.push(step);
    FileAction { steps }
  }
}

/// Resolve `path` against `base`, lexically cleaning `.` and `..`.
pub(crate) fn resolve_path(base: &str, path: &str) -> String {
  let joined = if path.starts_with('/') {
    path.to_string()
  } else {
    format!("{}/{}", base, path)
  };

  let mut parts: Vec<&str> = Vec::new();
  for part in joined.split('/') {
    match part {
      "" | "." => {}
      ".." => {
        parts.pop();
      }
      p => parts.push(p),
    }
  }
  format!("/{}", parts.join("/"))
}
