use std::fmt;
use std::sync::Arc;

use super::{CopyInput, Graph, GraphBackend};
use crate::llb::{self, Builder, CopyOption, FileStep, MkdirOption, MkfileOption, RmOption};

/// A chain of filesystem edits, applied to a state with [`State::file`](super::State::file).
///
/// Start a chain with [`Graph::mkdir`] and friends; each method here returns
/// the chain extended by one step and leaves the receiver untouched.
pub struct FileAction<B: GraphBackend = Builder> {
  graph: Arc<Graph<B>>,
  raw: llb::FileAction,
}

impl<B: GraphBackend> FileAction<B> {
  pub(super) fn new(graph: Arc<Graph<B>>, raw: llb::FileAction) -> Self {
    Self { graph, raw }
  }

  fn then(&self, raw: llb::FileAction) -> Self {
    Self::new(Arc::clone(&self.graph), raw)
  }

  pub fn mkdir(&self, path: &str, mode: u32, opts: &[MkdirOption]) -> Self {
    let raw = self.graph.lock().backend.mkdir(Some(&self.raw), path, mode, opts);
    self.then(raw)
  }

  pub fn mkfile(&self, path: &str, mode: u32, data: &[u8], opts: &[MkfileOption]) -> Self {
    let raw = self.graph.lock().backend.mkfile(Some(&self.raw), path, mode, data, opts);
    self.then(raw)
  }

  pub fn rm(&self, path: &str, opts: &[RmOption]) -> Self {
    let raw = self.graph.lock().backend.rm(Some(&self.raw), path, opts);
    self.then(raw)
  }

  pub fn copy(&self, input: &impl CopyInput, src: &str, dest: &str, opts: &[CopyOption]) -> Self {
    let raw = self
      .graph
      .lock()
      .backend
      .copy(Some(&self.raw), input.unwrap_unlocked(), src, dest, opts);
    self.then(raw)
  }

  pub fn steps(&self) -> &[FileStep] {
    self.raw.steps()
  }

  pub(crate) fn raw(&self) -> &llb::FileAction {
    &self.raw
  }
}

impl<B: GraphBackend> Clone for FileAction<B> {
  fn clone(&self) -> Self {
    self.then(self.raw.clone())
  }
}

impl<B: GraphBackend> fmt::Debug for FileAction<B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FileAction").field("steps", &self.raw.steps()).finish()
  }
}
