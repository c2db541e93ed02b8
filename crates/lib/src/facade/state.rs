use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, MutexGuard};

use tracing::debug;

use super::{FileAction, Graph, GraphBackend, Inner};
use crate::include::LocalSource;
use crate::llb::{self, Builder, Constraint, Definition, GraphError, MountOption, Output, RunOption};
use crate::platform::Platform;

/// A node in the build graph, bound to the [`Graph`] that created it.
///
/// States are immutable: every transformation locks the graph, asks the
/// backend for a new node and returns it as a new `State`. Equality is the
/// equality of the underlying raw node within the same graph.
pub struct State<B: GraphBackend = Builder> {
  graph: Arc<Graph<B>>,
  raw: llb::State,
  /// Set when this state is a local source; used by [`State::with_include`].
  local: Option<LocalSource>,
}

impl<B: GraphBackend> State<B> {
  pub(super) fn new(graph: Arc<Graph<B>>, raw: llb::State, local: Option<LocalSource>) -> Self {
    Self { graph, raw, local }
  }

  fn derive(&self, raw: llb::State) -> Self {
    Self::new(Arc::clone(&self.graph), raw, None)
  }

  pub fn graph(&self) -> &Arc<Graph<B>> {
    &self.graph
  }

  /// Name and options this state was built from, if it is a local source.
  pub fn local_source(&self) -> Option<&LocalSource> {
    self.local.as_ref()
  }

  pub fn output(&self) -> Option<Output> {
    let _guard = self.graph.lock();
    self.raw.output()
  }

  pub fn add_env(&self, key: &str, value: &str) -> Self {
    let raw = self.graph.lock().backend.add_env(&self.raw, key, value);
    self.derive(raw)
  }

  pub fn dir(&self, dir: &str) -> Self {
    let raw = self.graph.lock().backend.dir(&self.raw, dir);
    self.derive(raw)
  }

  pub fn get_dir(&self) -> Result<String, GraphError> {
    self.graph.lock().backend.get_dir(&self.raw)
  }

  pub fn user(&self, user: &str) -> Self {
    let raw = self.graph.lock().backend.user(&self.raw, user);
    self.derive(raw)
  }

  pub fn platform(&self, platform: &Platform) -> Self {
    let raw = self.graph.lock().backend.platform(&self.raw, platform);
    self.derive(raw)
  }

  pub fn set_marshal_defaults(&self, constraints: &[Constraint]) -> Self {
    let raw = self.graph.lock().backend.set_marshal_defaults(&self.raw, constraints);
    self.derive(raw)
  }

  pub fn run(&self, opts: &[RunOption]) -> ExecState<B> {
    let raw = self.graph.lock().backend.run(&self.raw, opts);
    ExecState {
      graph: Arc::clone(&self.graph),
      raw,
    }
  }

  /// Apply a file action chain to this state.
  pub fn file(&self, action: &FileAction<B>, constraints: &[Constraint]) -> Self {
    let raw = self.graph.lock().backend.file(&self.raw, action.raw(), constraints);
    self.derive(raw)
  }

  /// Serialize this state and everything it depends on.
  ///
  /// Runs entirely under the graph lock; concurrent marshals queue behind
  /// each other.
  pub fn marshal(&self, constraints: &[Constraint]) -> Result<Definition, GraphError> {
    self.graph.lock().backend.marshal(&self.raw, constraints)
  }

  /// This local source narrowed to `includes`, shared with earlier equal requests.
  ///
  /// Patterns ending in a `.` component are rewritten to match the directory's
  /// contents (see [`normalize_includes`](crate::include::normalize_includes)).
  /// States that are not local sources, or whose include filter was already
  /// applied, are returned unchanged.
  pub fn with_include<S: AsRef<str>>(&self, includes: &[S]) -> Self {
    let mut inner = self.graph.lock();

    let Some(local) = &self.local else {
      debug!(count = includes.len(), "state is not a local source, leaving it unfiltered");
      return self.clone();
    };
    if local.is_filtered() {
      debug!(name = %local.name(), count = includes.len(), "local source is already filtered, leaving it unchanged");
      return self.clone();
    }
    debug!(name = %local.name(), count = includes.len(), "applying include filter");

    let Inner { includes: cache, backend } = &mut *inner;
    let filtered = cache.filter(backend, local, includes);
    Self::new(Arc::clone(&self.graph), filtered.state, Some(filtered.source))
  }

  /// Lock the graph and expose the raw node and the backend.
  ///
  /// The lock is held until the guard is released or dropped. Every other
  /// operation on the same graph, from any thread including this one, blocks
  /// until then.
  pub fn raw_state(&self) -> RawGuard<'_, B> {
    RawGuard {
      inner: self.graph.lock(),
      state: &self.raw,
    }
  }
}

impl<B: GraphBackend> Clone for State<B> {
  fn clone(&self) -> Self {
    Self {
      graph: Arc::clone(&self.graph),
      raw: self.raw.clone(),
      local: self.local.clone(),
    }
  }
}

impl<B: GraphBackend> PartialEq for State<B> {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.graph, &other.graph) && self.raw == other.raw && self.local == other.local
  }
}

impl<B: GraphBackend> Eq for State<B> {}

impl<B: GraphBackend> Hash for State<B> {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.raw.hash(state);
    self.local.hash(state);
  }
}

impl<B: GraphBackend> fmt::Debug for State<B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("State")
      .field("raw", &self.raw)
      .field("local", &self.local)
      .finish()
  }
}

/// Values that can be the source of a copy.
pub trait CopyInput {
  /// The raw node, read without taking the graph lock.
  ///
  /// Only for passing into backend calls made while the lock is already held,
  /// such as the copy operations of [`Graph`] and [`FileAction`].
  fn unwrap_unlocked(&self) -> &llb::State;
}

impl<B: GraphBackend> CopyInput for State<B> {
  fn unwrap_unlocked(&self) -> &llb::State {
    &self.raw
  }
}

impl CopyInput for llb::State {
  fn unwrap_unlocked(&self) -> &llb::State {
    self
  }
}

/// Exclusive access to a state's raw node and the graph backend.
///
/// Dereferences to the raw node. Call [`release`](Self::release) (or drop the
/// guard) exactly once when done; the raw node cannot outlive the guard.
pub struct RawGuard<'a, B: GraphBackend> {
  inner: MutexGuard<'a, Inner<B>>,
  state: &'a llb::State,
}

impl<B: GraphBackend> RawGuard<'_, B> {
  pub fn state(&self) -> &llb::State {
    self.state
  }

  /// The backend, for calls this facade does not wrap.
  pub fn backend(&mut self) -> &mut B {
    &mut self.inner.backend
  }

  /// Unlock the graph.
  pub fn release(self) {}
}

impl<B: GraphBackend> Deref for RawGuard<'_, B> {
  type Target = llb::State;

  fn deref(&self) -> &llb::State {
    self.state
  }
}

/// A pending process execution; see [`State::run`].
pub struct ExecState<B: GraphBackend = Builder> {
  graph: Arc<Graph<B>>,
  raw: llb::ExecState,
}

impl<B: GraphBackend> ExecState<B> {
  /// Mount `source` at `target` and return what the mount holds after the run.
  pub fn add_mount(&self, target: &str, source: &State<B>, opts: &[MountOption]) -> State<B> {
    let raw = self
      .graph
      .lock()
      .backend
      .exec_add_mount(&self.raw, target, &source.raw, opts);
    State::new(Arc::clone(&self.graph), raw, None)
  }

  /// The root filesystem after the run.
  pub fn root(&self) -> State<B> {
    let raw = self.graph.lock().backend.exec_root(&self.raw);
    State::new(Arc::clone(&self.graph), raw, None)
  }
}

impl<B: GraphBackend> Clone for ExecState<B> {
  fn clone(&self) -> Self {
    Self {
      graph: Arc::clone(&self.graph),
      raw: self.raw.clone(),
    }
  }
}

impl<B: GraphBackend> fmt::Debug for ExecState<B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecState").field("raw", &self.raw).finish()
  }
}
