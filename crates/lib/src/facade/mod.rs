//! Thread-safe facade over the graph builder.
//!
//! A [`Graph`] owns one [`GraphBackend`] behind a single mutex. Every
//! operation that touches the backend locks for the duration of that one
//! call and releases before returning, so many workers can assemble graph
//! fragments concurrently while the backend only ever sees one call at a
//! time.
//!
//! The values handed out ([`State`], [`ExecState`], [`FileAction`]) are
//! immutable. Transformations return new values and never change the
//! receiver, so a value can be shared freely between threads.
//!
//! Most code uses the process-wide graph through the free functions in this
//! module ([`scratch`], [`local`], [`image`], [`git`], ...). Separate graphs can
//! be created with [`Graph::new`], e.g. to put an instrumented backend under
//! test.
//!
//! # Example
//!
//! ```
//! use pllb_lib::facade;
//! use pllb_lib::llb::RunOption;
//!
//! let ctx = facade::local("ctx", vec![]).with_include(&["."]);
//! let root = facade::image("rust:1", &[])
//!   .dir("/src")
//!   .run(&[
//!     RunOption::Shell("cargo build".to_string()),
//!     facade::add_mount("/src", &ctx, vec![]),
//!   ])
//!   .root();
//!
//! let def = root.marshal(&[]).unwrap();
//! assert!(!def.is_empty());
//! ```

mod backend;
mod file;
mod state;

pub use backend::GraphBackend;
pub use file::FileAction;
pub use state::{CopyInput, ExecState, RawGuard, State};

use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use crate::config::GraphConfig;
use crate::include::{IncludeCache, LocalSource};
use crate::llb::{
  self, Builder, CopyOption, GitOption, ImageOption, LocalOption, MkdirOption, MkfileOption, MountOption,
  MountRequest, RmOption, RunOption,
};

pub(crate) struct Inner<B> {
  pub(crate) includes: IncludeCache,
  pub(crate) backend: B,
}

/// A graph backend guarded by one lock, plus its include cache.
pub struct Graph<B: GraphBackend = Builder> {
  inner: Mutex<Inner<B>>,
}

impl<B: GraphBackend> Graph<B> {
  pub fn new(backend: B, config: GraphConfig) -> Arc<Self> {
    Arc::new(Self {
      inner: Mutex::new(Inner {
        includes: IncludeCache::new(config.include_cache),
        backend,
      }),
    })
  }

  /// Acquire the graph lock.
  ///
  /// A panic inside a backend call cannot leave the arena half-built: every
  /// call either adds complete vertices or none. A poisoned lock is therefore
  /// taken over as-is.
  pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<B>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn state(self: &Arc<Self>, raw: llb::State, local: Option<LocalSource>) -> State<B> {
    State::new(Arc::clone(self), raw, local)
  }

  /// The empty filesystem.
  pub fn scratch(self: &Arc<Self>) -> State<B> {
    let raw = self.lock().backend.scratch();
    self.state(raw, None)
  }

  /// A client-side directory. The name and options are kept so the state can
  /// later be narrowed with [`State::with_include`].
  pub fn local(self: &Arc<Self>, name: &str, opts: Vec<LocalOption>) -> State<B> {
    let raw = self.lock().backend.local(name, &opts);
    self.state(raw, Some(LocalSource::new(name, opts)))
  }

  pub fn image(self: &Arc<Self>, reference: &str, opts: &[ImageOption]) -> State<B> {
    let raw = self.lock().backend.image(reference, opts);
    self.state(raw, None)
  }

  pub fn git(self: &Arc<Self>, remote: &str, reference: &str, opts: &[GitOption]) -> State<B> {
    let raw = self.lock().backend.git(remote, reference, opts);
    self.state(raw, None)
  }

  /// Wrap a raw state obtained directly from this graph's backend.
  pub fn from_raw_state(self: &Arc<Self>, raw: llb::State) -> State<B> {
    let _guard = self.lock();
    self.state(raw, None)
  }

  /// A run option mounting `source` at `dest`.
  pub fn add_mount(&self, dest: &str, source: &State<B>, opts: Vec<MountOption>) -> RunOption {
    let _guard = self.lock();
    RunOption::Mount(MountRequest {
      dest: dest.to_string(),
      source: source.unwrap_unlocked().clone(),
      options: opts,
    })
  }

  pub fn mkdir(self: &Arc<Self>, path: &str, mode: u32, opts: &[MkdirOption]) -> FileAction<B> {
    let raw = self.lock().backend.mkdir(None, path, mode, opts);
    FileAction::new(Arc::clone(self), raw)
  }

  pub fn mkfile(self: &Arc<Self>, path: &str, mode: u32, data: &[u8], opts: &[MkfileOption]) -> FileAction<B> {
    let raw = self.lock().backend.mkfile(None, path, mode, data, opts);
    FileAction::new(Arc::clone(self), raw)
  }

  pub fn rm(self: &Arc<Self>, path: &str, opts: &[RmOption]) -> FileAction<B> {
    let raw = self.lock().backend.rm(None, path, opts);
    FileAction::new(Arc::clone(self), raw)
  }

  pub fn copy(
    self: &Arc<Self>,
    input: &impl CopyInput,
    src: &str,
    dest: &str,
    opts: &[CopyOption],
  ) -> FileAction<B> {
    let raw = self.lock().backend.copy(None, input.unwrap_unlocked(), src, dest, opts);
    FileAction::new(Arc::clone(self), raw)
  }

  /// Number of filtered local sources currently cached.
  pub fn cached_includes(&self) -> usize {
    self.lock().includes.len()
  }

  /// Forget every cached filtered local source.
  ///
  /// States already handed out stay valid; the next filter request for a key
  /// builds a new node.
  pub fn clear_include_cache(&self) {
    self.lock().includes.clear();
  }
}

static GLOBAL: LazyLock<Arc<Graph>> = LazyLock::new(|| Graph::new(Builder::new(), GraphConfig::from_env()));

/// The process-wide graph.
///
/// Configured from the environment on first use (see [`GraphConfig::from_env`]).
pub fn global() -> &'static Arc<Graph> {
  &GLOBAL
}

pub fn scratch() -> State {
  global().scratch()
}

pub fn local(name: &str, opts: Vec<LocalOption>) -> State {
  global().local(name, opts)
}

pub fn image(reference: &str, opts: &[ImageOption]) -> State {
  global().image(reference, opts)
}

pub fn git(remote: &str, reference: &str, opts: &[GitOption]) -> State {
  global().git(remote, reference, opts)
}

pub fn from_raw_state(raw: llb::State) -> State {
  global().from_raw_state(raw)
}

pub fn add_mount(dest: &str, source: &State, opts: Vec<MountOption>) -> RunOption {
  global().add_mount(dest, source, opts)
}

pub fn mkdir(path: &str, mode: u32, opts: &[MkdirOption]) -> FileAction {
  global().mkdir(path, mode, opts)
}

pub fn mkfile(path: &str, mode: u32, data: &[u8], opts: &[MkfileOption]) -> FileAction {
  global().mkfile(path, mode, data, opts)
}

pub fn rm(path: &str, opts: &[RmOption]) -> FileAction {
  global().rm(path, opts)
}

pub fn copy(input: &impl CopyInput, src: &str, dest: &str, opts: &[CopyOption]) -> FileAction {
  global().copy(input, src, dest, opts)
}
