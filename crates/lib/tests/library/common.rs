use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pllb_lib::config::GraphConfig;
use pllb_lib::facade::{Graph, GraphBackend};
use pllb_lib::llb::{
  self, Builder, Constraint, CopyOption, Definition, GitOption, GraphError, ImageOption, LocalOption, MkdirOption,
  MkfileOption, MountOption, RmOption, RunOption,
};
use pllb_lib::platform::Platform;

/// What an [`Instrumented`] backend observed.
#[derive(Debug, Default)]
pub struct Stats {
  active: AtomicBool,
  pub overlaps: AtomicUsize,
  pub calls: AtomicUsize,
  pub filtered_locals: AtomicUsize,
  pub ops: Mutex<Vec<&'static str>>,
}

impl Stats {
  pub fn overlaps(&self) -> usize {
    self.overlaps.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn filtered_locals(&self) -> usize {
    self.filtered_locals.load(Ordering::SeqCst)
  }

  pub fn count(&self, op: &str) -> usize {
    self.ops.lock().unwrap().iter().filter(|o| **o == op).count()
  }
}

/// A [`Builder`] that records every call and notices concurrent entry.
///
/// Each call yields for a moment while marked active, so an unserialized
/// caller would very likely be caught inside another call.
pub struct Instrumented {
  inner: Builder,
  stats: Arc<Stats>,
}

impl Instrumented {
  pub fn new() -> (Self, Arc<Stats>) {
    let stats = Arc::new(Stats::default());
    let backend = Self {
      inner: Builder::new(),
      stats: Arc::clone(&stats),
    };
    (backend, stats)
  }

  fn track<T>(&mut self, op: &'static str, f: impl FnOnce(&mut Builder) -> T) -> T {
    if self.stats.active.swap(true, Ordering::SeqCst) {
      self.stats.overlaps.fetch_add(1, Ordering::SeqCst);
    }
    self.stats.calls.fetch_add(1, Ordering::SeqCst);
    self.stats.ops.lock().unwrap().push(op);

    thread::sleep(Duration::from_micros(200));
    let out = f(&mut self.inner);

    self.stats.active.store(false, Ordering::SeqCst);
    out
  }
}

pub fn instrumented_graph(config: GraphConfig) -> (Arc<Graph<Instrumented>>, Arc<Stats>) {
  let (backend, stats) = Instrumented::new();
  (Graph::new(backend, config), stats)
}

impl GraphBackend for Instrumented {
  fn scratch(&mut self) -> llb::State {
    self.track("scratch", |b| b.scratch())
  }

  fn local(&mut self, name: &str, opts: &[LocalOption]) -> llb::State {
    if opts.iter().any(|o| matches!(o, LocalOption::IncludePatterns(_))) {
      self.stats.filtered_locals.fetch_add(1, Ordering::SeqCst);
    }
    self.track("local", |b| b.local(name, opts))
  }

  fn image(&mut self, reference: &str, opts: &[ImageOption]) -> llb::State {
    self.track("image", |b| b.image(reference, opts))
  }

  fn git(&mut self, remote: &str, reference: &str, opts: &[GitOption]) -> llb::State {
    self.track("git", |b| b.git(remote, reference, opts))
  }

  fn add_env(&mut self, st: &llb::State, key: &str, value: &str) -> llb::State {
    self.track("add_env", |b| b.add_env(st, key, value))
  }

  fn dir(&mut self, st: &llb::State, dir: &str) -> llb::State {
    self.track("dir", |b| b.dir(st, dir))
  }

  fn get_dir(&mut self, st: &llb::State) -> Result<String, GraphError> {
    self.track("get_dir", |b| b.get_dir(st))
  }

  fn user(&mut self, st: &llb::State, user: &str) -> llb::State {
    self.track("user", |b| b.user(st, user))
  }

  fn platform(&mut self, st: &llb::State, platform: &Platform) -> llb::State {
    self.track("platform", |b| b.platform(st, platform))
  }

  fn set_marshal_defaults(&mut self, st: &llb::State, constraints: &[Constraint]) -> llb::State {
    self.track("set_marshal_defaults", |b| b.set_marshal_defaults(st, constraints))
  }

  fn run(&mut self, st: &llb::State, opts: &[RunOption]) -> llb::ExecState {
    self.track("run", |b| b.run(st, opts))
  }

  fn exec_add_mount(
    &mut self,
    exec: &llb::ExecState,
    target: &str,
    source: &llb::State,
    opts: &[MountOption],
  ) -> llb::State {
    self.track("exec_add_mount", |b| b.exec_add_mount(exec, target, source, opts))
  }

  fn exec_root(&mut self, exec: &llb::ExecState) -> llb::State {
    self.track("exec_root", |b| b.exec_root(exec))
  }

  fn file(&mut self, st: &llb::State, action: &llb::FileAction, constraints: &[Constraint]) -> llb::State {
    self.track("file", |b| b.file(st, action, constraints))
  }

  fn mkdir(&mut self, prev: Option<&llb::FileAction>, path: &str, mode: u32, opts: &[MkdirOption]) -> llb::FileAction {
    self.track("mkdir", |b| b.mkdir(prev, path, mode, opts))
  }

  fn mkfile(
    &mut self,
    prev: Option<&llb::FileAction>,
    path: &str,
    mode: u32,
    data: &[u8],
    opts: &[MkfileOption],
  ) -> llb::FileAction {
    self.track("mkfile", |b| b.mkfile(prev, path, mode, data, opts))
  }

  fn rm(&mut self, prev: Option<&llb::FileAction>, path: &str, opts: &[RmOption]) -> llb::FileAction {
    self.track("rm", |b| b.rm(prev, path, opts))
  }

  fn copy(
    &mut self,
    prev: Option<&llb::FileAction>,
    source: &llb::State,
    src: &str,
    dest: &str,
    opts: &[CopyOption],
  ) -> llb::FileAction {
    self.track("copy", |b| b.copy(prev, source, src, dest, opts))
  }

  fn marshal(&mut self, st: &llb::State, constraints: &[Constraint]) -> Result<Definition, GraphError> {
    self.track("marshal", |b| b.marshal(st, constraints))
  }
}
