use crate::llb::{
  self, Builder, Constraint, CopyOption, Definition, GitOption, GraphError, ImageOption, LocalOption, MkdirOption,
  MkfileOption, MountOption, RmOption, RunOption,
};
use crate::platform::Platform;

/// The graph-building capability a [`Graph`](super::Graph) serializes access to.
///
/// Every method takes `&mut self`: implementations are free to keep internal
/// state that must not be touched by two callers at once. [`Builder`] is the
/// production implementation; tests wrap it to observe call patterns.
pub trait GraphBackend: Send {
  fn scratch(&mut self) -> llb::State;
  fn local(&mut self, name: &str, opts: &[LocalOption]) -> llb::State;
  fn image(&mut self, reference: &str, opts: &[ImageOption]) -> llb::State;
  fn git(&mut self, remote: &str, reference: &str, opts: &[GitOption]) -> llb::State;

  fn add_env(&mut self, st: &llb::State, key: &str, value: &str) -> llb::State;
  fn dir(&mut self, st: &llb::State, dir: &str) -> llb::State;
  fn get_dir(&mut self, st: &llb::State) -> Result<String, GraphError>;
  fn user(&mut self, st: &llb::State, user: &str) -> llb::State;
  fn platform(&mut self, st: &llb::State, platform: &Platform) -> llb::State;
  fn set_marshal_defaults(&mut self, st: &llb::State, constraints: &[Constraint]) -> llb::State;

  fn run(&mut self, st: &llb::State, opts: &[RunOption]) -> llb::ExecState;
  fn exec_add_mount(
    &mut self,
    exec: &llb::ExecState,
    target: &str,
    source: &llb::State,
    opts: &[MountOption],
  ) -> llb::State;
  fn exec_root(&mut self, exec: &llb::ExecState) -> llb::State;

  fn file(&mut self, st: &llb::State, action: &llb::FileAction, constraints: &[Constraint]) -> llb::State;
  fn mkdir(&mut self, prev: Option<&llb::FileAction>, path: &str, mode: u32, opts: &[MkdirOption]) -> llb::FileAction;
  fn mkfile(
    &mut self,
    prev: Option<&llb::FileAction>,
    path: &str,
    mode: u32,
    data: &[u8],
    opts: &[MkfileOption],
  ) -> llb::FileAction;
  fn rm(&mut self, prev: Option<&llb::FileAction>, path: &str, opts: &[RmOption]) -> llb::FileAction;
  fn copy(
    &mut self,
    prev: Option<&llb::FileAction>,
    source: &llb::State,
    src: &str,
    dest: &str,
    opts: &[CopyOption],
  ) -> llb::FileAction;

  fn marshal(&mut self, st: &llb::State, constraints: &[Constraint]) -> Result<Definition, GraphError>;
}

impl GraphBackend for Builder {
  fn scratch(&mut self) -> llb::State {
    Builder::scratch(self)
  }

  fn local(&mut self, name: &str, opts: &[LocalOption]) -> llb::State {
    Builder::local(self, name, opts)
  }

  fn image(&mut self, reference: &str, opts: &[ImageOption]) -> llb::State {
    Builder::image(self, reference, opts)
  }

  fn git(&mut self, remote: &str, reference: &str, opts: &[GitOption]) -> llb::State {
    Builder::git(self, remote, reference, opts)
  }

  fn add_env(&mut self, st: &llb::State, key: &str, value: &str) -> llb::State {
    Builder::add_env(self, st, key, value)
  }

  fn dir(&mut self, st: &llb::State, dir: &str) -> llb::State {
    Builder::dir(self, st, dir)
  }

  fn get_dir(&mut self, st: &llb::State) -> Result<String, GraphError> {
    Builder::get_dir(self, st)
  }

  fn user(&mut self, st: &llb::State, user: &str) -> llb::State {
    Builder::user(self, st, user)
  }

  fn platform(&mut self, st: &llb::State, platform: &Platform) -> llb::State {
    Builder::platform(self, st, platform)
  }

  fn set_marshal_defaults(&mut self, st: &llb::State, constraints: &[Constraint]) -> llb::State {
    Builder::set_marshal_defaults(self, st, constraints)
  }

  fn run(&mut self, st: &llb::State, opts: &[RunOption]) -> llb::ExecState {
    Builder::run(self, st, opts)
  }

  fn exec_add_mount(
    &mut self,
    exec: &llb::ExecState,
    target: &str,
    source: &llb::State,
    opts: &[MountOption],
  ) -> llb::State {
    Builder::exec_add_mount(self, exec, target, source, opts)
  }

  fn exec_root(&mut self, exec: &llb::ExecState) -> llb::State {
    Builder::exec_root(self, exec)
  }

  fn file(&mut self, st: &llb::State, action: &llb::FileAction, constraints: &[Constraint]) -> llb::State {
    Builder::file(self, st, action, constraints)
  }

  fn mkdir(&mut self, prev: Option<&llb::FileAction>, path: &str, mode: u32, opts: &[MkdirOption]) -> llb::FileAction {
    Builder::mkdir(self, prev, path, mode, opts)
  }

  fn mkfile(
    &mut self,
    prev: Option<&llb::FileAction>,
    path: &str,
    mode: u32,
    data: &[u8],
    opts: &[MkfileOption],
  ) -> llb::FileAction {
    Builder::mkfile(self, prev, path, mode, data, opts)
  }

  fn rm(&mut self, prev: Option<&llb::FileAction>, path: &str, opts: &[RmOption]) -> llb::FileAction {
    Builder::rm(self, prev, path, opts)
  }

  fn copy(
    &mut self,
    prev: Option<&llb::FileAction>,
    source: &llb::State,
    src: &str,
    dest: &str,
    opts: &[CopyOption],
  ) -> llb::FileAction {
    Builder::copy(self, prev, source, src, dest, opts)
  }

  fn marshal(&mut self, st: &llb::State, constraints: &[Constraint]) -> Result<Definition, GraphError> {
    Builder::marshal(self, st, constraints)
  }
}
