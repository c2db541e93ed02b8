//! The graph builder: an arena of op vertices.
//!
//! A `Builder` is a single-owner value. Every operation that creates or
//! extends a vertex takes `&mut self`, and values it hands out ([`State`],
//! [`ExecState`]) are only meaningful to the builder that created them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use tracing::debug;

use super::error::GraphError;
use super::ops::{
  CacheOpt, Definition, ExecMeta, ExecOp, FileOp, FileOpAction, InputRef, Mount, MountType, Op, OpMetadata, OpRecord,
  SourceOp,
};
use super::options::{
  Constraint, CopyOption, GitOption, ImageOption, LocalOption, MkdirOption, MkfileOption, MountOption, NetMode,
  ResolveMode, RmOption, RunOption,
};
use super::state::{ExecState, FileAction, FileStep, Meta, Output, State, resolve_path, set_env};
use crate::consts::{CUSTOM_NAME_KEY, local_attrs, source_attrs};
use crate::platform::Platform;
use crate::util::hash::{Hashable, hash_bytes};

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

struct Vertex {
  op: Op,
  inputs: Vec<Output>,
  platform: Option<Platform>,
  metadata: OpMetadata,
  /// Reported by `marshal` for any state depending on this vertex.
  error: Option<String>,
}

impl Vertex {
  fn new(op: Op) -> Self {
    Self {
      op,
      inputs: Vec::new(),
      platform: None,
      metadata: OpMetadata::default(),
      error: None,
    }
  }
}

/// Arena of graph vertices.
pub struct Builder {
  id: u64,
  /// Edges point from a vertex to each of its inputs, weighted by input slot.
  graph: DiGraph<Vertex, u32>,
}

impl Default for Builder {
  fn default() -> Self {
    Self::new()
  }
}

impl Builder {
  pub fn new() -> Self {
    Self {
      id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
      graph: DiGraph::new(),
    }
  }

  /// Number of vertices created so far.
  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  fn owns(&self, output: &Output) -> bool {
    output.builder == self.id && output.vertex.index() < self.graph.node_count()
  }

  fn output(&self, vertex: NodeIndex, index: u32) -> Output {
    Output {
      builder: self.id,
      vertex,
      index,
    }
  }

  fn add_vertex(&mut self, mut vertex: Vertex) -> NodeIndex {
    let edges: Vec<(NodeIndex, u32)> = vertex
      .inputs
      .iter()
      .enumerate()
      .filter(|(_, input)| self.owns(input))
      .map(|(slot, input)| (input.vertex, slot as u32))
      .collect();

    if edges.len() != vertex.inputs.len() && vertex.error.is_none() {
      vertex.error = Some("input belongs to a different graph".to_string());
    }

    let idx = self.graph.add_node(vertex);
    for (target, slot) in edges {
      self.graph.add_edge(idx, target, slot);
    }
    idx
  }

  fn add_source(&mut self, source: SourceOp, platform: Option<Platform>, metadata: OpMetadata, error: Option<String>) -> State {
    let mut vertex = Vertex::new(Op::Source(source));
    vertex.platform = platform.clone();
    vertex.metadata = metadata;
    vertex.error = error;
    let idx = self.add_vertex(vertex);

    State {
      output: Some(self.output(idx, 0)),
      meta: Meta {
        platform,
        ..Meta::default()
      },
    }
  }

  /// The empty filesystem.
  pub fn scratch(&mut self) -> State {
    State::default()
  }

  /// A directory transferred from the client, identified by `name`.
  pub fn local(&mut self, name: &str, opts: &[LocalOption]) -> State {
    let mut attrs = BTreeMap::new();
    let mut metadata = OpMetadata::default();

    for opt in opts {
      match opt {
        LocalOption::IncludePatterns(patterns) => set_list_attr(&mut attrs, local_attrs::INCLUDE_PATTERNS, patterns),
        LocalOption::ExcludePatterns(patterns) => set_list_attr(&mut attrs, local_attrs::EXCLUDE_PATTERNS, patterns),
        LocalOption::FollowPaths(paths) => set_list_attr(&mut attrs, local_attrs::FOLLOW_PATHS, paths),
        LocalOption::SharedKeyHint(key) => {
          attrs.insert(local_attrs::SHARED_KEY_HINT.to_string(), key.clone());
        }
        LocalOption::SessionId(id) => {
          attrs.insert(local_attrs::SESSION.to_string(), id.clone());
        }
        LocalOption::CustomName(custom) => {
          metadata.description.insert(CUSTOM_NAME_KEY.to_string(), custom.clone());
        }
      }
    }

    let error = name.is_empty().then(|| "local source name is required".to_string());
    let source = SourceOp {
      identifier: format!("local://{}", name),
      attrs,
    };
    self.add_source(source, None, metadata, error)
  }

  /// A container image, e.g. `alpine` or `ghcr.io/org/tool:1.2@sha256:...`.
  pub fn image(&mut self, reference: &str, opts: &[ImageOption]) -> State {
    let mut attrs = BTreeMap::new();
    let mut metadata = OpMetadata::default();
    let mut platform = None;

    for opt in opts {
      match opt {
        ImageOption::Platform(p) => platform = Some(p.clone()),
        ImageOption::ResolveMode(mode) => {
          if *mode == ResolveMode::Default {
            attrs.remove(source_attrs::IMAGE_RESOLVE_MODE);
          } else {
            attrs.insert(source_attrs::IMAGE_RESOLVE_MODE.to_string(), mode.as_str().to_string());
          }
        }
        ImageOption::CustomName(custom) => {
          metadata.description.insert(CUSTOM_NAME_KEY.to_string(), custom.clone());
        }
      }
    }

    let (identifier, error) = match normalize_image_ref(reference) {
      Ok(normalized) => (format!("docker-image://{}", normalized), None),
      Err(message) => (format!("docker-image://{}", reference), Some(message)),
    };
    self.add_source(SourceOp { identifier, attrs }, platform, metadata, error)
  }

  /// A git checkout of `reference` (branch, tag or commit) from `remote`.
  pub fn git(&mut self, remote: &str, reference: &str, opts: &[GitOption]) -> State {
    let mut attrs = BTreeMap::new();
    let mut metadata = OpMetadata::default();
    attrs.insert(source_attrs::GIT_FULL_URL.to_string(), remote.to_string());

    for opt in opts {
      match opt {
        GitOption::KeepGitDir => {
          attrs.insert(source_attrs::GIT_KEEP_DIR.to_string(), "true".to_string());
        }
        GitOption::AuthTokenSecret(secret) => {
          attrs.insert(source_attrs::GIT_AUTH_TOKEN_SECRET.to_string(), secret.clone());
        }
        GitOption::KnownSshHosts(hosts) => {
          attrs.insert(source_attrs::GIT_KNOWN_SSH_HOSTS.to_string(), hosts.clone());
        }
        GitOption::CustomName(custom) => {
          metadata.description.insert(CUSTOM_NAME_KEY.to_string(), custom.clone());
        }
      }
    }

    let mut identifier = format!("git://{}", strip_git_scheme(remote));
    if !reference.is_empty() {
      identifier.push('#');
      identifier.push_str(reference);
    }
    let error = remote.trim().is_empty().then(|| "git remote is required".to_string());
    self.add_source(SourceOp { identifier, attrs }, None, metadata, error)
  }

  pub fn add_env(&mut self, st: &State, key: &str, value: &str) -> State {
    let mut next = st.clone();
    next.meta.set_env(key, value);
    next
  }

  /// Set the working directory; relative paths join onto the current one.
  pub fn dir(&mut self, st: &State, dir: &str) -> State {
    let mut next = st.clone();
    next.meta.dir = Some(resolve_path(st.dir_or_default(), dir));
    next
  }

  pub fn get_dir(&mut self, st: &State) -> Result<String, GraphError> {
    if let Some(output) = &st.output
      && !self.owns(output)
    {
      return Err(GraphError::UnknownNode);
    }

    let dir = st.dir_or_default();
    if dir.contains('\0') {
      return Err(GraphError::InvalidPath {
        path: dir.to_string(),
        message: "contains a NUL byte".to_string(),
      });
    }
    Ok(dir.to_string())
  }

  pub fn user(&mut self, st: &State, user: &str) -> State {
    let mut next = st.clone();
    next.meta.user = Some(user.to_string());
    next
  }

  pub fn platform(&mut self, st: &State, platform: &Platform) -> State {
    let mut next = st.clone();
    next.meta.platform = Some(platform.clone());
    next
  }

  /// Constraints used by `marshal` when it is not given more specific ones.
  pub fn set_marshal_defaults(&mut self, st: &State, constraints: &[Constraint]) -> State {
    let mut next = st.clone();
    next.meta.defaults.extend(constraints.iter().cloned());
    next
  }

  /// Run a process on top of `st`, mounted read-write at `/`.
  pub fn run(&mut self, st: &State, opts: &[RunOption]) -> ExecState {
    let mut meta = ExecMeta {
      args: Vec::new(),
      env: Vec::new(),
      cwd: st.dir_or_default().to_string(),
      user: st.meta.user.clone().unwrap_or_default(),
    };
    let mut env = st.meta.env.clone();
    let mut inputs = Vec::new();
    let mut mounts = Vec::new();
    let mut network = NetMode::default();
    let mut metadata = OpMetadata::default();

    attach_mount(&mut inputs, &mut mounts, "/", st, &[]);

    for opt in opts {
      match opt {
        RunOption::Args(args) => meta.args = args.clone(),
        RunOption::Shell(cmd) => meta.args = vec!["/bin/sh".to_string(), "-c".to_string(), cmd.clone()],
        RunOption::AddEnv(key, value) => set_env(&mut env, key, value),
        RunOption::Dir(dir) => meta.cwd = resolve_path(&meta.cwd, dir),
        RunOption::User(user) => meta.user = user.clone(),
        RunOption::Mount(request) => {
          attach_mount(&mut inputs, &mut mounts, &request.dest, &request.source, &request.options);
        }
        RunOption::Network(mode) => network = *mode,
        RunOption::IgnoreCache => metadata.ignore_cache = true,
        RunOption::CustomName(custom) => {
          metadata.description.insert(CUSTOM_NAME_KEY.to_string(), custom.clone());
        }
      }
    }

    meta.env = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    let error = meta.args.is_empty().then(|| "arguments are required".to_string());

    let mut vertex = Vertex::new(Op::Exec(ExecOp { meta, mounts, network }));
    vertex.inputs = inputs;
    vertex.platform = st.meta.platform.clone();
    vertex.metadata = metadata;
    vertex.error = error;
    let idx = self.add_vertex(vertex);

    ExecState {
      builder: self.id,
      vertex: idx,
      base: st.clone(),
    }
  }

  /// Mount `source` at `target` in a pending exec and return the mount's result.
  ///
  /// Read-only, cache and tmpfs mounts produce no output; the returned state is
  /// then scratch.
  pub fn exec_add_mount(&mut self, exec: &ExecState, target: &str, source: &State, opts: &[MountOption]) -> State {
    if exec.builder != self.id || exec.vertex.index() >= self.graph.node_count() {
      // Left for marshal to reject as an unknown node.
      return source.with_output(Some(Output {
        builder: exec.builder,
        vertex: exec.vertex,
        index: 0,
      }));
    }

    let source_owned = source.output.is_none_or(|o| self.owns(&o));
    let before = self.graph[exec.vertex].inputs.len();

    let Vertex { op, inputs, error, .. } = &mut self.graph[exec.vertex];
    let Op::Exec(exec_op) = op else {
      return source.with_output(None);
    };
    let output = attach_mount(inputs, &mut exec_op.mounts, target, source, opts);
    let added = inputs.len() > before;

    if added {
      if source_owned {
        let input = inputs[before];
        self.graph.add_edge(exec.vertex, input.vertex, before as u32);
      } else if error.is_none() {
        *error = Some("input belongs to a different graph".to_string());
      }
    }

    source.with_output(output.map(|index| self.output(exec.vertex, index)))
  }

  /// The root filesystem after the exec has run.
  pub fn exec_root(&mut self, exec: &ExecState) -> State {
    exec.base.with_output(Some(Output {
      builder: exec.builder,
      vertex: exec.vertex,
      index: 0,
    }))
  }

  /// Apply a chain of filesystem edits to `st`.
  ///
  /// Relative paths resolve against the working directory of `st`, and copy
  /// sources against the working directory of the state they are read from.
  pub fn file(&mut self, st: &State, action: &FileAction, constraints: &[Constraint]) -> State {
    let base_dir = st.dir_or_default().to_string();
    let mut inputs = Vec::new();
    let base = st.output.map(|o| {
      inputs.push(o);
      0u32
    });

    let mut actions = Vec::with_capacity(action.steps.len());
    for step in &action.steps {
      actions.push(match step {
        FileStep::Mkdir { path, mode, options } => FileOpAction::Mkdir {
          path: resolve_path(&base_dir, path),
          mode: *mode,
          make_parents: options.contains(&MkdirOption::MakeParents),
          owner: options
            .iter()
            .filter_map(|o| match o {
              MkdirOption::Chown(owner) => Some(*owner),
              MkdirOption::MakeParents => None,
            })
            .last(),
        },
        FileStep::Mkfile {
          path,
          mode,
          data,
          options,
        } => FileOpAction::Mkfile {
          path: resolve_path(&base_dir, path),
          mode: *mode,
          data: data.clone(),
          owner: options
            .iter()
            .map(|o| match o {
              MkfileOption::Chown(owner) => *owner,
            })
            .last(),
        },
        FileStep::Rm { path, options } => FileOpAction::Rm {
          path: resolve_path(&base_dir, path),
          allow_not_found: options.contains(&RmOption::AllowNotFound),
          allow_wildcard: options.contains(&RmOption::AllowWildcard),
        },
        FileStep::Copy {
          source,
          src,
          dest,
          options,
        } => {
          let source_idx = source.output.map(|o| {
            inputs.push(o);
            (inputs.len() - 1) as u32
          });
          let mut resolved_dest = resolve_path(&base_dir, dest);
          if dest.ends_with('/') && !resolved_dest.ends_with('/') {
            resolved_dest.push('/');
          }
          copy_action(source_idx, resolve_path(source.dir_or_default(), src), resolved_dest, options)
        }
      });
    }

    let (platform, metadata) = apply_constraints(st.meta.platform.clone(), constraints);
    let mut vertex = Vertex::new(Op::File(FileOp { base, actions }));
    vertex.inputs = inputs;
    vertex.platform = platform;
    vertex.metadata = metadata;
    let idx = self.add_vertex(vertex);

    st.with_output(Some(self.output(idx, 0)))
  }

  /// Start or extend a file action chain with a directory creation.
  pub fn mkdir(&mut self, prev: Option<&FileAction>, path: &str, mode: u32, opts: &[MkdirOption]) -> FileAction {
    FileAction::then(
      prev,
      FileStep::Mkdir {
        path: path.to_string(),
        mode,
        options: opts.to_vec(),
      },
    )
  }

  pub fn mkfile(
    &mut self,
    prev: Option<&FileAction>,
    path: &str,
    mode: u32,
    data: &[u8],
    opts: &[MkfileOption],
  ) -> FileAction {
    FileAction::then(
      prev,
      FileStep::Mkfile {
        path: path.to_string(),
        mode,
        data: data.to_vec(),
        options: opts.to_vec(),
      },
    )
  }

  pub fn rm(&mut self, prev: Option<&FileAction>, path: &str, opts: &[RmOption]) -> FileAction {
    FileAction::then(
      prev,
      FileStep::Rm {
        path: path.to_string(),
        options: opts.to_vec(),
      },
    )
  }

  pub fn copy(
    &mut self,
    prev: Option<&FileAction>,
    source: &State,
    src: &str,
    dest: &str,
    opts: &[CopyOption],
  ) -> FileAction {
    FileAction::then(
      prev,
      FileStep::Copy {
        source: source.clone(),
        src: src.to_string(),
        dest: dest.to_string(),
        options: opts.to_vec(),
      },
    )
  }

  /// Serialize everything `st` depends on into a [`Definition`].
  ///
  /// Vertices are visited dependency-first; content-identical ops collapse to
  /// a single record. The first recorded error among the visited vertices is
  /// returned instead of a definition.
  pub fn marshal(&mut self, st: &State, constraints: &[Constraint]) -> Result<Definition, GraphError> {
    let Some(output) = st.output else {
      return Ok(Definition::default());
    };
    if !self.owns(&output) {
      return Err(GraphError::UnknownNode);
    }

    let mut all_constraints = st.meta.defaults.clone();
    all_constraints.extend(constraints.iter().cloned());
    let (default_platform, shared_metadata) = apply_constraints(None, &all_constraints);
    let default_platform = default_platform.or_else(Platform::current);

    let mut digests = HashMap::new();
    let mut seen = HashSet::new();
    let mut definition = Definition::default();

    let mut dfs = DfsPostOrder::new(&self.graph, output.vertex);
    while let Some(idx) = dfs.next(&self.graph) {
      let vertex = &self.graph[idx];
      if let Some(message) = &vertex.error {
        return Err(GraphError::InvalidOp {
          kind: vertex.op.kind(),
          message: message.clone(),
        });
      }

      let mut inputs = Vec::with_capacity(vertex.inputs.len());
      for input in &vertex.inputs {
        let digest = digests.get(&input.vertex).cloned().ok_or(GraphError::UnknownNode)?;
        inputs.push(InputRef {
          digest,
          index: input.index,
        });
      }

      let record = OpRecord {
        inputs,
        op: Some(vertex.op.clone()),
        platform: vertex.platform.clone().or_else(|| default_platform.clone()),
      };
      let bytes = record.canonical_bytes()?;
      let digest = hash_bytes(&bytes);

      let metadata = definition.metadata.entry(digest.clone()).or_default();
      metadata.merge(&vertex.metadata);
      metadata.merge(&shared_metadata);

      if seen.insert(digest.clone()) {
        definition.def.push(bytes);
      }
      digests.insert(idx, digest);
    }

    let head = digests.get(&output.vertex).cloned().ok_or(GraphError::UnknownNode)?;
    let terminal = OpRecord {
      inputs: vec![InputRef {
        digest: head,
        index: output.index,
      }],
      op: None,
      platform: None,
    };
    definition.def.push(terminal.canonical_bytes()?);

    debug!(ops = definition.def.len(), "marshaled definition");
    Ok(definition)
  }
}

fn set_list_attr(attrs: &mut BTreeMap<String, String>, key: &str, values: &[String]) {
  if values.is_empty() {
    attrs.remove(key);
  } else {
    attrs.insert(key.to_string(), serde_json::Value::from(values.to_vec()).to_string());
  }
}

/// Append a mount, returning the output slot it produces.
fn attach_mount(
  inputs: &mut Vec<Output>,
  mounts: &mut Vec<Mount>,
  dest: &str,
  source: &State,
  options: &[MountOption],
) -> Option<u32> {
  let mut readonly = false;
  let mut selector = None;
  let mut mount_type = MountType::Bind;
  let mut cache = None;

  for opt in options {
    match opt {
      MountOption::Readonly => readonly = true,
      MountOption::SourcePath(path) => selector = Some(path.clone()),
      MountOption::Cache { id, sharing } => {
        mount_type = MountType::Cache;
        cache = Some(CacheOpt {
          id: id.clone(),
          sharing: *sharing,
        });
      }
      MountOption::Tmpfs => mount_type = MountType::Tmpfs,
    }
  }

  let input = match (mount_type, source.output) {
    (MountType::Bind, Some(output)) => {
      inputs.push(output);
      Some((inputs.len() - 1) as u32)
    }
    _ => None,
  };

  let output = if readonly || mount_type != MountType::Bind {
    None
  } else {
    Some(mounts.iter().filter(|m| m.output.is_some()).count() as u32)
  };

  mounts.push(Mount {
    input,
    dest: resolve_path("/", dest),
    output,
    readonly,
    selector,
    mount_type,
    cache,
  });
  output
}

fn copy_action(source: Option<u32>, src: String, dest: String, options: &[CopyOption]) -> FileOpAction {
  let mut create_dest_path = false;
  let mut allow_wildcard = false;
  let mut follow_symlinks = false;
  let mut mode = None;
  let mut owner = None;
  let mut include_patterns = Vec::new();
  let mut exclude_patterns = Vec::new();

  for opt in options {
    match opt {
      CopyOption::CreateDestPath => create_dest_path = true,
      CopyOption::AllowWildcard => allow_wildcard = true,
      CopyOption::FollowSymlinks => follow_symlinks = true,
      CopyOption::Mode(m) => mode = Some(*m),
      CopyOption::Chown(o) => owner = Some(*o),
      CopyOption::IncludePatterns(p) => include_patterns = p.clone(),
      CopyOption::ExcludePatterns(p) => exclude_patterns = p.clone(),
    }
  }

  FileOpAction::Copy {
    source,
    src,
    dest,
    create_dest_path,
    allow_wildcard,
    follow_symlinks,
    mode,
    owner,
    include_patterns,
    exclude_patterns,
  }
}

fn apply_constraints(mut platform: Option<Platform>, constraints: &[Constraint]) -> (Option<Platform>, OpMetadata) {
  let mut metadata = OpMetadata::default();
  for constraint in constraints {
    match constraint {
      Constraint::Platform(p) => platform = Some(p.clone()),
      Constraint::IgnoreCache => metadata.ignore_cache = true,
      Constraint::CustomName(custom) => {
        metadata.description.insert(CUSTOM_NAME_KEY.to_string(), custom.clone());
      }
      Constraint::Description(key, value) => {
        metadata.description.insert(key.clone(), value.clone());
      }
    }
  }
  (platform, metadata)
}

fn strip_git_scheme(remote: &str) -> String {
  for scheme in ["https://", "http://", "ssh://", "git://"] {
    if let Some(rest) = remote.strip_prefix(scheme) {
      return rest.trim_start_matches("git@").to_string();
    }
  }
  // scp-like `git@host:org/repo`
  if let Some(rest) = remote.strip_prefix("git@") {
    return rest.replacen(':', "/", 1);
  }
  remote.to_string()
}

/// Expand short image names to fully qualified references.
///
/// `alpine` becomes `docker.io/library/alpine:latest`; references with a
/// registry, tag or digest keep them.
fn normalize_image_ref(reference: &str) -> Result<String, String> {
  if reference.is_empty() {
    return Err("image reference is empty".to_string());
  }
  if reference.chars().any(char::is_whitespace) {
    return Err(format!("image reference {:?} contains whitespace", reference));
  }

  let (name, digest) = match reference.split_once('@') {
    Some((name, digest)) => (name, Some(digest)),
    None => (reference, None),
  };
  let last_slash = name.rfind('/').map_or(0, |i| i + 1);
  let (repo, tag) = match name[last_slash..].rfind(':') {
    Some(i) => (&name[..last_slash + i], Some(&name[last_slash + i + 1..])),
    None => (name, None),
  };

  if repo.is_empty() || tag == Some("") || digest == Some("") {
    return Err(format!("invalid image reference {:?}", reference));
  }

  let (domain, path) = match repo.split_once('/') {
    Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
      (first.to_string(), rest.to_string())
    }
    Some(_) => ("docker.io".to_string(), repo.to_string()),
    None => ("docker.io".to_string(), format!("library/{}", repo)),
  };

  if path.chars().any(|c| c.is_ascii_uppercase()) {
    return Err(format!("repository name {:?} must be lowercase", path));
  }

  let mut normalized = format!("{}/{}", domain, path);
  match (tag, digest) {
    (Some(tag), _) => {
      normalized.push(':');
      normalized.push_str(tag);
    }
    (None, None) => normalized.push_str(":latest"),
    (None, Some(_)) => {}
  }
  if let Some(digest) = digest {
    normalized.push('@');
    normalized.push_str(digest);
  }
  Ok(normalized)
}
