use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pllb_lib::config::GraphConfig;
use pllb_lib::facade::{self, CopyInput, Graph};
use pllb_lib::llb::{Builder, CopyOption, GraphError, MkdirOption, MountOption, RunOption};
use pllb_lib::platform::Platform;

use super::common::instrumented_graph;

#[test]
fn concurrent_callers_never_overlap() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let workers = 8;
  let barrier = Barrier::new(workers);

  thread::scope(|s| {
    for worker in 0..workers {
      let graph = &graph;
      let barrier = &barrier;
      s.spawn(move || {
        barrier.wait();
        let base = graph.image("alpine", &[]);
        for i in 0..10 {
          let st = base
            .add_env("WORKER", &worker.to_string())
            .dir(&format!("/work/{}", i))
            .user("builder");
          let root = st.run(&[RunOption::Shell("make".to_string())]).root();
          root.marshal(&[]).unwrap();
        }
      });
    }
  });

  assert_eq!(stats.overlaps(), 0);
  assert!(stats.calls() >= workers * 10 * 6);
  assert_eq!(stats.count("marshal"), workers * 10);
}

#[test]
fn shared_state_is_never_mutated() {
  let (graph, _) = instrumented_graph(GraphConfig::default());
  let base = graph.image("alpine", &[]).dir("/src");
  let before = base.marshal(&[]).unwrap();

  thread::scope(|s| {
    for worker in 0..4 {
      let base = &base;
      s.spawn(move || {
        let derived = base.add_env("N", &worker.to_string()).dir("sub");
        assert_eq!(derived.get_dir().unwrap(), "/src/sub");
        assert_ne!(&derived, base);
      });
    }
  });

  assert_eq!(base.get_dir().unwrap(), "/src");
  assert_eq!(base.marshal(&[]).unwrap(), before);
}

#[test]
fn run_inherits_state_meta() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let base = graph.image("alpine", &[]).add_env("PATH", "/bin").add_env("CC", "clang");
  let root = base
    .add_env("PATH", "/usr/bin")
    .run(&[RunOption::Shell("make".to_string())])
    .root();

  let raw = root.raw_state();
  assert_eq!(
    raw.env(),
    &[
      ("PATH".to_string(), "/usr/bin".to_string()),
      ("CC".to_string(), "clang".to_string()),
    ]
  );
  assert_eq!(raw.get_env("CC"), Some("clang"));
  raw.release();

  assert_eq!(base.raw_state().get_env("PATH"), Some("/bin"));
}

#[test]
fn marshal_is_stable_across_threads() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let st = graph
    .image("alpine", &[])
    .platform(&Platform::new("linux", "amd64"))
    .run(&[RunOption::Args(vec!["true".to_string()])])
    .root();

  let st = &st;
  let defs: Vec<_> = thread::scope(|s| {
    let handles: Vec<_> = (0..4).map(|_| s.spawn(move || st.marshal(&[]).unwrap())).collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert!(defs.windows(2).all(|pair| pair[0] == pair[1]));
  assert!(!defs[0].is_empty());
}

#[test]
fn raw_state_holds_the_lock_until_released() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let st = graph.image("alpine", &[]);
  let done = AtomicBool::new(false);

  thread::scope(|s| {
    let guard = st.raw_state();
    assert!(guard.output().is_some());

    let waiter = s.spawn(|| {
      graph.scratch();
      done.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst));

    guard.release();
    waiter.join().unwrap();
  });

  assert!(done.load(Ordering::SeqCst));
}

#[test]
fn raw_state_round_trips_through_from_raw_state() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let st = graph.image("alpine", &[]).dir("/app");

  let raw = st.raw_state().state().clone();
  let wrapped = graph.from_raw_state(raw);

  assert_eq!(wrapped, st);
  assert_eq!(wrapped.get_dir().unwrap(), "/app");
}

#[test]
fn copy_accepts_wrapped_and_raw_inputs() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let ctx = graph.local("ctx", vec![]);
  let raw = ctx.unwrap_unlocked().clone();

  let from_wrapped = graph.copy(&ctx, "src", "/app", &[CopyOption::CreateDestPath]);
  let from_raw = graph.copy(&raw, "src", "/app", &[CopyOption::CreateDestPath]);
  assert_eq!(from_wrapped.steps(), from_raw.steps());

  let st = graph
    .scratch()
    .file(&graph.mkdir("/app", 0o755, &[MkdirOption::MakeParents]).copy(&ctx, "src", "/app", &[]), &[]);
  assert!(st.marshal(&[]).is_ok());
}

#[test]
fn mounts_from_add_mount_appear_in_exec() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let ctx = graph.local("ctx", vec![]);
  let exec = graph.image("alpine", &[]).run(&[
    RunOption::Args(vec!["ls".to_string()]),
    graph.add_mount("/src", &ctx, vec![MountOption::Readonly]),
  ]);

  let cache = exec.add_mount("/out", &graph.scratch(), &[]);
  assert_eq!(cache.output().unwrap().index(), 1);

  let records = exec.root().marshal(&[]).unwrap().records().unwrap();
  // image, local, exec, terminal
  assert_eq!(records.len(), 4);
}

#[test]
fn foreign_states_are_rejected_at_marshal() {
  let graph = Graph::new(Builder::new(), GraphConfig::default());
  let other = Graph::new(Builder::new(), GraphConfig::default());
  let foreign = other.image("alpine", &[]);

  let st = graph.image("alpine", &[]).run(&[
    RunOption::Args(vec!["true".to_string()]),
    graph.add_mount("/x", &foreign, vec![]),
  ]);
  assert!(matches!(st.root().marshal(&[]), Err(GraphError::InvalidOp { kind: "exec", .. })));
}

#[test]
fn global_graph_is_shared() {
  let a = facade::image("alpine", &[]);
  let b = facade::from_raw_state(a.unwrap_unlocked().clone());

  assert!(Arc::ptr_eq(a.graph(), facade::global()));
  assert_eq!(a, b);

  let st = facade::scratch().file(&facade::mkfile("/hello", 0o644, b"hi", &[]).rm("/tmp", &[]), &[]);
  assert!(!st.marshal(&[]).unwrap().is_empty());
}
