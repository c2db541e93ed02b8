use std::sync::Barrier;
use std::thread;

use pllb_lib::config::GraphConfig;
use pllb_lib::consts::local_attrs;
use pllb_lib::include::shared_key_hint;
use pllb_lib::llb::{LocalOption, Op};

use super::common::instrumented_graph;

#[test]
fn concurrent_requests_build_one_filtered_local() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let ctx = graph.local("ctx", vec![]);
  let barrier = Barrier::new(2);
  let (ctx, barrier) = (&ctx, &barrier);

  let results: Vec<_> = thread::scope(|s| {
    let handles: Vec<_> = (0..2)
      .map(|_| {
        s.spawn(move || {
          barrier.wait();
          ctx.with_include(&["."])
        })
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(results[0], results[1]);
  assert_eq!(stats.filtered_locals(), 1);
  assert_eq!(stats.overlaps(), 0);
  assert_eq!(graph.cached_includes(), 1);

  let source = results[0].local_source().unwrap();
  assert_eq!(source.include_patterns(), Some(&["./*".to_string()][..]));
  assert_eq!(source.shared_key_hint(), Some(shared_key_hint("ctx", &["./*"]).as_str()));
}

#[test]
fn key_is_recorded_on_the_source_op() {
  let (graph, _) = instrumented_graph(GraphConfig::default());
  let filtered = graph.local("ctx", vec![]).with_include(&["src/."]);
  let key = filtered.local_source().unwrap().shared_key_hint().unwrap().to_string();

  let records = filtered.marshal(&[]).unwrap().records().unwrap();
  let attrs = records
    .iter()
    .find_map(|record| match &record.op {
      Some(Op::Source(source)) if source.identifier == "local://ctx" => Some(source.attrs.clone()),
      _ => None,
    })
    .unwrap();

  assert_eq!(attrs[local_attrs::SHARED_KEY_HINT], key);
  assert_eq!(attrs[local_attrs::INCLUDE_PATTERNS], r#"["src/*"]"#);
}

#[test]
fn base_options_are_kept() {
  let (graph, _) = instrumented_graph(GraphConfig::default());
  let ctx = graph.local(
    "ctx",
    vec![LocalOption::ExcludePatterns(vec!["target".to_string()])],
  );
  let filtered = ctx.with_include(&["src"]);
  let source = filtered.local_source().unwrap();

  assert_eq!(source.name(), "ctx");
  assert!(
    source
      .options()
      .contains(&LocalOption::ExcludePatterns(vec!["target".to_string()]))
  );
  assert_eq!(ctx.local_source().unwrap().include_patterns(), None);
}

#[test]
fn differing_patterns_are_cached_separately() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let ctx = graph.local("ctx", vec![]);

  let src = ctx.with_include(&["src"]);
  let docs = ctx.with_include(&["docs"]);
  let src_again = ctx.with_include(&["src"]);

  assert_ne!(src, docs);
  assert_eq!(src, src_again);
  assert_eq!(stats.filtered_locals(), 2);
  assert_eq!(graph.cached_includes(), 2);
}

#[test]
fn pattern_order_matters() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let ctx = graph.local("ctx", vec![]);

  let ab = ctx.with_include(&["a", "b"]);
  let ba = ctx.with_include(&["b", "a"]);

  assert_ne!(ab, ba);
  assert_eq!(stats.filtered_locals(), 2);
}

#[test]
fn non_local_states_pass_through() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let image = graph.image("alpine", &[]);
  let repo = graph.git("https://github.com/org/repo.git", "main", &[]);
  let derived = graph.local("ctx", vec![]).dir("/x");

  assert_eq!(image.with_include(&["."]), image);
  assert_eq!(repo.with_include(&["."]), repo);
  assert_eq!(derived.with_include(&["."]), derived);
  assert_eq!(stats.filtered_locals(), 0);
  assert_eq!(graph.cached_includes(), 0);
}

#[test]
fn disabled_cache_builds_every_request() {
  let (graph, stats) = instrumented_graph(GraphConfig::default().with_include_cache(false));
  let ctx = graph.local("ctx", vec![]);

  let first = ctx.with_include(&["."]);
  let second = ctx.with_include(&["."]);

  assert_ne!(first, second);
  assert_eq!(
    first.local_source().unwrap().shared_key_hint(),
    second.local_source().unwrap().shared_key_hint()
  );
  assert_eq!(stats.filtered_locals(), 2);
  assert_eq!(graph.cached_includes(), 0);
}

#[test]
fn clearing_the_cache_rebuilds_on_next_request() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let ctx = graph.local("ctx", vec![]);

  let first = ctx.with_include(&["."]);
  graph.clear_include_cache();
  assert_eq!(graph.cached_includes(), 0);

  let second = ctx.with_include(&["."]);
  assert_ne!(first, second);
  assert_eq!(stats.filtered_locals(), 2);
  assert_eq!(graph.cached_includes(), 1);

  // States handed out before the clear stay usable.
  assert!(first.marshal(&[]).is_ok());
}

#[test]
fn filtered_states_are_not_filtered_again() {
  let (graph, stats) = instrumented_graph(GraphConfig::default());
  let narrowed = graph.local("ctx", vec![]).with_include(&["src"]);
  let again = narrowed.with_include(&["docs"]);

  assert_eq!(again, narrowed);
  assert_eq!(stats.filtered_locals(), 1);
  assert_eq!(graph.cached_includes(), 1);

  let source = again.local_source().unwrap();
  assert!(source.is_filtered());
  assert_eq!(source.name(), "ctx");
  assert_eq!(source.include_patterns(), Some(&["src".to_string()][..]));

  let records = again.marshal(&[]).unwrap().records().unwrap();
  let includes = records
    .iter()
    .find_map(|record| match &record.op {
      Some(Op::Source(source)) => source.attrs.get(local_attrs::INCLUDE_PATTERNS).cloned(),
      _ => None,
    })
    .unwrap();
  assert_eq!(includes, r#"["src"]"#);
}
