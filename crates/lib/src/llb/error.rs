use thiserror::Error;

/// Errors reported by the graph library.
///
/// Invalid ops are recorded when they are built and only reported when a
/// state depending on them is marshaled.
#[derive(Debug, Error)]
pub enum GraphError {
  /// An op was built from arguments the graph cannot represent.
  #[error("invalid {kind} op: {message}")]
  InvalidOp { kind: &'static str, message: String },

  /// A state refers to a node this builder never created.
  #[error("state refers to a node that does not belong to this graph")]
  UnknownNode,

  /// A working directory or file path is not usable.
  #[error("invalid path {path:?}: {message}")]
  InvalidPath { path: String, message: String },

  /// An op could not be serialized.
  #[error("failed to serialize op: {0}")]
  Serialize(#[from] serde_json::Error),
}
