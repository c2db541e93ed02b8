//! pllb-lib: a thread-safe build-graph facade
//!
//! This crate provides:
//! - `llb`: the build-graph builder, its immutable node values and the
//!   content-addressed definition it marshals to
//! - `facade`: a lock-guarded wrapper that lets many threads build one graph
//! - `include`: deduplication of local sources filtered to include patterns
//! - `platform`: target platform descriptions and filesystem identity probes

pub mod config;
pub mod consts;
pub mod facade;
pub mod include;
pub mod llb;
pub mod platform;
pub mod util;
