//! Shared utilities.
//!
//! Digest helpers used by the graph library and the include cache.

pub mod hash;
