//! Build-graph description library.
//!
//! A [`Builder`] owns an arena of ops (sources, process executions, file
//! edits). Values it returns, such as [`State`], are cheap immutable handles
//! into that arena. [`Builder::marshal`] turns the sub-graph behind a state
//! into a [`Definition`]: a digest-linked list of encoded ops that an
//! execution engine can run.
//!
//! The builder is single-owner: extending the graph requires `&mut Builder`.
//! Sharing one builder between threads is the job of [`crate::facade`].
//!
//! # Example
//!
//! ```
//! use pllb_lib::llb::{Builder, RunOption};
//!
//! let mut b = Builder::new();
//! let base = b.image("alpine", &[]);
//! let base = b.dir(&base, "/work");
//! let exec = b.run(&base, &[RunOption::Shell("echo hi > out".to_string())]);
//! let root = b.exec_root(&exec);
//!
//! let def = b.marshal(&root, &[]).unwrap();
//! assert_eq!(def.records().unwrap().len(), 3);
//! ```

mod builder;
mod error;
pub mod ops;
pub mod options;
mod state;

pub use builder::Builder;
pub use error::GraphError;
pub use ops::{Definition, Op, OpMetadata, OpRecord};
pub use options::*;
pub use state::{ExecState, FileAction, FileStep, Output, State};
