//! Compiles tabular biological datasets into scene assets for a 3-D
//! visualization host.
//!
//! A JSON manifest lists source tables. Each entry is anchored, transformed,
//! colored and written as a set of data files plus a Lua descriptor. Entries
//! that fail are skipped and reported in the [`RunSummary`].

pub mod bounds;
pub mod cache;
pub mod colors;
pub mod compiler;
pub mod config;
pub mod coordinates;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod reference;
pub mod summary;
pub mod table;
pub mod writer;

pub use cache::CacheInvalidator;
pub use compiler::{CompileError, SceneCompiler};
pub use config::CompilerConfig;
pub use error::{EntryError, ManifestError};
pub use manifest::Manifest;
pub use summary::{RunStage, RunSummary};
