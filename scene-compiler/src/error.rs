//! Error types shared across the compiler.
//!
//! Only [`ManifestError`] is fatal. Everything that goes wrong inside a single
//! manifest entry is an [`EntryError`], which the compiler records and skips.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::colors::ColorError;
use crate::reference::ReferenceError;
use crate::table::TableError;

/// Top-level manifest failures. These abort a run before any entry is processed.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Manifest is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Manifest field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Dependency cycle between entries: {0}")]
    DependencyCycle(String),
}

/// Failure of a single manifest entry. The run continues with the next entry.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("invalid entry: {0}")]
    Invalid(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Color(#[from] ColorError),

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to write CSV {path}: {source}")]
    CsvWrite { path: PathBuf, source: csv::Error },

    #[error("failed to render artifact: {0}")]
    Render(#[from] fmt::Error),
}

impl EntryError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        EntryError::Invalid(reason.into())
    }

    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EntryError::Write {
            path: path.into(),
            source,
        }
    }
}
