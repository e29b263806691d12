//! Run configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("manifest {0} does not exist")]
    MissingManifest(PathBuf),

    #[error("texture directory {0} does not exist")]
    MissingTextureDir(PathBuf),

    #[error("failed to create output directory {path}: {source}")]
    OutputDir { path: PathBuf, source: io::Error },
}

/// Everything one compiler run needs besides the manifest contents.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub manifest_path: PathBuf,
    /// Artifacts are written here, created if missing.
    pub output_dir: PathBuf,
    /// Host cache directory cleared for every written file.
    pub cache_dir: Option<PathBuf>,
    /// Source of `default_texture` files.
    pub texture_dir: Option<PathBuf>,
    /// When set, artifacts and textures are copied here after the run.
    pub asset_dir: Option<PathBuf>,
    pub show_progress: bool,
}

impl CompilerConfig {
    pub fn new(manifest_path: &Path, output_dir: &Path) -> Self {
        Self {
            manifest_path: manifest_path.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            cache_dir: None,
            texture_dir: None,
            asset_dir: None,
            show_progress: false,
        }
    }

    pub fn with_cache_dir(mut self, dir: &Path) -> Self {
        self.cache_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_texture_dir(mut self, dir: &Path) -> Self {
        self.texture_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_asset_dir(mut self, dir: &Path) -> Self {
        self.asset_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Check inputs exist and create the output directory.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        if !self.manifest_path.is_file() {
            return Err(ConfigError::MissingManifest(self.manifest_path.clone()));
        }
        if let Some(dir) = &self.texture_dir {
            if !dir.is_dir() {
                return Err(ConfigError::MissingTextureDir(dir.clone()));
            }
        }
        fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDir {
            path: self.output_dir.clone(),
            source,
        })
    }
}
