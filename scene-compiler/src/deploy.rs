//! Copies a run's artifacts into the host's asset directory.

use crate::cache::cache_key;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to create asset directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Name a resource gets once copied flat into the asset directory.
pub fn deployed_name(resource: &str) -> String {
    cache_key(Path::new(resource)).unwrap_or_else(|| resource.to_string())
}

/// Destination for generated files and the textures they reference.
pub struct Deployer {
    asset_dir: PathBuf,
    texture_dir: Option<PathBuf>,
}

impl Deployer {
    pub fn new(asset_dir: &Path, texture_dir: Option<&Path>) -> Self {
        Self {
            asset_dir: asset_dir.to_path_buf(),
            texture_dir: texture_dir.map(Path::to_path_buf),
        }
    }

    /// Copy `files` and the named `textures` flat into the asset directory.
    /// A texture missing from the texture directory is logged and skipped.
    pub fn deploy(&self, files: &[PathBuf], textures: &[String]) -> Result<Vec<PathBuf>, DeployError> {
        fs::create_dir_all(&self.asset_dir).map_err(|source| DeployError::CreateDir {
            path: self.asset_dir.clone(),
            source,
        })?;

        let mut deployed = Vec::with_capacity(files.len() + textures.len());
        for file in files {
            deployed.push(self.copy(file)?);
        }

        for texture in textures {
            let source = match &self.texture_dir {
                Some(dir) => dir.join(texture),
                None => PathBuf::from(texture),
            };
            if !source.is_file() {
                warn!(texture = %source.display(), "Referenced texture not found, not deployed");
                continue;
            }
            deployed.push(self.copy(&source)?);
        }

        info!(
            count = deployed.len(),
            assets = %self.asset_dir.display(),
            "Deployed artifacts"
        );
        Ok(deployed)
    }

    /// Names the files will have once deployed.
    pub fn deployed_names(files: &[PathBuf], textures: &[String]) -> Vec<String> {
        files
            .iter()
            .filter_map(|f| cache_key(f))
            .chain(textures.iter().map(|t| deployed_name(t)))
            .collect()
    }

    fn copy(&self, from: &Path) -> Result<PathBuf, DeployError> {
        let name = from.file_name().unwrap_or(from.as_os_str());
        let to = self.asset_dir.join(name);
        fs::copy(from, &to).map_err(|source| DeployError::Copy {
            from: from.to_path_buf(),
            to: to.clone(),
            source,
        })?;
        debug!(file = %to.display(), "Deployed");
        Ok(to)
    }
}
