//! Cache invalidation.
//!
//! The host caches derived data under a directory named after each resource
//! file and prefers it over the file itself. Removing the cache entries for
//! the files a run writes forces the host to read the new artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to remove cache entry {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to list {path}: {source}")]
    List { path: PathBuf, source: io::Error },

    #[error("cache path {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// What an invalidation pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheReport {
    pub removed: Vec<PathBuf>,
    /// Names refused because they were not plain file names.
    pub rejected: Vec<String>,
}

pub struct CacheInvalidator {
    cache_dir: PathBuf,
}

impl CacheInvalidator {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Remove the cache entries named exactly like `names`, nothing else.
    /// A missing cache directory is not an error, a file in its place is.
    pub fn invalidate<I, S>(&self, names: I) -> Result<CacheReport, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = CacheReport::default();
        if !self.cache_dir.exists() {
            debug!(cache = %self.cache_dir.display(), "No cache directory, nothing to clear");
            return Ok(report);
        }
        if !self.cache_dir.is_dir() {
            return Err(CacheError::NotADirectory(self.cache_dir.clone()));
        }

        for name in names {
            let name = name.as_ref();
            if !is_plain_file_name(name) {
                warn!(name = %name, "Refusing to clear cache entry that is not a plain file name");
                report.rejected.push(name.to_string());
                continue;
            }

            let entry = self.cache_dir.join(name);
            let metadata = match fs::symlink_metadata(&entry) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(CacheError::Remove { path: entry, source }),
            };
            let result = if metadata.is_dir() {
                fs::remove_dir_all(&entry)
            } else {
                fs::remove_file(&entry)
            };
            result.map_err(|source| CacheError::Remove {
                path: entry.clone(),
                source,
            })?;
            debug!(entry = %entry.display(), "Removed cache entry");
            report.removed.push(entry);
        }

        if !report.removed.is_empty() {
            info!(count = report.removed.len(), cache = %self.cache_dir.display(), "Cleared cache entries");
        }
        Ok(report)
    }

    /// Clear the cache entries for every file directly inside `asset_dir`.
    pub fn clean_for_asset_dir(&self, asset_dir: &Path) -> Result<CacheReport, CacheError> {
        if !asset_dir.is_dir() {
            info!(assets = %asset_dir.display(), "Asset directory does not exist, nothing to clear");
            return Ok(CacheReport::default());
        }
        let listing = fs::read_dir(asset_dir).map_err(|source| CacheError::List {
            path: asset_dir.to_path_buf(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|source| CacheError::List {
                path: asset_dir.to_path_buf(),
                source,
            })?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        self.invalidate(names)
    }
}

/// File name of `path`, for use as a cache key.
pub fn cache_key(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_cache_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let invalidator = CacheInvalidator::new(&dir.path().join("nope"));

        let report = invalidator.invalidate(["a_points.csv"]).unwrap();
        assert!(report.removed.is_empty());
    }

    #[test]
    fn test_file_in_place_of_cache_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        fs::write(&cache, b"not a dir").unwrap();

        let err = CacheInvalidator::new(&cache).invalidate(["a_points.csv"]).unwrap_err();
        assert!(matches!(err, CacheError::NotADirectory(path) if path == cache));
    }

    #[test]
    fn test_only_named_entries_removed() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path();
        fs::create_dir_all(cache.join("a_points.csv").join("v1")).unwrap();
        fs::write(cache.join("a_points.csv").join("v1").join("data.bin"), b"x").unwrap();
        fs::write(cache.join("a_points.cmap"), b"x").unwrap();
        fs::create_dir(cache.join("unrelated.csv")).unwrap();

        let report = CacheInvalidator::new(cache)
            .invalidate(["a_points.csv", "a_points.cmap", "never_cached.asset"])
            .unwrap();

        assert_eq!(report.removed.len(), 2);
        assert!(!cache.join("a_points.csv").exists());
        assert!(!cache.join("a_points.cmap").exists());
        assert!(cache.join("unrelated.csv").exists());
    }

    #[test]
    fn test_path_like_names_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir(&cache).unwrap();
        fs::write(dir.path().join("outside.txt"), b"keep").unwrap();

        let report = CacheInvalidator::new(&cache)
            .invalidate(["../outside.txt", "..", ""])
            .unwrap();

        assert_eq!(report.rejected.len(), 3);
        assert!(dir.path().join("outside.txt").exists());
    }

    #[test]
    fn test_clean_for_asset_dir() {
        let dir = TempDir::new().unwrap();
        let assets = dir.path().join("assets");
        let cache = dir.path().join("cache");
        fs::create_dir_all(assets.join("subdir")).unwrap();
        fs::create_dir_all(&cache).unwrap();
        fs::write(assets.join("tree.speck"), b"").unwrap();
        fs::create_dir(cache.join("tree.speck")).unwrap();
        fs::create_dir(cache.join("subdir")).unwrap();

        let report = CacheInvalidator::new(&cache).clean_for_asset_dir(&assets).unwrap();

        assert_eq!(report.removed, vec![cache.join("tree.speck")]);
        // Subdirectories of the asset dir are not cache keys.
        assert!(cache.join("subdir").exists());
    }
}
