//! Scene index generation linking every artifact set of a run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::bounds::DatasetBounds;
use crate::manifest::EntryType;
use crate::writer::descriptor::scene_asset;

/// Row of another dataset this artifact set is anchored to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnchorRecord {
    pub dataset: String,
    pub column: String,
    pub value: String,
    pub offset: [f64; 3],
}

/// A model or molecule node and the row it sits on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlacementRecord {
    pub identifier: String,
    pub row_id: String,
}

/// Everything the host or a later tool needs to know about one artifact set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArtifactRecord {
    pub identifier: String,
    pub entry_type: EntryType,
    /// Source table as named in the manifest.
    pub source: String,
    /// Descriptor file name, relative to the output directory.
    pub descriptor: String,
    pub data_files: Vec<String>,
    pub fade_targets: Vec<String>,
    pub anchor: Option<AnchorRecord>,
    pub placements: Vec<PlacementRecord>,
    pub rows: usize,
    pub dropped_rows: usize,
    pub bounds: Option<DatasetBounds>,
}

/// Unified index of a run, written next to the artifacts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SceneIndex {
    pub dataset_name: String,
    pub artifacts: Vec<ArtifactRecord>,
}

/// Scene index generator for one output directory.
/// Writes the JSON index and a top-level asset requiring each descriptor.
pub struct SceneIndexWriter {
    /// Base output directory for all generated files.
    output_dir: PathBuf,
    /// File stem shared by the index and the top-level asset.
    output_name: String,
    dataset_name: String,
}

impl SceneIndexWriter {
    pub fn new(output_dir: &Path, dataset_name: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            output_name: crate::manifest::sanitize_identifier(dataset_name),
            dataset_name: dataset_name.to_string(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_scene.json", self.output_name))
    }

    pub fn asset_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.asset", self.output_name))
    }

    /// Writes the index and the top-level asset.
    /// Returns the written paths in a fixed order.
    pub fn write(&self, artifacts: Vec<ArtifactRecord>) -> io::Result<Vec<PathBuf>> {
        let identifiers: Vec<String> = artifacts.iter().map(|a| a.identifier.clone()).collect();
        let index = SceneIndex {
            dataset_name: self.dataset_name.clone(),
            artifacts,
        };

        let index_path = self.index_path();
        let mut index_json = serde_json::to_string_pretty(&index).map_err(io::Error::other)?;
        index_json.push('\n');
        fs::write(&index_path, index_json)?;

        let asset_path = self.asset_path();
        let asset = scene_asset(&self.dataset_name, &identifiers).map_err(io::Error::other)?;
        fs::write(&asset_path, asset)?;

        info!(
            index = %index_path.display(),
            artifacts = identifiers.len(),
            "Generated scene index"
        );
        Ok(vec![index_path, asset_path])
    }

    /// Read an index back, for tools that post-process a run.
    pub fn read(path: &Path) -> io::Result<SceneIndex> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> ArtifactRecord {
        ArtifactRecord {
            identifier: id.to_string(),
            entry_type: EntryType::Points,
            source: "species.csv".into(),
            descriptor: format!("{id}.asset"),
            data_files: vec![format!("{id}.csv")],
            fade_targets: vec![],
            anchor: Some(AnchorRecord {
                dataset: "classes_points".into(),
                column: "class".into(),
                value: "Mammalia".into(),
                offset: [10.0, 0.0, 0.0],
            }),
            placements: vec![],
            rows: 1,
            dropped_rows: 0,
            bounds: None,
        }
    }

    #[test]
    fn test_index_written_and_read_back() {
        let dir = TempDir::new().unwrap();
        let writer = SceneIndexWriter::new(dir.path(), "Tree of Life");

        let paths = writer.write(vec![record("species_points")]).unwrap();
        assert_eq!(paths[0], dir.path().join("Tree_of_Life_scene.json"));
        assert_eq!(paths[1], dir.path().join("Tree_of_Life.asset"));

        let index = SceneIndexWriter::read(&paths[0]).unwrap();
        assert_eq!(index.dataset_name, "Tree of Life");
        assert_eq!(index.artifacts, vec![record("species_points")]);

        let asset = fs::read_to_string(&paths[1]).unwrap();
        assert!(asset.contains("asset.require(\"./species_points\")"));
    }
}
