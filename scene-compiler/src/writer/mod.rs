//! Artifact writer: data files, descriptors and the run-level scene index.

pub mod data_files;
pub mod descriptor;
pub mod scene_index;

pub use data_files::{BranchRecord, LabelRecord, PointRecord};
pub use descriptor::NodeContext;
pub use scene_index::{ArtifactRecord, SceneIndexWriter};
