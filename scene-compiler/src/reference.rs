//! Reference resolver.
//!
//! Resolved datasets are registered as the run proceeds. Children look up their
//! parent anchor among them, and branch entries look up edge endpoints.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::bounds::DatasetBounds;
use crate::coordinates::{Placement, TransformedRows};
use crate::manifest::{EntryType, ParentRef};
use crate::table::Table;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("no resolved dataset for '{0}' precedes this entry")]
    UnknownDataset(String),

    #[error("parent column '{column}' not found in {dataset}")]
    MissingColumn { column: String, dataset: String },

    #[error("no row of {dataset} has {column} = '{value}'")]
    ParentNotFound {
        dataset: String,
        column: String,
        value: String,
    },

    #[error("{matches} rows of {dataset} have {column} = '{value}', anchor is ambiguous")]
    AmbiguousParent {
        dataset: String,
        column: String,
        value: String,
        matches: usize,
    },
}

/// A dataset whose rows have final positions.
#[derive(Debug)]
pub struct ResolvedDataset {
    pub identifier: String,
    pub csv_path: PathBuf,
    pub entry_type: EntryType,
    pub table: Table,
    pub placed: TransformedRows,
    pub bounds: DatasetBounds,
    by_id: HashMap<String, usize>,
}

impl ResolvedDataset {
    pub fn new(
        identifier: String,
        csv_path: PathBuf,
        entry_type: EntryType,
        table: Table,
        placed: TransformedRows,
    ) -> Self {
        let by_id = placed
            .rows
            .iter()
            .enumerate()
            .map(|(i, &row)| (table.id(row).to_string(), i))
            .collect();
        let bounds = DatasetBounds::from_positions(&placed.positions);
        Self {
            identifier,
            csv_path,
            entry_type,
            table,
            placed,
            bounds,
            by_id,
        }
    }

    /// Final position of the row with identifier `id`.
    pub fn position_of(&self, id: &str) -> Option<[f64; 3]> {
        self.by_id.get(id).map(|&i| self.placed.positions[i])
    }
}

/// Datasets resolved so far in this run, in processing order.
#[derive(Debug, Default)]
pub struct Registry {
    datasets: Vec<ResolvedDataset>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dataset: ResolvedDataset) {
        self.datasets.push(dataset);
    }

    /// The most recently resolved dataset read from `csv_path`, optionally of one type.
    pub fn lookup(&self, csv_path: &Path, entry_type: Option<EntryType>) -> Option<&ResolvedDataset> {
        self.datasets
            .iter()
            .rev()
            .find(|d| d.csv_path == csv_path && entry_type.is_none_or(|t| t == d.entry_type))
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Find the single anchor row for `parent` and turn it into a placement.
pub fn resolve_parent(
    parent: &ParentRef,
    parent_path: &Path,
    registry: &Registry,
    scale: f64,
) -> Result<Placement, ReferenceError> {
    let dataset = registry
        .lookup(parent_path, parent.parent_type)
        .ok_or_else(|| ReferenceError::UnknownDataset(parent.csv_file.clone()))?;

    let column = dataset
        .table
        .column_index(&parent.parent_column)
        .ok_or_else(|| ReferenceError::MissingColumn {
            column: parent.parent_column.clone(),
            dataset: dataset.identifier.clone(),
        })?;

    let matches: Vec<[f64; 3]> = dataset
        .placed
        .iter()
        .filter(|&(row, _)| dataset.table.value(row, column) == parent.parent_point)
        .map(|(_, position)| position)
        .collect();

    match matches.as_slice() {
        [offset] => Ok(Placement {
            offset: *offset,
            scale,
        }),
        [] => Err(ReferenceError::ParentNotFound {
            dataset: dataset.identifier.clone(),
            column: parent.parent_column.clone(),
            value: parent.parent_point.clone(),
        }),
        many => Err(ReferenceError::AmbiguousParent {
            dataset: dataset.identifier.clone(),
            column: parent.parent_column.clone(),
            value: parent.parent_point.clone(),
            matches: many.len(),
        }),
    }
}

/// One edge with both endpoints placed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEdge {
    pub row: usize,
    pub from_id: String,
    pub to_id: String,
    pub from: [f64; 3],
    pub to: [f64; 3],
}

#[derive(Debug, Default)]
pub struct EdgeResolution {
    pub edges: Vec<ResolvedEdge>,
    pub missing: usize,
}

/// Place the endpoints of each `(row, from, to)` edge against `dataset`.
/// Edges with an unknown endpoint are skipped with a warning.
pub fn resolve_edges<'a>(
    edges: impl IntoIterator<Item = (usize, &'a str, &'a str)>,
    dataset: &ResolvedDataset,
) -> EdgeResolution {
    let mut out = EdgeResolution::default();
    for (row, from_id, to_id) in edges {
        match (dataset.position_of(from_id), dataset.position_of(to_id)) {
            (Some(from), Some(to)) => out.edges.push(ResolvedEdge {
                row,
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
                from,
                to,
            }),
            (from, _) => {
                let missing = if from.is_none() { from_id } else { to_id };
                warn!(
                    edge = %format!("{from_id} -> {to_id}"),
                    missing = %missing,
                    dataset = %dataset.identifier,
                    "Skipping edge with unknown endpoint"
                );
                out.missing += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::{Centering, Projection, TransformSpec, transform};
    use constants::coordinate_system::IDENTITY_TRANSFORM;
    use std::fs;
    use tempfile::TempDir;

    fn resolved(dir: &TempDir, name: &str, body: &str, scale: f64) -> ResolvedDataset {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        let table = Table::load(&path, None).unwrap();
        let spec = TransformSpec {
            x_column: "x".into(),
            y_column: "y".into(),
            z_column: "z".into(),
            projection: Projection::Planar,
            axis: IDENTITY_TRANSFORM,
            centering: Centering::None,
        };
        let placed = transform(&table, &spec, &Placement::unanchored(scale)).unwrap();
        ResolvedDataset::new(format!("{name}_points"), path, EntryType::Points, table, placed)
    }

    fn parent_ref(value: &str) -> ParentRef {
        ParentRef {
            csv_file: "classes.csv".into(),
            parent_type: None,
            parent_column: "class".into(),
            parent_point: value.into(),
        }
    }

    #[test]
    fn test_single_match_gives_offset() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        let parent = resolved(
            &dir,
            "classes.csv",
            "id,class,x,y,z\n1,Mammalia,10,0,0\n2,Aves,0,5,0\n",
            1.0,
        );
        let path = parent.csv_path.clone();
        registry.register(parent);

        let placement = resolve_parent(&parent_ref("Mammalia"), &path, &registry, 1000.0).unwrap();
        assert_eq!(placement.offset, [10.0, 0.0, 0.0]);
        assert_eq!(placement.scale, 1000.0);
    }

    #[test]
    fn test_zero_matches() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        let parent = resolved(&dir, "classes.csv", "id,class,x,y,z\n1,Aves,0,5,0\n", 1.0);
        let path = parent.csv_path.clone();
        registry.register(parent);

        let err = resolve_parent(&parent_ref("Mammalia"), &path, &registry, 1.0).unwrap_err();
        assert!(matches!(err, ReferenceError::ParentNotFound { .. }));
    }

    #[test]
    fn test_ambiguous_matches() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        let parent = resolved(
            &dir,
            "classes.csv",
            "id,class,x,y,z\n1,Mammalia,1,0,0\n2,Mammalia,2,0,0\n",
            1.0,
        );
        let path = parent.csv_path.clone();
        registry.register(parent);

        let err = resolve_parent(&parent_ref("Mammalia"), &path, &registry, 1.0).unwrap_err();
        assert!(matches!(err, ReferenceError::AmbiguousParent { matches: 2, .. }));
    }

    #[test]
    fn test_unregistered_parent() {
        let registry = Registry::new();
        let err = resolve_parent(&parent_ref("x"), Path::new("classes.csv"), &registry, 1.0)
            .unwrap_err();
        assert!(matches!(err, ReferenceError::UnknownDataset(_)));
    }

    #[test]
    fn test_parent_scale_moves_anchor() {
        let dir = TempDir::new().unwrap();
        let body = "id,class,x,y,z\n1,Mammalia,10,0,0\n";

        let mut small = Registry::new();
        let parent = resolved(&dir, "classes.csv", body, 1.0);
        let path = parent.csv_path.clone();
        small.register(parent);
        let mut large = Registry::new();
        large.register(resolved(&dir, "classes.csv", body, 2.0));

        let a = resolve_parent(&parent_ref("Mammalia"), &path, &small, 1.0).unwrap();
        let b = resolve_parent(&parent_ref("Mammalia"), &path, &large, 1.0).unwrap();
        assert_eq!(b.offset[0], 2.0 * a.offset[0]);
    }

    #[test]
    fn test_latest_registration_wins() {
        let dir = TempDir::new().unwrap();
        let mut registry = Registry::new();
        registry.register(resolved(&dir, "c.csv", "id,x,y,z\na,1,0,0\n", 1.0));
        registry.register(resolved(&dir, "c.csv", "id,x,y,z\na,1,0,0\n", 3.0));

        let found = registry.lookup(&dir.path().join("c.csv"), None).unwrap();
        assert_eq!(found.position_of("a"), Some([3.0, 0.0, 0.0]));
        assert!(registry.lookup(&dir.path().join("c.csv"), Some(EntryType::Labels)).is_none());
    }

    #[test]
    fn test_missing_endpoint_skips_only_that_edge() {
        let dir = TempDir::new().unwrap();
        let nodes = resolved(&dir, "X.csv", "id,x,y,z\na,0,0,0\nb,1,0,0\nc,0,1,0\n", 1.0);

        let edges = vec![(0, "a", "b"), (1, "b", "ghost"), (2, "a", "c")];
        let out = resolve_edges(edges, &nodes);

        assert_eq!(out.missing, 1);
        assert_eq!(out.edges.len(), 2);
        assert_eq!(out.edges[1].to, [0.0, 1.0, 0.0]);
    }
}
