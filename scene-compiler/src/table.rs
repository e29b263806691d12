//! Source table loading.
//!
//! Tables are read whole into memory as string records. Numeric interpretation
//! happens later in the coordinate transformer, so a malformed cell only costs
//! its own row.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Name given to a blank first header, the usual shape of an exported index column.
pub const DEFAULT_ID_COLUMN: &str = "ID";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    #[error("{path} has no header row")]
    NoHeaders { path: PathBuf },

    #[error("column '{column}' not found in {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("duplicate row identifier '{id}' in {path}")]
    DuplicateId { id: String, path: PathBuf },
}

/// An in-memory CSV table with a unique identifier column.
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<StringRecord>,
    id_index: usize,
    /// Rows discarded at load time because their identifier cell was empty.
    blank_ids: usize,
}

impl Table {
    /// Load a table, keying rows by `id_column` (the first column when `None`).
    pub fn load(path: &Path, id_column: Option<&str>) -> Result<Self, TableError> {
        Self::read(path, id_column, true)
    }

    /// Load an edge list. Rows are kept as they are, identifiers may repeat.
    pub fn load_edges(path: &Path) -> Result<Self, TableError> {
        Self::read(path, None, false)
    }

    fn read(path: &Path, id_column: Option<&str>, keyed: bool) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(|source| TableError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|source| TableError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .iter()
            .map(str::to_string)
            .collect();

        let mut table = Self {
            path: path.to_path_buf(),
            headers,
            rows: Vec::new(),
            id_index: 0,
            blank_ids: 0,
        };
        table.normalise_headers()?;
        table.id_index = match id_column {
            Some(column) => table.require_column(column)?,
            None => 0,
        };

        let mut seen: HashMap<String, usize> = HashMap::new();
        for result in reader.records() {
            let record = result.map_err(|source| TableError::Read {
                path: path.to_path_buf(),
                source,
            })?;

            if !keyed {
                table.rows.push(record);
                continue;
            }
            let id = record.get(table.id_index).unwrap_or("");
            if id.is_empty() {
                table.blank_ids += 1;
                continue;
            }
            if seen.insert(id.to_string(), table.rows.len()).is_some() {
                return Err(TableError::DuplicateId {
                    id: id.to_string(),
                    path: path.to_path_buf(),
                });
            }
            table.rows.push(record);
        }

        debug!(
            path = %path.display(),
            rows = table.rows.len(),
            columns = table.headers.len(),
            "Loaded table"
        );
        Ok(table)
    }

    /// Blank first header becomes `ID`.
    fn normalise_headers(&mut self) -> Result<(), TableError> {
        match self.headers.first_mut() {
            None => Err(TableError::NoHeaders {
                path: self.path.clone(),
            }),
            Some(first) => {
                if first.is_empty() {
                    *first = DEFAULT_ID_COLUMN.to_string();
                }
                Ok(())
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn blank_ids(&self) -> usize {
        self.blank_ids
    }

    pub fn id_index(&self) -> usize {
        self.id_index
    }

    pub fn id_column(&self) -> &str {
        &self.headers[self.id_index]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumn {
                column: name.to_string(),
                path: self.path.clone(),
            })
    }

    /// Identifier of row `row`.
    pub fn id(&self, row: usize) -> &str {
        self.value(row, self.id_index)
    }

    /// Trimmed cell value; missing trailing cells read as empty.
    pub fn value(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).unwrap_or("")
    }

    /// Parse a cell as a float. Empty or unparseable cells yield `None`.
    pub fn number(&self, row: usize, column: usize) -> Option<f64> {
        let cell = self.value(row, column);
        if cell.is_empty() {
            return None;
        }
        cell.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_blank_first_header_becomes_id() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "t.csv", ",x,y,z\na,1,2,3\nb,4,5,6\n");

        let table = Table::load(&path, None).unwrap();
        assert_eq!(table.id_column(), "ID");
        assert_eq!(table.len(), 2);
        assert_eq!(table.id(1), "b");
        assert_eq!(table.number(1, 2), Some(5.0));
    }

    #[test]
    fn test_named_id_column_and_trimming() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            &dir,
            "t.csv",
            "x,species,class\n1, Canis lupus ,Mammalia\n2,Felis catus,Mammalia\n",
        );

        let table = Table::load(&path, Some("species")).unwrap();
        assert_eq!(table.id(0), "Canis lupus");
        assert_eq!(table.column_index("class"), Some(2));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "t.csv", "id,x\na,1\na,2\n");

        let err = Table::load(&path, None).unwrap_err();
        assert!(matches!(err, TableError::DuplicateId { ref id, .. } if id == "a"));
    }

    #[test]
    fn test_edge_list_keeps_repeated_ids() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "edges.csv", "from,to\nroot,a\nroot,b\n");

        let table = Table::load_edges(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(1, 1), "b");
    }

    #[test]
    fn test_blank_ids_are_counted_not_loaded() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "t.csv", "id,x\na,1\n,2\nb,3\n");

        let table = Table::load(&path, None).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.blank_ids(), 1);
    }

    #[test]
    fn test_missing_id_column() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "t.csv", "id,x\na,1\n");

        let err = Table::load(&path, Some("taxon")).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn { .. }));
    }

    #[test]
    fn test_unparseable_number_is_none() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "t.csv", "id,x\na,nope\nb,\n");

        let table = Table::load(&path, None).unwrap();
        assert_eq!(table.number(0, 1), None);
        assert_eq!(table.number(1, 1), None);
    }
}
