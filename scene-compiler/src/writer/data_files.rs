//! Data files consumed by the host: points CSV, label files, branch meshes
//! and color maps.

use csv::{ReaderBuilder, WriterBuilder};
use std::fmt::{self, Write as _};
use std::fs;
use std::path::Path;

use constants::palette::GRAY_COLOR;

use crate::colors::{ColorAssignment, ColorError, PaletteColor, Rgba};
use crate::error::EntryError;

/// Fixed leading columns of a points file.
pub const POINTS_HEADER: [&str; 5] = ["ID", "x", "y", "z", "color"];

#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: String,
    pub position: [f64; 3],
    /// Color-map index, 0 when the row has no color value.
    pub color: usize,
    pub aux: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub id: String,
    pub position: [f64; 3],
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchRecord {
    pub id: String,
    pub from: [f64; 3],
    pub to: [f64; 3],
    /// 1-based line color index.
    pub color: usize,
}

/// Write a whole text artifact in one call.
pub fn write_text(path: &Path, contents: &str) -> Result<(), EntryError> {
    fs::write(path, contents).map_err(|e| EntryError::write(path, e))
}

/// Write a points CSV. Coordinates use the shortest representation that
/// parses back to the same `f64`.
pub fn write_points(
    path: &Path,
    aux_headers: &[String],
    records: &[PointRecord],
) -> Result<(), EntryError> {
    let csv_error = |source: csv::Error| EntryError::CsvWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)
        .map_err(csv_error)?;

    let header = POINTS_HEADER
        .iter()
        .copied()
        .chain(aux_headers.iter().map(String::as_str));
    writer.write_record(header).map_err(csv_error)?;

    for record in records {
        let fixed = [
            record.id.clone(),
            record.position[0].to_string(),
            record.position[1].to_string(),
            record.position[2].to_string(),
            record.color.to_string(),
        ];
        writer
            .write_record(fixed.iter().map(String::as_str).chain(record.aux.iter().map(String::as_str)))
            .map_err(csv_error)?;
    }
    writer
        .flush()
        .map_err(|e| EntryError::write(path, e))
}

/// Read a points CSV back into records.
pub fn read_points(path: &Path) -> Result<Vec<PointRecord>, csv::Error> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        let number = |i: usize| {
            record
                .get(i)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(f64::NAN)
        };
        records.push(PointRecord {
            id: record.get(0).unwrap_or("").to_string(),
            position: [number(1), number(2), number(3)],
            color: record.get(4).and_then(|v| v.parse().ok()).unwrap_or(0),
            aux: record.iter().skip(POINTS_HEADER.len()).map(str::to_string).collect(),
        });
    }
    Ok(records)
}

/// Label text and ids must stay on one line, ids without spaces.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn render_labels(records: &[LabelRecord]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for r in records {
        writeln!(
            out,
            "{:.8} {:.8} {:.8} id {} text {}",
            r.position[0],
            r.position[1],
            r.position[2],
            single_line(&r.id).replace(' ', "_"),
            single_line(&r.text)
        )?;
    }
    Ok(out)
}

/// Two-vertex line meshes.
pub fn render_speck(records: &[BranchRecord]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for r in records {
        writeln!(out, "mesh -c {} {{", r.color)?;
        writeln!(out, "  id {}", r.id)?;
        writeln!(out, "  2")?;
        writeln!(out, "  {:.8} {:.8} {:.8}", r.from[0], r.from[1], r.from[2])?;
        writeln!(out, "  {:.8} {:.8} {:.8}", r.to[0], r.to[1], r.to[2])?;
        writeln!(out, "}}")?;
    }
    Ok(out)
}

/// Mesh id to display name pairs.
pub fn render_branch_names(records: &[BranchRecord]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for r in records {
        writeln!(out, "{} {}", r.id, r.id)?;
    }
    Ok(out)
}

/// Color map with a legend. Index 0 is the no-value gray.
pub fn render_cmap(identifier: &str, assignment: &ColorAssignment) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# OpenSpace colormap for {identifier}")?;
    writeln!(out, "# Index 0 is used for rows without a value")?;
    writeln!(out)?;
    writeln!(out, "{}", assignment.len() + 1)?;
    writeln!(out, "{} # Gray | | 0", Rgba::gray(GRAY_COLOR))?;
    for (i, assigned) in assignment.entries().iter().enumerate() {
        writeln!(
            out,
            "{} # {} | {} | {}",
            assigned.color.rgba,
            assigned.color.name,
            single_line(&assigned.value),
            i + 1
        )?;
    }
    Ok(out)
}

/// One legend line of a color map.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub index: usize,
    pub value: String,
    pub color: PaletteColor,
}

/// Parse a color map written by [`render_cmap`]. The no-value entry is skipped.
pub fn parse_cmap(text: &str) -> Result<Vec<LegendEntry>, ColorError> {
    let mut legend = Vec::new();
    let mut seen_count = false;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !seen_count {
            // Color count line.
            seen_count = true;
            continue;
        }
        let malformed = || ColorError::Malformed {
            line: i + 1,
            text: line.to_string(),
        };
        let (numbers, comment) = line.split_once('#').ok_or_else(malformed)?;
        let values: Vec<f64> = numbers
            .split_whitespace()
            .map(|v| v.parse::<f64>().map_err(|_| malformed()))
            .collect::<Result<_, _>>()?;
        let &[r, g, b, a] = values.as_slice() else {
            return Err(malformed());
        };
        let (head, index) = comment.rsplit_once('|').ok_or_else(malformed)?;
        let (name, value) = head.split_once('|').ok_or_else(malformed)?;
        let index: usize = index.trim().parse().map_err(|_| malformed())?;
        if index == 0 {
            continue;
        }
        legend.push(LegendEntry {
            index,
            value: value.trim().to_string(),
            color: PaletteColor {
                name: name.trim().to_string(),
                rgba: Rgba::new(r, g, b, a)?,
            },
        });
    }
    legend.sort_by_key(|entry| entry.index);
    Ok(legend)
}

/// Load a color map as a seeded assignment, keeping its indices.
pub fn load_cmap(path: &Path) -> Result<ColorAssignment, ColorError> {
    let text = fs::read_to_string(path).map_err(|source| ColorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut assignment = ColorAssignment::new();
    for entry in parse_cmap(&text)? {
        assignment.seed(&entry.value, entry.color);
    }
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colors::{ColorError, ColorOverride, ColorTable, OverrideColor};
    use tempfile::TempDir;

    #[test]
    fn test_points_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.csv");
        let records = vec![
            PointRecord {
                id: "Canis lupus".into(),
                position: [12.0, 1.0, 0.0],
                color: 1,
                aux: vec!["Mammalia".into()],
            },
            PointRecord {
                id: "Felis, catus".into(),
                position: [0.1 + 0.2, -1e-9, 123456.789012345],
                color: 0,
                aux: vec!["".into()],
            },
        ];

        write_points(&path, &["class".to_string()], &records).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("ID,x,y,z,color,class\n"));

        let back = read_points(&path).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_label_lines() {
        let text = render_labels(&[LabelRecord {
            id: "Canis lupus".into(),
            position: [1.0, 2.5, -3.0],
            text: "Gray\nwolf".into(),
        }])
        .unwrap();
        assert_eq!(
            text,
            "1.00000000 2.50000000 -3.00000000 id Canis_lupus text Gray wolf\n"
        );
    }

    #[test]
    fn test_speck_mesh() {
        let records = [BranchRecord {
            id: "a_b".into(),
            from: [0.0, 0.0, 0.0],
            to: [1.0, 2.0, 3.0],
            color: 2,
        }];
        assert_eq!(
            render_speck(&records).unwrap(),
            "mesh -c 2 {\n  id a_b\n  2\n  0.00000000 0.00000000 0.00000000\n  1.00000000 2.00000000 3.00000000\n}\n"
        );
        assert_eq!(render_branch_names(&records).unwrap(), "a_b a_b\n");
    }

    #[test]
    fn test_cmap_round_trip() {
        let table = ColorTable::builtin();
        let assignment = ColorAssignment::resolve(["Aves", "Mammalia"], &table, &[]).unwrap();
        let text = render_cmap("tree_points", &assignment).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[3], "3");
        assert_eq!(lines[4], "0.400000 0.400000 0.400000 1.000000 # Gray | | 0");
        assert!(lines[5].ends_with("# Lemon Yellow | Aves | 1"));

        let legend = parse_cmap(&text).unwrap();
        assert_eq!(legend.len(), 2);
        assert_eq!(legend[1].value, "Mammalia");
        assert_eq!(legend[1].index, 2);
        assert_eq!(legend[1].color.name, "Sea Green");
    }

    #[test]
    fn test_load_cmap_seeds_assignment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.cmap");
        let table = ColorTable::builtin();
        let original = ColorAssignment::resolve(["b", "a"], &table, &[]).unwrap();
        fs::write(&path, render_cmap("c", &original).unwrap()).unwrap();

        let mut seeded = load_cmap(&path).unwrap();
        assert_eq!(seeded.index_of("a"), Some(2));
        // New values continue after the seeded ones.
        assert_eq!(seeded.assign("c", &table), 3);
        assert_eq!(seeded.color_of("c").unwrap().name, table.cycle(2).name);
    }

    #[test]
    fn test_loaded_legend_accepts_its_own_colors_as_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("birds.cmap");
        let table = ColorTable::builtin();
        let original = ColorAssignment::resolve(["Aves"], &table, &[]).unwrap();
        fs::write(&path, render_cmap("birds", &original).unwrap()).unwrap();

        let pin = |name: &str| ColorOverride {
            value: "Aves".into(),
            color: OverrideColor::Named(name.into()),
        };
        let mut seeded = load_cmap(&path).unwrap();
        seeded.pin_overrides(&[pin("Lemon Yellow")], &table).unwrap();

        let err = seeded.pin_overrides(&[pin("Sea Green")], &table).unwrap_err();
        assert!(matches!(err, ColorError::OverrideCollision { .. }));
    }

    #[test]
    fn test_parse_cmap_rejects_garbage() {
        assert!(parse_cmap("1\n0.1 0.2 # Red | x | 1\n").is_err());
    }
}
