//! Color resolver.
//!
//! A [`ColorTable`] is the palette for one run: built once, then only read.
//! A [`ColorAssignment`] maps category values to palette colors in first-seen
//! order, honouring explicit overrides, and is what ends up in a `.cmap` file.

use constants::palette::{CHOSEN_COLORS, GRAY_COLOR};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::table::Table;

#[derive(Debug, Error)]
pub enum ColorError {
    #[error("failed to read color table {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed color table line {line}: '{text}'")]
    Malformed { line: usize, text: String },

    #[error("invalid hex color '{0}'")]
    InvalidHex(String),

    #[error("RGBA component {0} outside 0..=1")]
    InvalidComponent(f64),

    #[error("unknown color '{0}'")]
    UnknownColor(String),

    #[error("color table has no colors")]
    EmptyTable,

    #[error("override for '{value}' maps to both {first} and {second}")]
    OverrideCollision {
        value: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Rgba {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Result<Self, ColorError> {
        for c in [r, g, b, a] {
            if !(0.0..=1.0).contains(&c) {
                return Err(ColorError::InvalidComponent(c));
            }
        }
        Ok(Self { r, g, b, a })
    }

    pub fn gray(level: f64) -> Self {
        Self {
            r: level,
            g: level,
            b: level,
            a: 1.0,
        }
    }

    /// Parse `#RRGGBB` (leading `#` optional).
    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(ColorError::InvalidHex(hex.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map(|v| f64::from(v) / 255.0)
                .map_err(|_| ColorError::InvalidHex(hex.to_string()))
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: 1.0,
        })
    }

    /// Equal up to the six decimals a color map keeps.
    pub fn approx_eq(&self, other: &Rgba) -> bool {
        [
            self.r - other.r,
            self.g - other.g,
            self.b - other.b,
            self.a - other.a,
        ]
        .iter()
        .all(|d| d.abs() <= 1e-6)
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} {:.6} {:.6} {:.6}", self.r, self.g, self.b, self.a)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaletteColor {
    pub name: String,
    pub rgba: Rgba,
}

/// Ordered palette of named colors. Never empty.
#[derive(Debug, Clone)]
pub struct ColorTable {
    colors: Vec<PaletteColor>,
}

impl ColorTable {
    /// The built-in Crayola palette.
    pub fn builtin() -> Self {
        let colors = CHOSEN_COLORS
            .iter()
            .map(|c| PaletteColor {
                name: c.name.to_string(),
                rgba: Rgba::from_hex(c.hex).unwrap_or_else(|_| Rgba::gray(GRAY_COLOR)),
            })
            .collect();
        Self { colors }
    }

    pub fn from_colors(colors: Vec<PaletteColor>) -> Result<Self, ColorError> {
        if colors.is_empty() {
            return Err(ColorError::EmptyTable);
        }
        Ok(Self { colors })
    }

    /// Load a `.dat` color table.
    pub fn load(path: &Path) -> Result<Self, ColorError> {
        let text = fs::read_to_string(path).map_err(|source| ColorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse_dat(&text)?;
        debug!(path = %path.display(), colors = table.len(), "Loaded color table");
        Ok(table)
    }

    /// Parse `r g b [a] # Name` lines. Blank lines and `#` comments are skipped.
    pub fn parse_dat(text: &str) -> Result<Self, ColorError> {
        let mut colors = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (numbers, name) = match line.split_once('#') {
                Some((numbers, name)) => (numbers, name.trim()),
                None => (line, ""),
            };
            let malformed = || ColorError::Malformed {
                line: i + 1,
                text: line.to_string(),
            };
            let values: Vec<f64> = numbers
                .split_whitespace()
                .map(|v| v.parse::<f64>().map_err(|_| malformed()))
                .collect::<Result<_, _>>()?;
            let rgba = match values.as_slice() {
                [r, g, b] => Rgba::new(*r, *g, *b, 1.0)?,
                [r, g, b, a] => Rgba::new(*r, *g, *b, *a)?,
                _ => return Err(malformed()),
            };
            let name = if name.is_empty() {
                format!("Color {}", colors.len() + 1)
            } else {
                name.to_string()
            };
            colors.push(PaletteColor { name, rgba });
        }
        Self::from_colors(colors)
    }

    /// Subset of this table in the order given. Names match case-insensitively.
    pub fn select(&self, names: &[String]) -> Result<Self, ColorError> {
        let colors = names
            .iter()
            .map(|name| {
                self.find(name)
                    .cloned()
                    .ok_or_else(|| ColorError::UnknownColor(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_colors(colors)
    }

    pub fn find(&self, name: &str) -> Option<&PaletteColor> {
        self.colors
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Palette entry `i`, wrapping past the end.
    pub fn cycle(&self, i: usize) -> &PaletteColor {
        &self.colors[i % self.colors.len()]
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Explicit value to color mapping from the manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColorOverride {
    pub value: String,
    pub color: OverrideColor,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OverrideColor {
    Named(String),
    Rgba([f64; 4]),
}

impl OverrideColor {
    fn resolve(&self, table: &ColorTable) -> Result<PaletteColor, ColorError> {
        match self {
            OverrideColor::Named(name) => table
                .find(name)
                .cloned()
                .ok_or_else(|| ColorError::UnknownColor(name.clone())),
            OverrideColor::Rgba([r, g, b, a]) => Ok(PaletteColor {
                name: "Custom".to_string(),
                rgba: Rgba::new(*r, *g, *b, *a)?,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignedColor {
    pub value: String,
    pub color: PaletteColor,
}

/// Category value to color assignment. Indices are 1-based; 0 means no value.
#[derive(Debug, Clone, Default)]
pub struct ColorAssignment {
    entries: Vec<AssignedColor>,
    by_value: HashMap<String, usize>,
    pinned: HashMap<String, PaletteColor>,
    cursor: usize,
}

impl ColorAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `values` in order against `table`, with overrides pinned first.
    pub fn resolve<'a>(
        values: impl IntoIterator<Item = &'a str>,
        table: &ColorTable,
        overrides: &[ColorOverride],
    ) -> Result<Self, ColorError> {
        let mut assignment = Self::new();
        assignment.pin_overrides(overrides, table)?;
        for value in values {
            assignment.assign(value, table);
        }
        Ok(assignment)
    }

    /// Pin override colors. A value already tied to another color is a collision.
    pub fn pin_overrides(
        &mut self,
        overrides: &[ColorOverride],
        table: &ColorTable,
    ) -> Result<(), ColorError> {
        for o in overrides {
            let color = o.color.resolve(table)?;
            let existing = self
                .pinned
                .get(&o.value)
                .or_else(|| self.by_value.get(&o.value).map(|&i| &self.entries[i].color));
            if let Some(existing) = existing {
                if !existing.rgba.approx_eq(&color.rgba) {
                    return Err(ColorError::OverrideCollision {
                        value: o.value.clone(),
                        first: existing.name.clone(),
                        second: color.name,
                    });
                }
                continue;
            }
            self.pinned.insert(o.value.clone(), color);
        }
        Ok(())
    }

    /// Seed a previously written assignment, keeping its order.
    pub fn seed(&mut self, value: &str, color: PaletteColor) {
        if self.by_value.contains_key(value) {
            return;
        }
        self.by_value.insert(value.to_string(), self.entries.len());
        self.entries.push(AssignedColor {
            value: value.to_string(),
            color,
        });
        self.cursor += 1;
    }

    /// Index for `value`, assigning the next palette color on first sight.
    pub fn assign(&mut self, value: &str, table: &ColorTable) -> usize {
        if let Some(&i) = self.by_value.get(value) {
            return i + 1;
        }
        let color = match self.pinned.get(value) {
            Some(color) => color.clone(),
            None => {
                let color = table.cycle(self.cursor).clone();
                self.cursor += 1;
                color
            }
        };
        self.by_value.insert(value.to_string(), self.entries.len());
        self.entries.push(AssignedColor {
            value: value.to_string(),
            color,
        });
        self.entries.len()
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.by_value.get(value).map(|i| i + 1)
    }

    pub fn color_of(&self, value: &str) -> Option<&PaletteColor> {
        self.by_value.get(value).map(|&i| &self.entries[i].color)
    }

    pub fn entries(&self) -> &[AssignedColor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Columns of `table` usable for coloring, in precedence order.
pub fn color_columns(table: &Table, names: &[String]) -> Vec<usize> {
    let columns: Vec<usize> = names
        .iter()
        .filter_map(|name| {
            let index = table.column_index(name);
            if index.is_none() {
                debug!(column = %name, table = %table.path().display(), "Color column not present");
            }
            index
        })
        .collect();
    if !names.is_empty() && columns.is_empty() {
        warn!(
            table = %table.path().display(),
            columns = ?names,
            "None of the color columns exist, rows will use the no-value color"
        );
    }
    columns
}

/// First non-empty value among `columns` for `row`.
pub fn row_value<'t>(table: &'t Table, row: usize, columns: &[usize]) -> Option<&'t str> {
    columns
        .iter()
        .map(|&c| table.value(row, c))
        .find(|v| !v.is_empty())
}

/// Color index per row, 0 where no color column has a value.
pub fn color_rows(
    table: &Table,
    rows: &[usize],
    columns: &[usize],
    assignment: &mut ColorAssignment,
    palette: &ColorTable,
) -> Vec<usize> {
    rows.iter()
        .map(|&row| match row_value(table, row, columns) {
            Some(value) => assignment.assign(value, palette),
            None => 0,
        })
        .collect()
}
