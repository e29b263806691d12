//! Coordinate transformer.
//!
//! Raw table cells become output positions in a fixed order: projection, axis
//! transform, recentering, scaling, then the parent offset. Rows that cannot be
//! placed are dropped and counted.

use constants::coordinate_system::transform_coordinates;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::summary::{DropReason, RowDrops};
use crate::table::{Table, TableError};

fn default_true() -> bool {
    true
}

/// How raw columns map to Cartesian coordinates.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Projection {
    #[default]
    Planar,
    Spherical {
        radius_column: String,
        longitude_column: String,
        latitude_column: String,
        #[serde(default = "default_true")]
        degrees: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Centering {
    None,
    Mean,
    Fixed([f64; 3]),
}

/// Everything the transformer needs from a manifest entry.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub x_column: String,
    pub y_column: String,
    pub z_column: String,
    pub projection: Projection,
    pub axis: [[f64; 3]; 3],
    pub centering: Centering,
}

/// Absolute offset plus scale factor applied to a dataset's rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub offset: [f64; 3],
    pub scale: f64,
}

impl Placement {
    pub fn unanchored(scale: f64) -> Self {
        Self {
            offset: [0.0; 3],
            scale,
        }
    }

    /// Scale a centred position and move it onto the anchor.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        [
            self.offset[0] + p[0] * self.scale,
            self.offset[1] + p[1] * self.scale,
            self.offset[2] + p[2] * self.scale,
        ]
    }
}

/// Placed rows, parallel vectors in table order.
#[derive(Debug, Clone, Default)]
pub struct TransformedRows {
    pub rows: Vec<usize>,
    pub positions: Vec<[f64; 3]>,
    /// Center subtracted before scaling (zero without recentering).
    pub center: [f64; 3],
    pub drops: RowDrops,
}

impl TransformedRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, [f64; 3])> + '_ {
        self.rows.iter().copied().zip(self.positions.iter().copied())
    }
}

enum ColumnPlan {
    Planar {
        x: usize,
        y: usize,
        z: Option<usize>,
    },
    Spherical {
        radius: usize,
        longitude: usize,
        latitude: usize,
        degrees: bool,
    },
}

impl ColumnPlan {
    fn resolve(table: &Table, spec: &TransformSpec) -> Result<Self, TableError> {
        match &spec.projection {
            Projection::Planar => Ok(ColumnPlan::Planar {
                x: table.require_column(&spec.x_column)?,
                y: table.require_column(&spec.y_column)?,
                // A missing z column places the dataset in the z = 0 plane.
                z: table.column_index(&spec.z_column),
            }),
            Projection::Spherical {
                radius_column,
                longitude_column,
                latitude_column,
                degrees,
            } => Ok(ColumnPlan::Spherical {
                radius: table.require_column(radius_column)?,
                longitude: table.require_column(longitude_column)?,
                latitude: table.require_column(latitude_column)?,
                degrees: *degrees,
            }),
        }
    }

    fn project(&self, table: &Table, row: usize) -> Result<[f64; 3], DropReason> {
        let cell = |column: usize| table.number(row, column).ok_or(DropReason::MissingCoordinate);
        match *self {
            ColumnPlan::Planar { x, y, z } => {
                let z = match z {
                    Some(column) => cell(column)?,
                    None => 0.0,
                };
                Ok([cell(x)?, cell(y)?, z])
            }
            ColumnPlan::Spherical {
                radius,
                longitude,
                latitude,
                degrees,
            } => Ok(spherical_to_cartesian(
                cell(radius)?,
                cell(longitude)?,
                cell(latitude)?,
                degrees,
            )),
        }
    }
}

/// Convert radius, longitude and latitude to Cartesian coordinates.
pub fn spherical_to_cartesian(radius: f64, longitude: f64, latitude: f64, degrees: bool) -> [f64; 3] {
    let (lon, lat) = if degrees {
        (longitude.to_radians(), latitude.to_radians())
    } else {
        (longitude, latitude)
    };
    [
        radius * lat.cos() * lon.cos(),
        radius * lat.cos() * lon.sin(),
        radius * lat.sin(),
    ]
}

fn is_finite(p: &[f64; 3]) -> bool {
    p.iter().all(|v| v.is_finite())
}

/// Transform every row of `table` and place it with `placement`.
/// Fails only when a required coordinate column is absent.
pub fn transform(
    table: &Table,
    spec: &TransformSpec,
    placement: &Placement,
) -> Result<TransformedRows, TableError> {
    let plan = ColumnPlan::resolve(table, spec)?;

    // Per-row work is independent; collect keeps table order.
    let projected: Vec<Result<[f64; 3], DropReason>> = (0..table.len())
        .into_par_iter()
        .map(|row| {
            let raw = plan.project(table, row)?;
            let (x, y, z) = transform_coordinates(&spec.axis, raw[0], raw[1], raw[2]);
            let p = [x, y, z];
            if is_finite(&p) {
                Ok(p)
            } else {
                Err(DropReason::NonFiniteCoordinate)
            }
        })
        .collect();

    let center = match spec.centering {
        Centering::None => [0.0; 3],
        Centering::Fixed(c) => c,
        Centering::Mean => mean(projected.iter().filter_map(|r| r.as_ref().ok())),
    };

    let mut out = TransformedRows {
        center,
        ..Default::default()
    };
    out.drops.add(DropReason::BlankIdentifier, table.blank_ids());

    for (row, result) in projected.into_iter().enumerate() {
        let local = match result {
            Ok(p) => p,
            Err(reason) => {
                out.drops.record(reason);
                continue;
            }
        };
        let placed = placement.apply([
            local[0] - center[0],
            local[1] - center[1],
            local[2] - center[2],
        ]);
        if !is_finite(&placed) {
            out.drops.record(DropReason::NonFiniteCoordinate);
            continue;
        }
        out.rows.push(row);
        out.positions.push(placed);
    }

    debug!(
        table = %table.path().display(),
        placed = out.len(),
        dropped = out.drops.total(),
        "Transformed rows"
    );
    Ok(out)
}

/// Column-wise mean, summed sequentially so repeated runs agree bit for bit.
fn mean<'a>(points: impl Iterator<Item = &'a [f64; 3]>) -> [f64; 3] {
    let mut sum = [0.0; 3];
    let mut count = 0usize;
    for p in points {
        sum[0] += p[0];
        sum[1] += p[1];
        sum[2] += p[2];
        count += 1;
    }
    if count == 0 {
        return [0.0; 3];
    }
    let n = count as f64;
    [sum[0] / n, sum[1] / n, sum[2] / n]
}
