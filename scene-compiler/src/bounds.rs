//! Axis-aligned extent of a placed dataset, as recorded in the scene index.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Rows per parallel chunk when reducing bounds.
const BOUNDS_CHUNK: usize = 25_000;

/// Lowest and highest corner of a dataset in scene units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl DatasetBounds {
    fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Reduce placed positions chunk by chunk. Min and max do not depend on
    /// chunk order, so the result is the same on every run.
    pub fn from_positions(positions: &[[f64; 3]]) -> Self {
        positions
            .par_chunks(BOUNDS_CHUNK)
            .map(|chunk| {
                let mut local = DatasetBounds::empty();
                for p in chunk {
                    local.include(p);
                }
                local
            })
            .reduce(DatasetBounds::empty, |mut a, b| {
                a.merge(&b);
                a
            })
    }

    fn include(&mut self, p: &[f64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn merge(&mut self, other: &DatasetBounds) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// True when no position was seen.
    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bounds() {
        let bounds = DatasetBounds::from_positions(&[]);
        assert!(bounds.is_empty());
    }

    #[test]
    fn test_bounds_over_positions() {
        let positions = [[1.0, -2.0, 3.0], [-1.0, 4.0, 0.5], [0.0, 0.0, 10.0]];
        let bounds = DatasetBounds::from_positions(&positions);

        assert!(!bounds.is_empty());
        assert_eq!(bounds.min, [-1.0, -2.0, 0.5]);
        assert_eq!(bounds.max, [1.0, 4.0, 10.0]);
    }

    #[test]
    fn test_bounds_across_chunks() {
        let positions: Vec<[f64; 3]> = (0..60_000).map(|i| [i as f64, 0.0, -(i as f64)]).collect();
        let bounds = DatasetBounds::from_positions(&positions);

        assert_eq!(bounds.max[0], 59_999.0);
        assert_eq!(bounds.min[2], -59_999.0);
    }

    #[test]
    fn test_merge_widens_both_corners() {
        let mut a = DatasetBounds::from_positions(&[[0.0, 0.0, 0.0]]);
        let b = DatasetBounds::from_positions(&[[2.0, -3.0, 1.0]]);
        a.merge(&b);

        assert_eq!(a.min, [0.0, -3.0, 0.0]);
        assert_eq!(a.max, [2.0, 0.0, 1.0]);
    }
}
