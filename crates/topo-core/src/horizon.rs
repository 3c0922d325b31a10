//! Horizon angles: the grid-level artifact and its sampling at the
//! representative points.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopoError};
use crate::grid::nearest_index;
use crate::points::{horizon_column, PointTable};

/// Maximum skyline elevation angle (degrees) per azimuth for every cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonGrid {
    /// Azimuths in degrees clockwise from north.
    pub azimuths: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// `angles[a]` is row-major over the grid for azimuth `azimuths[a]`.
    #[serde(deserialize_with = "crate::nan_json::vec_of_vecs")]
    pub angles: Vec<Vec<f64>>,
}

impl HorizonGrid {
    /// Axes must be non-empty and strictly ascending (row 0 = smallest
    /// `y`), and every angle layer must cover the whole grid.
    pub fn validate(&self) -> Result<()> {
        for (axis, coords) in [("x", &self.x), ("y", &self.y)] {
            if coords.is_empty() {
                return Err(TopoError::Config(format!("horizon grid has an empty {axis} axis")));
            }
            if coords.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(TopoError::Config(format!(
                    "horizon grid {axis} coordinates must be strictly ascending"
                )));
            }
        }
        let n = self.x.len() * self.y.len();
        if self.angles.len() != self.azimuths.len() || self.angles.iter().any(|a| a.len() != n) {
            return Err(TopoError::Config(format!(
                "horizon grid shape mismatch: {} azimuths, {} angle layers, {n} cells",
                self.azimuths.len(),
                self.angles.len()
            )));
        }
        Ok(())
    }

    /// Angle at the cell nearest `(x, y)` for azimuth layer `a`.
    pub fn nearest(&self, a: usize, x: f64, y: f64) -> f64 {
        let r = nearest_index(&self.y, y);
        let c = nearest_index(&self.x, x);
        self.angles[a][r * self.x.len() + c]
    }
}

/// `increments` evenly spaced azimuths starting at north.
pub fn azimuths(increments: usize) -> Vec<f64> {
    let step = 360.0 / increments.max(1) as f64;
    (0..increments).map(|i| i as f64 * step).collect()
}

/// Attach `hori_azi_<az>` to every point from its nearest grid cell.
/// Existing horizon columns are overwritten.
pub fn sample_horizon(points: &mut PointTable, horizon: &HorizonGrid) -> Result<()> {
    horizon.validate()?;
    let columns: Vec<String> = horizon.azimuths.iter().map(|&az| horizon_column(az)).collect();
    for p in &mut points.points {
        for (a, col) in columns.iter().enumerate() {
            p.attributes.insert(col.clone(), horizon.nearest(a, p.x, p.y));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::RepresentativePoint;
    use std::collections::BTreeMap;

    fn horizon() -> HorizonGrid {
        let x = vec![0.0, 30.0, 60.0];
        let y = vec![0.0, 30.0];
        let azimuths = azimuths(4);
        let angles = (0..4)
            .map(|a| (0..6).map(|cell| (a * 100 + cell) as f64 + 0.125).collect())
            .collect();
        HorizonGrid { azimuths, x, y, angles }
    }

    fn point(id: &str, x: f64, y: f64) -> RepresentativePoint {
        RepresentativePoint {
            point_id: id.into(),
            x,
            y,
            lon: 0.0,
            lat: 0.0,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn azimuth_steps() {
        assert_eq!(azimuths(4), vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(azimuths(10)[1], 36.0);
    }

    #[test]
    fn point_on_cell_centre_gets_exact_value() {
        let h = horizon();
        let mut table = PointTable::new(vec![point("0", 60.0, 30.0), point("1", 0.0, 0.0)]);
        sample_horizon(&mut table, &h).unwrap();
        for a in 0..4 {
            let col = horizon_column(h.azimuths[a]);
            assert_eq!(table.points[0].attributes[&col], h.angles[a][5]);
            assert_eq!(table.points[1].attributes[&col], h.angles[a][0]);
        }
    }

    #[test]
    fn off_centre_points_use_nearest_cell() {
        let h = horizon();
        let mut table = PointTable::new(vec![point("0", 44.0, 16.0)]);
        sample_horizon(&mut table, &h).unwrap();
        assert_eq!(table.points[0].attributes["hori_azi_90"], h.angles[1][4]);
    }

    #[test]
    fn resampling_overwrites_previous_columns() {
        let mut h = horizon();
        let mut table = PointTable::new(vec![point("0", 0.0, 0.0)]);
        sample_horizon(&mut table, &h).unwrap();
        h.angles[0][0] = 42.0;
        sample_horizon(&mut table, &h).unwrap();
        assert_eq!(table.points[0].attributes["hori_azi_0"], 42.0);
        assert_eq!(table.points[0].attributes.len(), 4);
    }

    #[test]
    fn descending_axes_are_rejected() {
        let h = HorizonGrid {
            azimuths: vec![0.0],
            x: vec![0.0],
            y: vec![30.0, 0.0],
            angles: vec![vec![11.0, 22.0]],
        };
        let mut table = PointTable::new(vec![point("0", 0.0, 0.0)]);
        assert!(matches!(sample_horizon(&mut table, &h), Err(TopoError::Config(_))));
        assert!(table.points[0].attributes.is_empty());
    }

    #[test]
    fn empty_axes_are_rejected() {
        let h = HorizonGrid {
            azimuths: vec![0.0, 180.0],
            x: vec![],
            y: vec![0.0],
            angles: vec![vec![], vec![]],
        };
        let mut table = PointTable::new(vec![point("0", 0.0, 0.0)]);
        assert!(sample_horizon(&mut table, &h).is_err());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut h = horizon();
        h.angles[2].pop();
        let mut table = PointTable::new(vec![point("0", 0.0, 0.0)]);
        assert!(sample_horizon(&mut table, &h).is_err());
    }
}
