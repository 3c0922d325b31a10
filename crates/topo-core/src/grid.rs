use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::Interpolation;
use crate::error::{Result, TopoError};

/// Name of the per-cell cluster assignment written back by the sampler.
pub const CLUSTER_LABELS: &str = "cluster_labels";

/// Named terrain attributes on a regular grid, row-major.
/// Coordinates are cell centres, strictly ascending; row 0 = smallest `y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainGrid {
    pub width: usize,
    pub height: usize,
    /// Cell-centre x coordinates, length `width`.
    pub x: Vec<f64>,
    /// Cell-centre y coordinates, length `height`.
    pub y: Vec<f64>,
    /// Attribute name → row-major values, each of length `width × height`.
    /// NaN marks nodata and round-trips through JSON as `null`.
    #[serde(deserialize_with = "crate::nan_json::map_of_vecs")]
    pub fields: BTreeMap<String, Vec<f64>>,
    /// Cluster id per cell; `None` for cells excluded from clustering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_labels: Option<Vec<Option<usize>>>,
}

impl TerrainGrid {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.is_empty() || y.is_empty() {
            return Err(TopoError::Config("terrain grid must have at least one cell".into()));
        }
        for (axis, coords) in [("x", &x), ("y", &y)] {
            if coords.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(TopoError::Config(format!(
                    "terrain grid {axis} coordinates must be strictly ascending"
                )));
            }
        }
        Ok(Self {
            width: x.len(),
            height: y.len(),
            x,
            y,
            fields: BTreeMap::new(),
            cluster_labels: None,
        })
    }

    /// Evenly spaced `width × height` grid; `(x0, y0)` is the first cell centre.
    pub fn regular(width: usize, height: usize, x0: f64, y0: f64, dx: f64, dy: f64) -> Result<Self> {
        let x = (0..width).map(|c| x0 + c as f64 * dx).collect();
        let y = (0..height).map(|r| y0 + r as f64 * dy).collect();
        Self::new(x, y)
    }

    pub fn with_field(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        self.insert_field(name, values)?;
        Ok(self)
    }

    pub fn insert_field(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.n_cells() {
            return Err(TopoError::Config(format!(
                "field '{name}' has {} values, grid has {} cells",
                values.len(),
                self.n_cells()
            )));
        }
        if name == "x" || name == "y" || name == CLUSTER_LABELS {
            return Err(TopoError::Config(format!("'{name}' is a reserved field name")));
        }
        self.fields.insert(name.to_string(), values);
        Ok(())
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn cell_xy(&self, idx: usize) -> (f64, f64) {
        (self.x[idx % self.width], self.y[idx / self.width])
    }

    /// Attribute columns available for sampling: `x`, `y`, then every field.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = vec!["x".to_string(), "y".to_string()];
        names.extend(self.fields.keys().cloned());
        names
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == "x" || name == "y" || self.fields.contains_key(name)
    }

    /// Value of column `name` at cell `idx`; `x`/`y` come from the coordinates.
    pub fn value(&self, name: &str, idx: usize) -> Option<f64> {
        match name {
            "x" => Some(self.cell_xy(idx).0),
            "y" => Some(self.cell_xy(idx).1),
            _ => self.fields.get(name).map(|v| v[idx]),
        }
    }

    /// True when `(x, y)` lies within the outer cell edges.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (x_lo, x_hi) = axis_bounds(&self.x);
        let (y_lo, y_hi) = axis_bounds(&self.y);
        x >= x_lo && x <= x_hi && y >= y_lo && y <= y_hi
    }

    /// Row and column of the cell whose centre is nearest to `(x, y)`.
    /// Positions outside the grid snap to the edge cell.
    pub fn nearest_cell(&self, x: f64, y: f64) -> (usize, usize) {
        (nearest_index(&self.y, y), nearest_index(&self.x, x))
    }

    /// Sample field `name` at `(x, y)`.
    pub fn sample(&self, name: &str, x: f64, y: f64, method: Interpolation) -> Option<f64> {
        if !self.has_column(name) {
            return None;
        }
        match method {
            Interpolation::Nearest => {
                let (r, c) = self.nearest_cell(x, y);
                self.value(name, self.index(r, c))
            }
            Interpolation::Linear => self.sample_bilinear(name, x, y),
        }
    }

    fn sample_bilinear(&self, name: &str, x: f64, y: f64) -> Option<f64> {
        let (c0, c1, tx) = bracket(&self.x, x);
        let (r0, r1, ty) = bracket(&self.y, y);

        let v00 = self.value(name, self.index(r0, c0))?;
        let v10 = self.value(name, self.index(r0, c1))?;
        let v01 = self.value(name, self.index(r1, c0))?;
        let v11 = self.value(name, self.index(r1, c1))?;

        Some(
            v00 * (1.0 - tx) * (1.0 - ty)
                + v10 * tx * (1.0 - ty)
                + v01 * (1.0 - tx) * ty
                + v11 * tx * ty,
        )
    }
}

fn half_step(coords: &[f64]) -> f64 {
    if coords.len() > 1 {
        (coords[1] - coords[0]).abs() / 2.0
    } else {
        0.5
    }
}

fn axis_bounds(coords: &[f64]) -> (f64, f64) {
    let h = half_step(coords);
    (coords[0] - h, coords[coords.len() - 1] + h)
}

/// Index of the coordinate nearest to `v`. Ties go to the lower index.
pub(crate) fn nearest_index(coords: &[f64], v: f64) -> usize {
    let i = coords.partition_point(|&c| c < v);
    if i == 0 {
        0
    } else if i == coords.len() {
        coords.len() - 1
    } else if (v - coords[i - 1]) <= (coords[i] - v) {
        i - 1
    } else {
        i
    }
}

/// Lower/upper neighbour indices around `v` and the fractional weight of the
/// upper one, clamped to the grid.
fn bracket(coords: &[f64], v: f64) -> (usize, usize, f64) {
    let n = coords.len();
    if n == 1 || v <= coords[0] {
        return (0, 0, 0.0);
    }
    if v >= coords[n - 1] {
        return (n - 1, n - 1, 0.0);
    }
    let i = coords.partition_point(|&c| c <= v);
    let (lo, hi) = (i - 1, i);
    let t = (v - coords[lo]) / (coords[hi] - coords[lo]);
    (lo, hi, t)
}
