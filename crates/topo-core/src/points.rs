//! Representative-point table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix of the per-azimuth horizon columns, e.g. `hori_azi_36`.
pub const HORIZON_PREFIX: &str = "hori_azi_";

/// One sample location standing in for a region of terrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativePoint {
    pub point_id: String,
    /// Grid coordinates (DEM reference system).
    pub x: f64,
    pub y: f64,
    #[serde(deserialize_with = "crate::nan_json::number")]
    pub lon: f64,
    #[serde(deserialize_with = "crate::nan_json::number")]
    pub lat: f64,
    /// Terrain attributes in physical units, plus horizon columns.
    #[serde(deserialize_with = "crate::nan_json::map_of_numbers")]
    pub attributes: BTreeMap<String, f64>,
}

impl RepresentativePoint {
    pub fn attribute(&self, name: &str) -> Option<f64> {
        match name {
            "x" => Some(self.x),
            "y" => Some(self.y),
            _ => self.attributes.get(name).copied(),
        }
    }

    /// Horizon angles as `(azimuth°, angle°)`, ascending azimuth.
    pub fn horizon(&self) -> Vec<(f64, f64)> {
        let mut out: Vec<(f64, f64)> = self
            .attributes
            .iter()
            .filter_map(|(k, &v)| {
                k.strip_prefix(HORIZON_PREFIX)
                    .and_then(|az| az.parse::<f64>().ok())
                    .map(|az| (az, v))
            })
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointTable {
    pub points: Vec<RepresentativePoint>,
}

impl PointTable {
    pub fn new(points: Vec<RepresentativePoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.points.iter().map(|p| p.point_id.as_str())
    }

    pub fn get(&self, point_id: &str) -> Option<&RepresentativePoint> {
        self.points.iter().find(|p| p.point_id == point_id)
    }
}

/// Column name for one horizon azimuth. Whole-degree azimuths print
/// without a fractional part.
pub fn horizon_column(azimuth: f64) -> String {
    if azimuth.fract() == 0.0 {
        format!("{HORIZON_PREFIX}{}", azimuth as i64)
    } else {
        format!("{HORIZON_PREFIX}{azimuth}")
    }
}

/// Zero-padded ids for indices `0..n` (or `1..=n` with `one_based`); the
/// width is the digit count of the largest index so lexicographic and
/// numeric order coincide.
pub fn padded_ids(n: usize, one_based: bool) -> Vec<String> {
    let offset = usize::from(one_based);
    let max = (n + offset).saturating_sub(1);
    let width = max.to_string().len();
    (0..n).map(|i| format!("{:0width$}", i + offset)).collect()
}
