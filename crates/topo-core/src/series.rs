//! Downscaled per-point time series and their chunk concatenation.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopoError};

/// Climate variables for one representative point on an ascending time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    pub point_id: String,
    pub time: Vec<NaiveDateTime>,
    /// Variable name → values aligned with `time`.
    #[serde(deserialize_with = "crate::nan_json::map_of_vecs")]
    pub variables: BTreeMap<String, Vec<f64>>,
}

impl PointSeries {
    pub fn new(point_id: impl Into<String>) -> Self {
        Self {
            point_id: point_id.into(),
            time: Vec::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Every variable matches the time index length and time strictly increases.
    pub fn validate(&self) -> Result<()> {
        for (name, values) in &self.variables {
            if values.len() != self.time.len() {
                return Err(TopoError::Concat(format!(
                    "point {}: variable '{name}' has {} values for {} time steps",
                    self.point_id,
                    values.len(),
                    self.time.len()
                )));
            }
        }
        if let Some(i) = self.time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(TopoError::Concat(format!(
                "point {}: time index not strictly ascending at {}",
                self.point_id,
                self.time[i + 1]
            )));
        }
        Ok(())
    }

    /// True when consecutive steps are exactly `step` apart.
    pub fn is_gap_free(&self, step: Duration) -> bool {
        self.time.windows(2).all(|w| w[1] - w[0] == step)
    }
}

/// Join chunk series, already in chronological order, along time.
///
/// Overlapping or duplicated timestamps are an error. With `step` set, a
/// gap at a chunk boundary is an error too.
pub fn concat(parts: Vec<PointSeries>, step: Option<Duration>) -> Result<PointSeries> {
    let mut parts = parts.into_iter().filter(|p| !p.is_empty());
    let Some(mut out) = parts.next() else {
        return Err(TopoError::Concat("no non-empty chunk to concatenate".into()));
    };
    out.validate()?;

    for part in parts {
        part.validate()?;
        if part.point_id != out.point_id {
            return Err(TopoError::Concat(format!(
                "cannot join point {} onto point {}",
                part.point_id, out.point_id
            )));
        }
        if !part.variables.keys().eq(out.variables.keys()) {
            return Err(TopoError::Concat(format!(
                "point {}: chunks carry different variables",
                out.point_id
            )));
        }
        let last = *out.time.last().ok_or_else(|| TopoError::Concat("empty chunk".into()))?;
        let first = part.time[0];
        if first <= last {
            return Err(TopoError::Concat(format!(
                "point {}: chunk starting {first} overlaps previous chunk ending {last}",
                out.point_id
            )));
        }
        if let Some(step) = step {
            if first - last != step {
                return Err(TopoError::Concat(format!(
                    "point {}: gap between {last} and {first}",
                    out.point_id
                )));
            }
        }
        out.time.extend(part.time);
        for (name, values) in part.variables {
            if let Some(dst) = out.variables.get_mut(&name) {
                dst.extend(values);
            }
        }
    }
    Ok(out)
}
