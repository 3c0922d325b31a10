//! Climate "retrieval" from a local single-cell forcing file.
//!
//! `inputs/climate/forcing.json`:
//! `{"elevation": 1820.0, "time": ["2019-01-01T00:00:00", ...], "variables": {"t": [...], "tp": [...], "sw": [...]}}`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use topo_core::{ClimateRequest, ClimateSource};

pub const FORCING_FILE: &str = "forcing.json";

fn null_as_nan_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<BTreeMap<String, Vec<f64>>, D::Error> {
    let m: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::deserialize(d)?;
    Ok(m.into_iter()
        .map(|(k, v)| (k, v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()))
        .collect())
}

/// Coarse-cell climate forcing at a reference elevation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forcing {
    /// Elevation (m) the forcing is valid at.
    pub elevation: f64,
    pub time: Vec<NaiveDateTime>,
    #[serde(deserialize_with = "null_as_nan_map")]
    pub variables: BTreeMap<String, Vec<f64>>,
}

impl Forcing {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FORCING_FILE);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading climate forcing {}", path.display()))?;
        let forcing: Forcing = serde_json::from_str(&text)
            .with_context(|| format!("parsing climate forcing {}", path.display()))?;
        for (name, values) in &forcing.variables {
            ensure!(
                values.len() == forcing.time.len(),
                "forcing variable '{name}' has {} values for {} time steps",
                values.len(),
                forcing.time.len()
            );
        }
        ensure!(!forcing.time.is_empty(), "forcing file {} has no time steps", path.display());
        Ok(forcing)
    }

    /// Spacing of the first two steps; one hour for a single step.
    pub fn step(&self) -> Duration {
        match self.time.as_slice() {
            [a, b, ..] => *b - *a,
            _ => Duration::hours(1),
        }
    }

    /// Last date whose final time step is present.
    pub fn last_full_day(&self) -> Option<NaiveDate> {
        let last = *self.time.last()?;
        if (last + self.step()).date() > last.date() {
            Some(last.date())
        } else {
            last.date().pred_opt()
        }
    }
}

/// Climate source that only checks the local forcing covers the request.
#[derive(Debug, Clone)]
pub struct LocalClimateArchive {
    climate_dir: PathBuf,
}

impl LocalClimateArchive {
    pub fn new(climate_dir: impl Into<PathBuf>) -> Self {
        Self {
            climate_dir: climate_dir.into(),
        }
    }
}

impl ClimateSource for LocalClimateArchive {
    fn retrieve(&self, request: &ClimateRequest) -> Result<()> {
        let forcing = Forcing::load(&request.climate_dir)?;
        let (Some(first), Some(last)) = (forcing.time.first(), forcing.time.last()) else {
            bail!("forcing file has no time steps");
        };
        ensure!(
            first.date() <= request.start && last.date() >= request.end,
            "forcing covers {} to {}, project needs {} to {}",
            first.date(),
            last.date(),
            request.start,
            request.end
        );
        ensure!(
            forcing.step() == request.timestep,
            "forcing time step is {} h, config asks for {} h",
            forcing.step().num_hours(),
            request.timestep.num_hours()
        );
        tracing::info!(
            north = request.bbox.lat_n,
            south = request.bbox.lat_s,
            west = request.bbox.lon_w,
            east = request.bbox.lon_e,
            "local forcing covers the requested box and period"
        );
        Ok(())
    }

    fn last_full_day(&self) -> Result<NaiveDate> {
        Forcing::load(&self.climate_dir)?
            .last_full_day()
            .context("forcing file has no complete day")
    }
}
