//! Seams to the external computations the pipeline drives but does not own:
//! terrain attributes, climate retrieval, horizons, solar geometry, the
//! downscaling transfer function and coordinate transforms.
//!
//! Collaborators report failures as `anyhow::Error`; the pipeline wraps them
//! in [`TopoError::Collaborator`](crate::error::TopoError) and never retries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::{Extent, TransferInterpolation};
use crate::grid::TerrainGrid;
use crate::horizon::HorizonGrid;
use crate::points::PointTable;
use crate::series::PointSeries;

// ── Artifacts exchanged with collaborators ───────────────────────────────────

/// Sun position per point and time step over one date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarGeometry {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub time: Vec<NaiveDateTime>,
    /// Point id → sun position aligned with `time`.
    pub points: BTreeMap<String, SunPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunPosition {
    /// Degrees above the horizon.
    #[serde(deserialize_with = "crate::nan_json::vec")]
    pub elevation: Vec<f64>,
    /// Degrees clockwise from north.
    #[serde(deserialize_with = "crate::nan_json::vec")]
    pub azimuth: Vec<f64>,
}

/// What the climate source is asked to make available locally.
#[derive(Debug, Clone)]
pub struct ClimateRequest {
    /// Project extent grown by the retrieval margin.
    pub bbox: Extent,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timestep: Duration,
    pub climate_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub workers: usize,
}

/// One downscaling call: a full chunk (or the whole period) for every point.
#[derive(Debug, Clone, Copy)]
pub struct DownscaleRequest<'a> {
    pub points: &'a PointTable,
    pub horizon: &'a HorizonGrid,
    pub solar: &'a SolarGeometry,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timestep: Duration,
    pub interpolation: TransferInterpolation,
    pub lw_terrain_contribution: bool,
    pub precip_lapse_rate: bool,
    pub climate_dir: &'a Path,
    pub epsg: u32,
    /// Pattern the returned series will be stored under, `*` = point id.
    pub output_pattern: &'a str,
    pub workers: usize,
}

// ── Traits ───────────────────────────────────────────────────────────────────

pub trait TerrainSource {
    /// Terrain attributes (elevation, slope, aspect, …) on the DEM grid.
    fn compute(&self, dem: &Path) -> anyhow::Result<TerrainGrid>;

    /// Geographic extent covered by the DEM, if it can tell.
    fn extent(&self, dem: &Path) -> anyhow::Result<Option<Extent>>;
}

pub trait ClimateSource {
    fn retrieve(&self, request: &ClimateRequest) -> anyhow::Result<()>;

    /// Most recent day for which upstream data is complete.
    fn last_full_day(&self) -> anyhow::Result<NaiveDate>;
}

pub trait HorizonSource {
    fn compute(&self, dem: &Path, increments: usize, workers: usize) -> anyhow::Result<HorizonGrid>;
}

pub trait SolarSource {
    fn compute(
        &self,
        points: &PointTable,
        start: NaiveDate,
        end: NaiveDate,
        timestep: Duration,
        epsg: u32,
        workers: usize,
    ) -> anyhow::Result<SolarGeometry>;
}

pub trait Downscaler {
    /// One series per point covering `[start, end]`.
    fn downscale(&self, request: &DownscaleRequest<'_>) -> anyhow::Result<Vec<PointSeries>>;
}

pub trait CoordinateTransform {
    /// Grid coordinates in `epsg` to `(lon, lat)` degrees.
    fn to_lonlat(&self, x: f64, y: f64, epsg: u32) -> anyhow::Result<(f64, f64)>;
}

/// Transform for grids already in geographic coordinates (EPSG:4326).
#[derive(Debug, Clone, Copy, Default)]
pub struct GeographicIdentity;

impl CoordinateTransform for GeographicIdentity {
    fn to_lonlat(&self, x: f64, y: f64, epsg: u32) -> anyhow::Result<(f64, f64)> {
        anyhow::ensure!(
            epsg == 4326,
            "no projection support for EPSG:{epsg}; supply a CoordinateTransform for it"
        );
        Ok((x, y))
    }
}

/// Every collaborator one pipeline run needs.
pub struct Collaborators {
    pub terrain: Box<dyn TerrainSource>,
    pub climate: Box<dyn ClimateSource>,
    pub horizon: Box<dyn HorizonSource>,
    pub solar: Box<dyn SolarSource>,
    pub downscaler: Box<dyn Downscaler>,
    pub transform: Box<dyn CoordinateTransform>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_only_accepts_geographic_grids() {
        assert_eq!(GeographicIdentity.to_lonlat(7.5, 46.2, 4326).unwrap(), (7.5, 46.2));
        assert!(GeographicIdentity.to_lonlat(600_000.0, 5_100_000.0, 32632).is_err());
    }

    #[test]
    fn solar_nodata_survives_json() {
        let t0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let solar = SolarGeometry {
            start: t0.date(),
            end: t0.date(),
            time: vec![t0, t0 + Duration::hours(1)],
            points: BTreeMap::from([(
                "0".to_string(),
                SunPosition {
                    elevation: vec![-12.0, f64::NAN],
                    azimuth: vec![10.0, 25.0],
                },
            )]),
        };
        let text = serde_json::to_string(&solar).unwrap();
        let back: SolarGeometry = serde_json::from_str(&text).unwrap();
        assert!(back.points["0"].elevation[1].is_nan());
        assert_eq!(back.time, solar.time);
    }
}
