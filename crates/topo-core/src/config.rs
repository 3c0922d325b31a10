//! Project configuration, loaded once from YAML and never mutated.
//!
//! Layout on disk (defaults, every directory overridable):
//! ```text
//! project/
//!     config.yml
//!     inputs/dem/        DEM + point lists
//!     inputs/climate/    upstream climate files (tmp/ for scratch)
//!     outputs/           cached artifacts (tmp/ for scratch)
//!     outputs/downscaled/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopoError};

// ── Top level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    #[serde(default)]
    pub climate: ClimateSection,
    pub dem: DemSection,
    pub sampling: SamplingMethod,
    #[serde(default)]
    pub toposcale: ToposcaleSection,
    #[serde(default)]
    pub outputs: OutputsSection,
    #[serde(default)]
    pub clean_up: CleanUpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
    /// Project root. Defaults to the current working directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// `[latN, latS, lonW, lonE]`; derived from the DEM when absent.
    #[serde(default)]
    pub extent: Option<[f64; 4]>,
    #[serde(default)]
    pub split: SplitSection,
    /// Worker threads for clustering and per-point work; 0 = all cores.
    #[serde(default)]
    pub cpu_cores: usize,
    /// Name of the upstream climate product, informational.
    #[serde(default = "default_climate_name")]
    pub climate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_split_years")]
    pub years: u32,
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            enabled: false,
            years: default_split_years(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_timestep_hours")]
    pub timestep_hours: u32,
    #[serde(default)]
    pub precip_lapse_rate: bool,
    /// Clamp `end` to the last complete day available upstream.
    #[serde(default)]
    pub realtime: bool,
}

impl Default for ClimateSection {
    fn default() -> Self {
        Self {
            path: None,
            timestep_hours: default_timestep_hours(),
            precip_lapse_rate: false,
            realtime: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemSection {
    pub file: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_epsg")]
    pub epsg: u32,
    #[serde(default = "default_horizon_increments")]
    pub horizon_increments: usize,
}

// ── Sampling strategies ──────────────────────────────────────────────────────

/// How representative points are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Use an explicit list of coordinates.
    #[serde(alias = "point")]
    Points {
        csv_file: PathBuf,
        #[serde(default)]
        id_column: Option<String>,
        #[serde(default)]
        interpolation: Interpolation,
    },
    /// Cluster the terrain grid and keep one point per cluster.
    Toposub {
        clustering_features: Vec<String>,
        n_clusters: usize,
        #[serde(default)]
        clustering_method: ClusteringMethod,
        #[serde(default = "default_random_seed")]
        random_seed: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ClusteringMethod {
    #[serde(alias = "kmean")]
    Kmeans {
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
    #[serde(alias = "minibatchkmean")]
    MiniBatchKmeans {
        #[serde(default = "default_batch_size")]
        batch_size: usize,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
}

impl Default for ClusteringMethod {
    fn default() -> Self {
        ClusteringMethod::Kmeans {
            max_iter: default_max_iter(),
        }
    }
}

// ── Downscaling parameters ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToposcaleSection {
    #[serde(default)]
    pub interpolation_method: TransferInterpolation,
    #[serde(default = "default_true")]
    pub lw_terrain_contribution: bool,
}

impl Default for ToposcaleSection {
    fn default() -> Self {
        Self {
            interpolation_method: TransferInterpolation::default(),
            lw_terrain_contribution: true,
        }
    }
}

/// Horizontal interpolation of coarse climate cells to a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferInterpolation {
    #[default]
    Idw,
    Linear,
}

// ── Outputs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputsSection {
    /// Overrides `outputs/downscaled`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file: OutputFiles,
}

/// Filename templates for every persisted artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFiles {
    #[serde(default)]
    pub clean_outputs: bool,
    #[serde(default)]
    pub clean_sims: bool,
    #[serde(default = "default_ds_param")]
    pub ds_param: String,
    #[serde(default = "default_df_centroids")]
    pub df_centroids: String,
    #[serde(default = "default_ds_solar")]
    pub ds_solar: String,
    #[serde(default = "default_da_horizon")]
    pub da_horizon: String,
    /// Per-point final file; `*` is replaced by the point id.
    #[serde(default = "default_downscaled_pt")]
    pub downscaled_pt: String,
}

impl Default for OutputFiles {
    fn default() -> Self {
        Self {
            clean_outputs: false,
            clean_sims: false,
            ds_param: default_ds_param(),
            df_centroids: default_df_centroids(),
            ds_solar: default_ds_solar(),
            da_horizon: default_da_horizon(),
            downscaled_pt: default_downscaled_pt(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanUpSection {
    #[serde(default)]
    pub delete_tmp_dirs: bool,
}

fn default_climate_name() -> String { "era5".into() }
fn default_split_years() -> u32 { 1 }
fn default_timestep_hours() -> u32 { 1 }
fn default_epsg() -> u32 { 4326 }
fn default_horizon_increments() -> usize { 10 }
fn default_random_seed() -> u64 { 2 }
fn default_max_iter() -> usize { 300 }
fn default_batch_size() -> usize { 1024 }
fn default_true() -> bool { true }
fn default_ds_param() -> String { "ds_param.json".into() }
fn default_df_centroids() -> String { "df_centroids.json".into() }
fn default_ds_solar() -> String { "ds_solar.json".into() }
fn default_da_horizon() -> String { "da_horizon.json".into() }
fn default_downscaled_pt() -> String { "down_pt_*.json".into() }

impl ProjectConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: ProjectConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TopoError::MissingFile(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|e| TopoError::io(path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.start > self.project.end {
            return Err(TopoError::InvalidDateRange(format!(
                "project.start {} is after project.end {}",
                self.project.start, self.project.end
            )));
        }
        if self.project.split.enabled && self.project.split.years == 0 {
            return Err(TopoError::Config("project.split.years must be >= 1".into()));
        }
        if self.climate.timestep_hours == 0 {
            return Err(TopoError::Config("climate.timestep_hours must be >= 1".into()));
        }
        if !self.outputs.file.downscaled_pt.contains('*') {
            return Err(TopoError::WildcardMissing(self.outputs.file.downscaled_pt.clone()));
        }
        if self.dem.horizon_increments == 0 {
            return Err(TopoError::Config("dem.horizon_increments must be >= 1".into()));
        }
        if let SamplingMethod::Toposub {
            clustering_features,
            n_clusters,
            clustering_method,
            ..
        } = &self.sampling
        {
            if clustering_features.is_empty() {
                return Err(TopoError::Config(
                    "sampling.clustering_features must name at least one field".into(),
                ));
            }
            if *n_clusters == 0 {
                return Err(TopoError::Config("sampling.n_clusters must be >= 1".into()));
            }
            if let ClusteringMethod::MiniBatchKmeans { batch_size: 0, .. } = clustering_method {
                return Err(TopoError::Config("clustering_method.batch_size must be >= 1".into()));
            }
        }
        if let Some(ext) = self.project.extent {
            Extent::from_nswe(ext).validate()?;
        }
        Ok(())
    }

    pub fn timestep(&self) -> Duration {
        Duration::hours(i64::from(self.climate.timestep_hours))
    }
}

// ── Extent ───────────────────────────────────────────────────────────────────

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub lat_n: f64,
    pub lat_s: f64,
    pub lon_w: f64,
    pub lon_e: f64,
}

impl Extent {
    /// From the config ordering `[latN, latS, lonW, lonE]`.
    pub fn from_nswe(v: [f64; 4]) -> Self {
        Self {
            lat_n: v[0],
            lat_s: v[1],
            lon_w: v[2],
            lon_e: v[3],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lat_n > self.lat_s) || !(self.lon_e > self.lon_w) {
            return Err(TopoError::Config(format!(
                "extent must satisfy latN > latS and lonE > lonW, got {self:?}"
            )));
        }
        Ok(())
    }

    /// Grow the box by `margin` degrees on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            lat_n: self.lat_n + margin,
            lat_s: self.lat_s - margin,
            lon_w: self.lon_w - margin,
            lon_e: self.lon_e + margin,
        }
    }
}

/// Explicit extent wins; otherwise the one derived from the DEM; neither is
/// a fatal configuration error.
pub fn resolve_extent(configured: Option<[f64; 4]>, from_dem: Option<Extent>) -> Result<Extent> {
    match (configured, from_dem) {
        (Some(v), _) => {
            let e = Extent::from_nswe(v);
            e.validate()?;
            Ok(e)
        }
        (None, Some(e)) => {
            e.validate()?;
            Ok(e)
        }
        (None, None) => Err(TopoError::MissingExtent),
    }
}

// ── Derived paths ────────────────────────────────────────────────────────────

/// Every directory and artifact path the pipeline touches, derived once.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPaths {
    pub project: PathBuf,
    pub outputs: PathBuf,
    pub outputs_tmp: PathBuf,
    pub downscaled: PathBuf,
    pub climate: PathBuf,
    pub climate_tmp: PathBuf,
    pub dem_dir: PathBuf,
    pub dem_file: PathBuf,
}

impl ProjectPaths {
    pub fn from_config(cfg: &ProjectConfig) -> Result<Self> {
        let project = match &cfg.project.directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| TopoError::io(".", e))?,
        };
        let outputs = project.join("outputs");
        let outputs_tmp = outputs.join("tmp");
        let downscaled = match &cfg.outputs.directory {
            Some(dir) => dir.clone(),
            None => outputs.join("downscaled"),
        };
        let climate = match &cfg.climate.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project.join(p),
            None => project.join("inputs").join("climate"),
        };
        let climate_tmp = climate.join("tmp");
        let dem_dir = match &cfg.dem.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project.join(p),
            None => project.join("inputs").join("dem"),
        };
        let dem_file = dem_dir.join(&cfg.dem.file);
        Ok(Self {
            project,
            outputs,
            outputs_tmp,
            downscaled,
            climate,
            climate_tmp,
            dem_dir,
            dem_file,
        })
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            &self.climate,
            &self.climate_tmp,
            &self.outputs,
            &self.outputs_tmp,
            &self.downscaled,
            &self.dem_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| TopoError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.outputs.join(name)
    }
}
