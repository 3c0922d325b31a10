//! The project facade: immutable configuration, derived paths, the worker
//! pool, the collaborators and the artifacts produced so far.
//!
//! Stages run in a fixed order (see [`Project::run_all`]):
//!
//! ```text
//! get_climate → compute_dem_param → extract_topo_param →
//! compute_horizon → compute_solar_geometry → downscale_climate
//! ```
//!
//! Every cached stage loads its artifact when the file exists and computes
//! it otherwise. Nothing checks whether inputs changed since the artifact
//! was written; set `outputs.file.clean_outputs` to start over.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::cache::{self, CacheOutcome};
use crate::collaborators::{ClimateRequest, Collaborators, DownscaleRequest, SolarGeometry};
use crate::config::{resolve_extent, Extent, ProjectConfig, ProjectPaths, SamplingMethod};
use crate::downscale::DownscaleCoordinator;
use crate::error::{Result, TopoError};
use crate::grid::TerrainGrid;
use crate::horizon::{sample_horizon, HorizonGrid};
use crate::points::PointTable;
use crate::pool::WorkerPool;
use crate::sampler::{self, points as direct, ClusterScore, ClusterSpec};
use crate::series::PointSeries;
use crate::timesplit::TimeSplitter;

/// Degrees added on every side of the project extent for climate retrieval.
pub const CLIMATE_MARGIN_DEG: f64 = 0.4;

/// Artifacts produced so far, handed from stage to stage.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub terrain: Option<TerrainGrid>,
    pub points: Option<PointTable>,
    /// Solar geometry of the last date range resolved.
    pub solar: Option<SolarGeometry>,
    pub horizon: Option<HorizonGrid>,
    /// Final downscaled series keyed by point id.
    pub downscaled: BTreeMap<String, PointSeries>,
}

/// One solar/downscaling unit of work: a chunk, or the whole period when
/// splitting is off.
#[derive(Debug, Clone)]
struct Period {
    start: NaiveDate,
    end: NaiveDate,
    solar_file: String,
    downscaled_pattern: String,
}

pub struct Project {
    config: ProjectConfig,
    paths: ProjectPaths,
    pool: WorkerPool,
    collaborators: Collaborators,
    extent: Extent,
    start: NaiveDate,
    /// May move earlier than `config.project.end` in realtime mode.
    end: NaiveDate,
    splitter: Option<TimeSplitter>,
    pub state: PipelineState,
}

impl Project {
    /// Validate the configuration, apply the clean flags, create the
    /// directory tree and resolve the spatial extent.
    pub fn setup(config: ProjectConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let paths = ProjectPaths::from_config(&config)?;

        if config.outputs.file.clean_outputs {
            cache::clean_outputs(&paths)?;
        }
        if config.outputs.file.clean_sims {
            cache::clean_simulations(&paths.project);
        }
        paths.create_dirs()?;

        let from_dem = if config.project.extent.is_none() && paths.dem_file.is_file() {
            collaborators.terrain.extent(&paths.dem_file)?
        } else {
            None
        };
        let extent = resolve_extent(config.project.extent, from_dem)?;
        info!(
            north = extent.lat_n,
            south = extent.lat_s,
            west = extent.lon_w,
            east = extent.lon_e,
            "project extent"
        );

        let pool = WorkerPool::new(config.project.cpu_cores)?;
        let (start, end) = (config.project.start, config.project.end);
        let mut project = Self {
            config,
            paths,
            pool,
            collaborators,
            extent,
            start,
            end,
            splitter: None,
            state: PipelineState::default(),
        };
        project.splitter = project.build_splitter()?;
        Ok(project)
    }

    /// Load the YAML config at `path` and [`setup`](Self::setup) the project.
    pub fn open(path: &Path, collaborators: Collaborators) -> Result<Self> {
        Self::setup(ProjectConfig::from_file(path)?, collaborators)
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Effective `(start, end)` of the run.
    pub fn period(&self) -> (NaiveDate, NaiveDate) {
        (self.start, self.end)
    }

    pub fn splitter(&self) -> Option<&TimeSplitter> {
        self.splitter.as_ref()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn build_splitter(&self) -> Result<Option<TimeSplitter>> {
        let split = &self.config.project.split;
        if !split.enabled {
            return Ok(None);
        }
        let files = &self.config.outputs.file;
        TimeSplitter::new(self.start, self.end, split.years, &files.ds_solar, &files.downscaled_pt)
            .map(Some)
    }

    fn periods(&self) -> Vec<Period> {
        match &self.splitter {
            Some(s) => s
                .chunks
                .iter()
                .zip(&s.solar_files)
                .zip(&s.downscaled_files)
                .map(|((c, solar), down)| Period {
                    start: c.start,
                    end: c.end,
                    solar_file: solar.clone(),
                    downscaled_pattern: down.clone(),
                })
                .collect(),
            None => vec![Period {
                start: self.start,
                end: self.end,
                solar_file: self.config.outputs.file.ds_solar.clone(),
                downscaled_pattern: self.config.outputs.file.downscaled_pt.clone(),
            }],
        }
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    /// Ask the climate source for the project period over the extent grown
    /// by [`CLIMATE_MARGIN_DEG`].
    ///
    /// In realtime mode the end date is first pulled back to the last
    /// complete upstream day and the downscaled directory is wiped, since
    /// final files cannot be appended to.
    pub fn get_climate(&mut self) -> Result<()> {
        if self.config.climate.realtime {
            let last = self.collaborators.climate.last_full_day()?;
            if last < self.end {
                self.end = last;
            }
            if self.end < self.start {
                return Err(TopoError::InvalidDateRange(format!(
                    "last complete upstream day {last} precedes project start {}",
                    self.start
                )));
            }
            cache::remove_dir_best_effort(&self.paths.downscaled);
            fs::create_dir_all(&self.paths.downscaled)
                .map_err(|e| TopoError::io(&self.paths.downscaled, e))?;
            self.splitter = self.build_splitter()?;
            info!(end = %self.end, "realtime run, end set to last complete day");
        }

        let request = ClimateRequest {
            bbox: self.extent.expanded(CLIMATE_MARGIN_DEG),
            start: self.start,
            end: self.end,
            timestep: self.config.timestep(),
            climate_dir: self.paths.climate.clone(),
            tmp_dir: self.paths.climate_tmp.clone(),
            workers: self.pool.workers(),
        };
        info!(
            product = %self.config.project.climate,
            start = %request.start,
            end = %request.end,
            "retrieving climate"
        );
        self.collaborators.climate.retrieve(&request)?;
        Ok(())
    }

    /// Terrain attributes of the DEM, cached under `ds_param`.
    pub fn compute_dem_param(&mut self) -> Result<CacheOutcome> {
        let path = self.paths.output(&self.config.outputs.file.ds_param);
        let dem = &self.paths.dem_file;
        let terrain = &self.collaborators.terrain;
        let (grid, outcome) = cache::load_or_compute(&path, || {
            if !dem.is_file() {
                return Err(TopoError::MissingFile(dem.clone()));
            }
            Ok(terrain.compute(dem)?)
        })?;
        info!(
            width = grid.width,
            height = grid.height,
            fields = grid.fields.len(),
            "terrain parameters ready"
        );
        self.state.terrain = Some(grid);
        Ok(outcome)
    }

    /// Representative points, cached under `df_centroids`.
    ///
    /// Cluster mode also writes `cluster_labels` into the terrain grid and
    /// re-persists it. Either mode fills `lon`/`lat` through the coordinate
    /// transform before saving.
    pub fn extract_topo_param(&mut self) -> Result<CacheOutcome> {
        let files = &self.config.outputs.file;
        let path = self.paths.output(&files.df_centroids);
        if let Some(points) = cache::load_if_exists::<PointTable>(&path)? {
            info!(path = %path.display(), n_points = points.len(), "representative points exist, loaded");
            self.state.points = Some(points);
            return Ok(CacheOutcome::Hit);
        }

        let grid = self
            .state
            .terrain
            .as_mut()
            .ok_or(TopoError::MissingArtifact("terrain grid"))?;
        let mut points = match &self.config.sampling {
            SamplingMethod::Points {
                csv_file,
                id_column,
                interpolation,
            } => {
                let csv = if csv_file.is_absolute() {
                    csv_file.clone()
                } else {
                    self.paths.dem_dir.join(csv_file)
                };
                let sites = direct::read_sites(&csv, id_column.as_deref())?;
                info!(csv = %csv.display(), n_sites = sites.len(), "sampling terrain at listed points");
                direct::extract_points(grid, &sites, *interpolation)?
            }
            SamplingMethod::Toposub { .. } => {
                let spec = ClusterSpec::from_sampling(&self.config.sampling)
                    .ok_or_else(|| TopoError::Config("toposub sampling without clustering parameters".into()))?;
                let sample = sampler::cluster_sample(grid, &spec, &self.pool)?;
                grid.cluster_labels = Some(sample.labels);
                cache::persist(&self.paths.output(&files.ds_param), &*grid)?;
                info!("terrain grid updated with cluster labels");
                sample.points
            }
        };

        let epsg = self.config.dem.epsg;
        for p in &mut points.points {
            let (lon, lat) = self.collaborators.transform.to_lonlat(p.x, p.y, epsg)?;
            p.lon = lon;
            p.lat = lat;
        }
        cache::persist(&path, &points)?;
        info!(path = %path.display(), n_points = points.len(), "representative points saved");
        self.state.points = Some(points);
        Ok(CacheOutcome::Computed)
    }

    /// Score candidate cluster counts on the current terrain grid.
    pub fn search_number_of_clusters(&self, candidates: &[usize]) -> Result<Vec<ClusterScore>> {
        let grid = self
            .state
            .terrain
            .as_ref()
            .ok_or(TopoError::MissingArtifact("terrain grid"))?;
        let spec = ClusterSpec::from_sampling(&self.config.sampling).ok_or_else(|| {
            TopoError::Config("searching the number of clusters needs sampling.method: toposub".into())
        })?;
        info!(?candidates, features = ?spec.features, "testing number of clusters");
        sampler::search_number_of_clusters(grid, &spec, candidates, &self.pool)
    }

    /// Horizon grid, cached under `da_horizon`, then sampled at every point.
    /// Sampling runs on a cache hit too and re-persists the point table.
    pub fn compute_horizon(&mut self) -> Result<CacheOutcome> {
        let path = self.paths.output(&self.config.outputs.file.da_horizon);
        let dem = &self.paths.dem_file;
        let source = &self.collaborators.horizon;
        let increments = self.config.dem.horizon_increments;
        let workers = self.pool.workers();
        let (horizon, outcome) =
            cache::load_or_compute(&path, || Ok(source.compute(dem, increments, workers)?))?;

        if let Some(points) = self.state.points.as_mut() {
            sample_horizon(points, &horizon)?;
            let table = self.paths.output(&self.config.outputs.file.df_centroids);
            cache::persist(&table, &*points)?;
            info!(n_points = points.len(), "representative points updated with horizon angles");
        }
        self.state.horizon = Some(horizon);
        Ok(outcome)
    }

    fn solar_for(&self, start: NaiveDate, end: NaiveDate, file: &str) -> Result<(SolarGeometry, CacheOutcome)> {
        let points = self
            .state
            .points
            .as_ref()
            .ok_or(TopoError::MissingArtifact("representative points"))?;
        let path = self.paths.output(file);
        cache::load_or_compute(&path, || {
            Ok(self.collaborators.solar.compute(
                points,
                start,
                end,
                self.config.timestep(),
                self.config.dem.epsg,
                self.pool.workers(),
            )?)
        })
    }

    /// Solar geometry per chunk (or for the whole period), each cached
    /// under its own file. Returns one outcome per period.
    pub fn compute_solar_geometry(&mut self) -> Result<Vec<CacheOutcome>> {
        let mut outcomes = Vec::new();
        let mut last = None;
        for period in self.periods() {
            let (solar, outcome) = self.solar_for(period.start, period.end, &period.solar_file)?;
            outcomes.push(outcome);
            last = Some(solar);
        }
        self.state.solar = last;
        Ok(outcomes)
    }

    /// Downscale every period, concatenate chunk files per point and load
    /// the final series back.
    pub fn downscale_climate(&mut self) -> Result<()> {
        let timestep = self.config.timestep();
        let coordinator = DownscaleCoordinator::new(
            &self.paths.downscaled,
            &self.config.outputs.file.downscaled_pt,
            Some(timestep),
            &self.pool,
        )?;
        let points = self
            .state
            .points
            .as_ref()
            .ok_or(TopoError::MissingArtifact("representative points"))?;
        let horizon = self
            .state
            .horizon
            .as_ref()
            .ok_or(TopoError::MissingArtifact("horizon grid"))?;

        coordinator.preclean()?;
        let ids: Vec<String> = points.ids().map(str::to_string).collect();

        let mut last_solar = None;
        for period in self.periods() {
            let (solar, _) = self.solar_for(period.start, period.end, &period.solar_file)?;
            info!(start = %period.start, end = %period.end, "downscaling");
            let request = DownscaleRequest {
                points,
                horizon,
                solar: &solar,
                start: period.start,
                end: period.end,
                timestep,
                interpolation: self.config.toposcale.interpolation_method,
                lw_terrain_contribution: self.config.toposcale.lw_terrain_contribution,
                precip_lapse_rate: self.config.climate.precip_lapse_rate,
                climate_dir: &self.paths.climate,
                epsg: self.config.dem.epsg,
                output_pattern: &period.downscaled_pattern,
                workers: self.pool.workers(),
            };
            let series = self.collaborators.downscaler.downscale(&request)?;
            check_series_ids(&ids, &series)?;
            coordinator.store_chunk(&period.downscaled_pattern, &series)?;
            last_solar = Some(solar);
        }

        if self.splitter.is_some() {
            coordinator.concatenate(&ids)?;
        }
        let downscaled = coordinator.read_downscaled()?;
        info!(n_points = downscaled.len(), dir = %self.paths.downscaled.display(), "downscaled series ready");

        if self.config.clean_up.delete_tmp_dirs {
            self.delete_tmp_dirs();
        }
        if last_solar.is_some() {
            self.state.solar = last_solar;
        }
        self.state.downscaled = downscaled;
        Ok(())
    }

    /// Remove the scratch directories of outputs and climate inputs.
    pub fn delete_tmp_dirs(&self) {
        cache::remove_dir_best_effort(&self.paths.outputs_tmp);
        cache::remove_dir_best_effort(&self.paths.climate_tmp);
    }

    /// Every stage in order.
    pub fn run_all(&mut self) -> Result<()> {
        self.get_climate()?;
        self.compute_dem_param()?;
        self.extract_topo_param()?;
        self.compute_horizon()?;
        self.compute_solar_geometry()?;
        self.downscale_climate()?;
        info!(project = %self.config.project.name, "pipeline finished");
        Ok(())
    }

    // ── Loading an existing project ──────────────────────────────────────────

    /// Load whatever artifacts a previous run left behind. Missing ones are
    /// reported as warnings and left empty in the state.
    pub fn load_project(&mut self) -> Result<()> {
        let files = self.config.outputs.file.clone();
        self.state.terrain = self.load_artifact("terrain parameters", &files.ds_param)?;
        self.state.points = self.load_artifact("representative points", &files.df_centroids)?;
        self.state.solar = self.load_artifact("solar geometry", &files.ds_solar)?;
        self.state.horizon = self.load_artifact("horizon", &files.da_horizon)?;

        let coordinator =
            DownscaleCoordinator::new(&self.paths.downscaled, &files.downscaled_pt, None, &self.pool)?;
        let downscaled = coordinator.read_downscaled()?;
        if downscaled.is_empty() {
            warn!(pattern = %files.downscaled_pt, "no downscaled point files found");
        } else {
            info!(n_points = downscaled.len(), "downscaled points loaded");
        }
        self.state.downscaled = downscaled;
        Ok(())
    }

    fn load_artifact<T: DeserializeOwned>(&self, what: &str, file: &str) -> Result<Option<T>> {
        let path = self.paths.output(file);
        let value = cache::load_if_exists(&path)?;
        match &value {
            Some(_) => info!(artifact = what, path = %path.display(), "loaded"),
            None => warn!(artifact = what, path = %path.display(), "not found"),
        }
        Ok(value)
    }
}

/// The downscaler must return exactly one series per representative point.
fn check_series_ids(ids: &[String], series: &[PointSeries]) -> Result<()> {
    let mut want: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut got: Vec<&str> = series.iter().map(|s| s.point_id.as_str()).collect();
    want.sort_unstable();
    got.sort_unstable();
    if want != got {
        return Err(TopoError::Collaborator(anyhow!(
            "downscaler returned {} series for {} points, or with unexpected point ids",
            got.len(),
            want.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(id: &str) -> PointSeries {
        PointSeries::new(id)
    }

    #[test]
    fn series_ids_must_match_points_exactly() {
        let ids = vec!["0".to_string(), "1".to_string()];
        assert!(check_series_ids(&ids, &[series("1"), series("0")]).is_ok());
        assert!(check_series_ids(&ids, &[series("0")]).is_err());
        assert!(check_series_ids(&ids, &[series("0"), series("0")]).is_err());
        assert!(check_series_ids(&ids, &[series("0"), series("2")]).is_err());
    }
}
