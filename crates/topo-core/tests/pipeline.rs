//! End-to-end runs of the project pipeline against counting collaborator
//! doubles in a temporary project directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use topo_core::collaborators::SunPosition;
use topo_core::config::ProjectConfig;
use topo_core::downscale::DownscaleCoordinator;
use topo_core::horizon::azimuths;
use topo_core::{
    ClimateRequest, ClimateSource, Collaborators, DownscaleRequest, Downscaler, Extent,
    GeographicIdentity, HorizonGrid, HorizonSource, PointSeries, PointTable, Project,
    SolarGeometry, SolarSource, TerrainGrid, TerrainSource, TopoError, WorkerPool,
};

// ── Counting doubles ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Calls {
    terrain: AtomicUsize,
    climate: AtomicUsize,
    horizon: AtomicUsize,
    solar: AtomicUsize,
    downscale: AtomicUsize,
}

impl Calls {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn cached_computations(&self) -> usize {
        Self::get(&self.terrain) + Self::get(&self.horizon) + Self::get(&self.solar)
    }
}

const GRID_W: usize = 8;
const GRID_H: usize = 6;

fn grid_axes() -> (Vec<f64>, Vec<f64>) {
    let x = (0..GRID_W).map(|i| 7.05 + 0.1 * i as f64).collect();
    let y = (0..GRID_H).map(|i| 46.05 + 0.1 * i as f64).collect();
    (x, y)
}

struct FakeTerrain(Arc<Calls>);

impl TerrainSource for FakeTerrain {
    fn compute(&self, _dem: &Path) -> anyhow::Result<TerrainGrid> {
        self.0.terrain.fetch_add(1, Ordering::SeqCst);
        let mut elevation = Vec::new();
        let mut slope = Vec::new();
        for r in 0..GRID_H {
            for c in 0..GRID_W {
                elevation.push(1500.0 + 120.0 * c as f64 + 35.0 * r as f64);
                slope.push(((r * 7 + c * 3) % 11) as f64 * 4.0);
            }
        }
        let (x, y) = grid_axes();
        Ok(TerrainGrid::new(x, y)?
            .with_field("elevation", elevation)?
            .with_field("slope", slope)?)
    }

    fn extent(&self, _dem: &Path) -> anyhow::Result<Option<Extent>> {
        Ok(Some(Extent::from_nswe([46.6, 46.0, 7.0, 7.8])))
    }
}

struct FakeClimate {
    calls: Arc<Calls>,
    last_full_day: NaiveDate,
}

impl ClimateSource for FakeClimate {
    fn retrieve(&self, request: &ClimateRequest) -> anyhow::Result<()> {
        anyhow::ensure!(request.start <= request.end, "empty climate request");
        self.calls.climate.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn last_full_day(&self) -> anyhow::Result<NaiveDate> {
        Ok(self.last_full_day)
    }
}

struct FakeHorizon(Arc<Calls>);

impl HorizonSource for FakeHorizon {
    fn compute(&self, _dem: &Path, increments: usize, _workers: usize) -> anyhow::Result<HorizonGrid> {
        self.0.horizon.fetch_add(1, Ordering::SeqCst);
        let (x, y) = grid_axes();
        let azimuths = azimuths(increments);
        let angles = (0..azimuths.len())
            .map(|a| (0..GRID_W * GRID_H).map(|cell| (a * 3 + cell % 5) as f64).collect())
            .collect();
        Ok(HorizonGrid { azimuths, x, y, angles })
    }
}

fn time_index(start: NaiveDate, end: NaiveDate, step: Duration) -> Vec<NaiveDateTime> {
    let mut t = start.and_hms_opt(0, 0, 0).unwrap();
    let stop = end.and_hms_opt(23, 59, 59).unwrap();
    let mut out = Vec::new();
    while t <= stop {
        out.push(t);
        t += step;
    }
    out
}

struct FakeSolar(Arc<Calls>);

impl SolarSource for FakeSolar {
    fn compute(
        &self,
        points: &PointTable,
        start: NaiveDate,
        end: NaiveDate,
        timestep: Duration,
        _epsg: u32,
        _workers: usize,
    ) -> anyhow::Result<SolarGeometry> {
        self.0.solar.fetch_add(1, Ordering::SeqCst);
        let time = time_index(start, end, timestep);
        let points = points
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let sun = SunPosition {
                    elevation: vec![20.0 + i as f64; time.len()],
                    azimuth: vec![180.0; time.len()],
                };
                (p.point_id.clone(), sun)
            })
            .collect();
        Ok(SolarGeometry { start, end, time, points })
    }
}

struct FakeDownscaler(Arc<Calls>);

impl Downscaler for FakeDownscaler {
    fn downscale(&self, request: &DownscaleRequest<'_>) -> anyhow::Result<Vec<PointSeries>> {
        self.0.downscale.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(request.output_pattern.contains('*'), "pattern without wildcard");
        let time = request.solar.time.clone();
        let t0 = request.start.and_hms_opt(0, 0, 0).unwrap();
        Ok(request
            .points
            .points
            .iter()
            .map(|p| {
                let elevation = p.attribute("elevation").unwrap_or(0.0);
                let t = time
                    .iter()
                    .map(|ts| 288.15 - 0.0065 * elevation + (*ts - t0).num_days() as f64 * 0.01)
                    .collect();
                let mut s = PointSeries::new(p.point_id.clone());
                s.time = time.clone();
                s.variables.insert("t".into(), t);
                s
            })
            .collect())
    }
}

fn collaborators(calls: &Arc<Calls>, last_full_day: NaiveDate) -> Collaborators {
    Collaborators {
        terrain: Box::new(FakeTerrain(calls.clone())),
        climate: Box::new(FakeClimate {
            calls: calls.clone(),
            last_full_day,
        }),
        horizon: Box::new(FakeHorizon(calls.clone())),
        solar: Box::new(FakeSolar(calls.clone())),
        downscaler: Box::new(FakeDownscaler(calls.clone())),
        transform: Box::new(GeographicIdentity),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn far_future() -> NaiveDate {
    d(2100, 1, 1)
}

fn project_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let dem_dir = dir.path().join("inputs").join("dem");
    fs::create_dir_all(&dem_dir).unwrap();
    fs::write(dem_dir.join("dem.json"), "{}").unwrap();
    dir
}

fn toposub_config(dir: &Path) -> ProjectConfig {
    let text = format!(
        r#"
project:
  name: integration
  directory: {}
  start: 2019-01-01
  end: 2020-06-30
  extent: [46.6, 46.0, 7.0, 7.8]
  split: {{enabled: true, years: 1}}
  cpu_cores: 2
climate:
  timestep_hours: 24
dem:
  file: dem.json
  horizon_increments: 4
sampling:
  method: toposub
  clustering_features: [x, y, elevation, slope]
  n_clusters: 4
"#,
        dir.display()
    );
    ProjectConfig::from_yaml_str(&text).unwrap()
}

/// Every file under `outputs/`, with its bytes.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn second_run_recomputes_nothing_and_rewrites_identical_bytes() {
    let dir = project_dir();
    let outputs = dir.path().join("outputs");

    let first = Arc::new(Calls::default());
    let mut project = Project::setup(toposub_config(dir.path()), collaborators(&first, far_future())).unwrap();
    project.run_all().unwrap();

    assert_eq!(Calls::get(&first.terrain), 1);
    assert_eq!(Calls::get(&first.horizon), 1);
    assert_eq!(Calls::get(&first.solar), 2, "one solar computation per chunk");
    assert_eq!(Calls::get(&first.downscale), 2, "one downscaling call per chunk");

    let downscaled = &project.state.downscaled;
    assert_eq!(downscaled.len(), 4);
    for (id, series) in downscaled {
        assert_eq!(series.time.first().unwrap().date(), d(2019, 1, 1), "point {id}");
        assert_eq!(series.time.last().unwrap().date(), d(2020, 6, 30), "point {id}");
        assert_eq!(series.len(), 547);
        assert!(series.is_gap_free(Duration::days(1)));
    }
    let names: Vec<String> = fs::read_dir(&project.paths().downscaled)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 4, "chunk files removed, one file per point: {names:?}");
    for id in ["0", "1", "2", "3"] {
        assert!(names.contains(&format!("down_pt_{id}.json")));
    }
    let before = snapshot(&outputs);

    let second = Arc::new(Calls::default());
    let mut again = Project::setup(toposub_config(dir.path()), collaborators(&second, far_future())).unwrap();
    again.run_all().unwrap();

    assert_eq!(second.cached_computations(), 0, "every cached stage must load from disk");
    assert_eq!(snapshot(&outputs), before);
    assert_eq!(again.state.downscaled, project.state.downscaled);
}

#[test]
fn clustering_writes_labels_and_horizon_columns() {
    let dir = project_dir();
    let calls = Arc::new(Calls::default());
    let mut project = Project::setup(toposub_config(dir.path()), collaborators(&calls, far_future())).unwrap();
    project.run_all().unwrap();

    let terrain = project.state.terrain.as_ref().unwrap();
    let labels = terrain.cluster_labels.as_ref().unwrap();
    assert!(labels.iter().all(|l| l.is_some_and(|c| c < 4)));

    let points = project.state.points.as_ref().unwrap();
    let ids: Vec<&str> = points.ids().collect();
    assert_eq!(ids, ["0", "1", "2", "3"]);
    for p in &points.points {
        assert_eq!((p.lon, p.lat), (p.x, p.y));
        assert_eq!(p.horizon().len(), 4);
        assert!(p.attributes.contains_key("hori_azi_90"));
    }
}

#[test]
fn chunks_given_in_reverse_order_concatenate_chronologically() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(2).unwrap();
    let coordinator =
        DownscaleCoordinator::new(dir.path(), "down_pt_*.json", Some(Duration::days(1)), &pool).unwrap();

    let chunks = [
        (d(2020, 1, 1), d(2020, 6, 30)),
        (d(2019, 7, 1), d(2019, 12, 31)),
        (d(2019, 1, 1), d(2019, 6, 30)),
    ];
    for (start, end) in chunks {
        let time = time_index(start, end, Duration::days(1));
        let mut s = PointSeries::new("7");
        s.variables
            .insert("t".into(), time.iter().map(|t| t.and_utc().timestamp() as f64).collect());
        s.time = time;
        let pattern = format!("down_pt_*_{}_{}.json", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"));
        coordinator.store_chunk(&pattern, &[s]).unwrap();
    }

    coordinator.concatenate(&["7".to_string()]).unwrap();
    let all = coordinator.read_downscaled().unwrap();
    let series = &all["7"];
    assert!(series.time.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(series.time[0].date(), d(2019, 1, 1));
    assert_eq!(series.time.last().unwrap().date(), d(2020, 6, 30));
    assert_eq!(series.len(), 547);
    assert!(series.is_gap_free(Duration::days(1)));
    assert!(coordinator.chunk_files("7").unwrap().is_empty());
}

#[test]
fn pattern_without_wildcard_fails_before_any_computation() {
    let dir = project_dir();
    let calls = Arc::new(Calls::default());
    let mut cfg = toposub_config(dir.path());
    cfg.outputs.file.downscaled_pt = "down_pt.json".into();

    let err = Project::setup(cfg, collaborators(&calls, far_future())).err().unwrap();
    assert!(matches!(err, TopoError::WildcardMissing(_)));
    assert_eq!(calls.cached_computations(), 0);
    assert_eq!(Calls::get(&calls.climate), 0);
    assert_eq!(Calls::get(&calls.downscale), 0);

    let pool = WorkerPool::new(1).unwrap();
    assert!(matches!(
        DownscaleCoordinator::new(dir.path(), "down_pt.json", None, &pool),
        Err(TopoError::WildcardMissing(_))
    ));
}

#[test]
fn listed_points_without_split_and_project_reload() {
    let dir = project_dir();
    fs::write(
        dir.path().join("inputs/dem/stations.csv"),
        "x,y\n7.05,46.05\n7.45,46.35\n",
    )
    .unwrap();
    let text = format!(
        r#"
project:
  directory: {}
  start: 2019-01-01
  end: 2019-01-31
climate:
  timestep_hours: 24
dem:
  file: dem.json
sampling:
  method: points
  csv_file: stations.csv
outputs:
  file:
    downscaled_pt: station_*.json
clean_up:
  delete_tmp_dirs: true
"#,
        dir.path().display()
    );
    let cfg = ProjectConfig::from_yaml_str(&text).unwrap();
    let calls = Arc::new(Calls::default());
    let mut project = Project::setup(cfg.clone(), collaborators(&calls, far_future())).unwrap();
    project.run_all().unwrap();

    assert_eq!(Calls::get(&calls.solar), 1);
    let points = project.state.points.as_ref().unwrap();
    assert_eq!(points.ids().collect::<Vec<_>>(), ["1", "2"]);
    assert_eq!(points.points[1].attributes["elevation"], 1500.0 + 120.0 * 4.0 + 35.0 * 3.0);
    assert_eq!(project.state.downscaled["2"].len(), 31);
    assert!(dir.path().join("outputs/downscaled/station_1.json").is_file());
    assert!(!dir.path().join("outputs/tmp").exists());

    let fresh = Arc::new(Calls::default());
    let mut reloaded = Project::setup(cfg, collaborators(&fresh, far_future())).unwrap();
    reloaded.load_project().unwrap();
    assert_eq!(reloaded.state.points, project.state.points);
    assert!(reloaded.state.horizon.is_some());
    assert!(reloaded.state.solar.is_some());
    assert_eq!(reloaded.state.downscaled, project.state.downscaled);
    assert_eq!(fresh.cached_computations(), 0);
}

#[test]
fn realtime_clamps_end_to_last_complete_day() {
    let dir = project_dir();
    let mut cfg = toposub_config(dir.path());
    cfg.project.split.enabled = false;
    cfg.climate.realtime = true;
    let calls = Arc::new(Calls::default());
    let mut project = Project::setup(cfg, collaborators(&calls, d(2019, 3, 31))).unwrap();
    project.run_all().unwrap();

    assert_eq!(project.period(), (d(2019, 1, 1), d(2019, 3, 31)));
    let series = project.state.downscaled.values().next().unwrap();
    assert_eq!(series.time.last().unwrap().date(), d(2019, 3, 31));
    assert_eq!(Calls::get(&calls.climate), 1);
}

#[test]
fn missing_extent_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = toposub_config(dir.path());
    cfg.project.extent = None;
    let calls = Arc::new(Calls::default());
    // No DEM file on disk, so there is nothing to derive the extent from.
    let err = Project::setup(cfg, collaborators(&calls, far_future())).err().unwrap();
    assert!(matches!(err, TopoError::MissingExtent));
}
