//! topo-run: drive a hillslope downscaling project from its YAML config
//! using the local reference collaborators.

mod reference;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use topo_core::{cache, Project, ProjectConfig, ProjectPaths, TimeSplitter};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "topo-run", about = "Downscale coarse climate forcing to representative hillslope points")]
struct Args {
    /// Project configuration file.
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage: climate, terrain, sampling, horizon, solar, downscaling.
    Run,
    /// Remove outputs and downstream simulation directories.
    Clean,
    /// Print the time chunks and per-chunk file names.
    Split,
    /// Score candidate cluster counts on the terrain grid.
    Clusters {
        /// Cluster counts to try, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "10,20,50,100")]
        range: Vec<usize>,
    },
    /// Load whatever a previous run produced and summarise it.
    Status,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Parse the config; a missing `project.directory` means the config's folder.
fn load_config(path: &Path) -> Result<ProjectConfig> {
    let mut cfg =
        ProjectConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))?;
    if cfg.project.directory.is_none() {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        cfg.project.directory = Some(dir.to_path_buf());
    }
    Ok(cfg)
}

/// Set up the project without wiping anything a previous run left behind.
fn open_preserving(mut cfg: ProjectConfig) -> Result<Project> {
    cfg.outputs.file.clean_outputs = false;
    cfg.outputs.file.clean_sims = false;
    let paths = ProjectPaths::from_config(&cfg)?;
    Ok(Project::setup(cfg, reference::collaborators(&paths))?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct Status {
    name: String,
    start: chrono::NaiveDate,
    end: chrono::NaiveDate,
    terrain_cells: Option<usize>,
    points: Option<usize>,
    horizon_azimuths: Option<usize>,
    solar_steps: Option<usize>,
    downscaled_points: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);
    let cfg = load_config(&args.config)?;

    match args.command {
        Command::Run => {
            let paths = ProjectPaths::from_config(&cfg)?;
            let mut project = Project::setup(cfg, reference::collaborators(&paths))?;
            project.run_all()?;
            eprintln!(
                "Downscaled {} points into {}",
                project.state.downscaled.len(),
                project.paths().downscaled.display()
            );
        }
        Command::Clean => {
            let paths = ProjectPaths::from_config(&cfg)?;
            cache::clean_outputs(&paths)?;
            cache::clean_simulations(&paths.project);
            eprintln!("Cleaned {}", paths.outputs.display());
        }
        Command::Split => {
            if !cfg.project.split.enabled {
                eprintln!(
                    "Splitting is disabled; {} to {} is downscaled in one piece.",
                    cfg.project.start, cfg.project.end
                );
                return Ok(());
            }
            let files = &cfg.outputs.file;
            let splitter = TimeSplitter::new(
                cfg.project.start,
                cfg.project.end,
                cfg.project.split.years,
                &files.ds_solar,
                &files.downscaled_pt,
            )?;
            print_json(&splitter)?;
        }
        Command::Clusters { range } => {
            if range.is_empty() || range.contains(&0) {
                bail!("--range needs positive cluster counts");
            }
            let mut project = open_preserving(cfg)?;
            project.compute_dem_param()?;
            let scores = project.search_number_of_clusters(&range)?;
            print_json(&scores)?;
        }
        Command::Status => {
            let mut project = open_preserving(cfg)?;
            project.load_project()?;
            let (start, end) = project.period();
            let state = &project.state;
            print_json(&Status {
                name: project.config().project.name.clone(),
                start,
                end,
                terrain_cells: state.terrain.as_ref().map(|g| g.n_cells()),
                points: state.points.as_ref().map(|p| p.len()),
                horizon_azimuths: state.horizon.as_ref().map(|h| h.azimuths.len()),
                solar_steps: state.solar.as_ref().map(|s| s.time.len()),
                downscaled_points: state.downscaled.len(),
            })?;
        }
    }
    Ok(())
}
