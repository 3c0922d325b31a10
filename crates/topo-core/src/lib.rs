//! Hillslope climate downscaling: orchestration and spatial/temporal
//! reduction.
//!
//! A project reduces a DEM to a handful of representative points, splits
//! the period into chunks, drives external collaborators (terrain, climate,
//! horizon, solar, downscaling) per chunk and joins the per-chunk series
//! into one file per point.

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod downscale;
pub mod error;
pub mod grid;
pub mod horizon;
mod nan_json;
pub mod pipeline;
pub mod points;
pub mod pool;
pub mod sampler;
pub mod series;
pub mod timesplit;

pub use cache::CacheOutcome;
pub use collaborators::{
    ClimateRequest, ClimateSource, Collaborators, CoordinateTransform, DownscaleRequest, Downscaler,
    GeographicIdentity, HorizonSource, SolarGeometry, SolarSource, SunPosition, TerrainSource,
};
pub use config::{Extent, ProjectConfig, ProjectPaths};
pub use error::{Result, TopoError};
pub use grid::TerrainGrid;
pub use horizon::HorizonGrid;
pub use pipeline::{PipelineState, Project};
pub use points::{PointTable, RepresentativePoint};
pub use pool::WorkerPool;
pub use series::PointSeries;
pub use timesplit::{TimeChunk, TimeSplitter};
