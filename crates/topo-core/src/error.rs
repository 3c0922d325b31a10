use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the downscaling pipeline.
#[derive(Error, Debug)]
pub enum TopoError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no spatial extent: provide project.extent as [latN, latS, lonW, lonE] or a DEM to derive it from")]
    MissingExtent,

    #[error("required file not found: {0}")]
    MissingFile(PathBuf),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("output file pattern '{0}' must contain a '*' placeholder for the point id")]
    WildcardMissing(String),

    #[error("chunk file name '{0}' does not carry ISO (YYYY-MM-DD) date tokens")]
    UnsafeChunkName(String),

    #[error("{0} is not available yet; run the stage that produces it first")]
    MissingArtifact(&'static str),

    #[error("spatial sampling failed: {0}")]
    Sampling(String),

    #[error("time series concatenation failed: {0}")]
    Concat(String),

    #[error("external computation failed: {0}")]
    Collaborator(#[from] anyhow::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl TopoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TopoError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, TopoError>;
