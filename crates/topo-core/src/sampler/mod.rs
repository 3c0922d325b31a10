//! Spatial sampling: reduce a terrain grid to a small set of representative
//! points, either from an explicit point list or by clustering the grid.
//!
//! Cluster mode:
//!   valid cells → standardize clustering features → k-means →
//!   inverse-transform centres → per-cluster means for the other columns →
//!   labels written back to the grid.

pub mod kmeans;
pub mod points;
pub mod scaler;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::config::{ClusteringMethod, SamplingMethod};
use crate::error::{Result, TopoError};
use crate::grid::TerrainGrid;
use crate::points::{padded_ids, PointTable, RepresentativePoint};
use crate::pool::WorkerPool;
use kmeans::{KmeansFit, KmeansParams};
use scaler::{Observations, StandardScaler};

/// Clustering request resolved from the `toposub` sampling section.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    pub features: Vec<String>,
    pub n_clusters: usize,
    pub method: ClusteringMethod,
    pub seed: u64,
}

impl ClusterSpec {
    /// The clustering request of a `toposub` sampling section, `None` for
    /// direct points.
    pub fn from_sampling(sampling: &SamplingMethod) -> Option<Self> {
        match sampling {
            SamplingMethod::Toposub {
                clustering_features,
                n_clusters,
                clustering_method,
                random_seed,
            } => Some(Self {
                features: clustering_features.clone(),
                n_clusters: *n_clusters,
                method: *clustering_method,
                seed: *random_seed,
            }),
            SamplingMethod::Points { .. } => None,
        }
    }

    fn kmeans_params(&self, k: usize) -> KmeansParams {
        let (max_iter, batch_size) = match self.method {
            ClusteringMethod::Kmeans { max_iter } => (max_iter, None),
            ClusteringMethod::MiniBatchKmeans { batch_size, max_iter } => (max_iter, Some(batch_size)),
        };
        KmeansParams {
            k,
            max_iter,
            seed: self.seed,
            batch_size,
            ..KmeansParams::default()
        }
    }
}

/// Result of cluster-mode sampling.
#[derive(Debug, Clone)]
pub struct ClusterSample {
    pub points: PointTable,
    /// Cluster per grid cell; `None` where a feature was not finite.
    pub labels: Vec<Option<usize>>,
    pub scaler: StandardScaler,
    pub inertia: f64,
}

/// Cells whose every clustering feature is finite, and their feature rows.
fn valid_observations(grid: &TerrainGrid, features: &[String]) -> Result<(Vec<usize>, Observations)> {
    for f in features {
        if !grid.has_column(f) {
            return Err(TopoError::Sampling(format!(
                "clustering feature '{f}' is not a terrain field (have: {})",
                grid.column_names().join(", ")
            )));
        }
    }
    let mut cells = Vec::new();
    let mut values = Vec::new();
    let mut row = Vec::with_capacity(features.len());
    for idx in 0..grid.n_cells() {
        row.clear();
        row.extend(features.iter().filter_map(|f| grid.value(f, idx)));
        if row.iter().all(|v| v.is_finite()) {
            cells.push(idx);
            values.extend_from_slice(&row);
        }
    }
    Ok((cells, Observations::new(features.len(), values)))
}

fn run_clustering(
    grid: &TerrainGrid,
    spec: &ClusterSpec,
    k: usize,
    pool: &WorkerPool,
) -> Result<(Vec<usize>, Observations, StandardScaler, KmeansFit)> {
    let (cells, obs) = valid_observations(grid, &spec.features)?;
    if obs.is_empty() {
        return Err(TopoError::Sampling("no grid cell has finite values for every clustering feature".into()));
    }
    let scaler = StandardScaler::fit(&obs);
    let scaled = scaler.transform(&obs);
    let fit = kmeans::fit(&scaled, &spec.kmeans_params(k), pool)?;
    Ok((cells, obs, scaler, fit))
}

/// Cluster the grid into exactly `spec.n_clusters` representative points.
pub fn cluster_sample(grid: &TerrainGrid, spec: &ClusterSpec, pool: &WorkerPool) -> Result<ClusterSample> {
    let k = spec.n_clusters;
    let (cells, _obs, scaler, fit) = run_clustering(grid, spec, k, pool)?;
    info!(
        n_cells = cells.len(),
        n_clusters = k,
        iterations = fit.n_iter,
        inertia = fit.inertia,
        "grid clustered"
    );

    let mut labels = vec![None; grid.n_cells()];
    for (&cell, &l) in cells.iter().zip(&fit.labels) {
        labels[cell] = Some(l);
    }

    // Columns not used for clustering: mean over member cells, NaN skipped.
    let others: Vec<String> = grid
        .column_names()
        .into_iter()
        .filter(|c| !spec.features.contains(c))
        .collect();
    let mut sums = vec![vec![0.0f64; others.len()]; k];
    let mut counts = vec![vec![0usize; others.len()]; k];
    for (&cell, &l) in cells.iter().zip(&fit.labels) {
        for (j, name) in others.iter().enumerate() {
            if let Some(v) = grid.value(name, cell).filter(|v| v.is_finite()) {
                sums[l][j] += v;
                counts[l][j] += 1;
            }
        }
    }

    let ids = padded_ids(k, false);
    let mut pts = Vec::with_capacity(k);
    for (c, point_id) in ids.into_iter().enumerate() {
        let mut centre = fit.centroids.row(c).to_vec();
        scaler.inverse_transform_row(&mut centre);

        let mut columns: BTreeMap<String, f64> = spec.features.iter().cloned().zip(centre).collect();
        for (j, name) in others.iter().enumerate() {
            let v = if counts[c][j] > 0 {
                sums[c][j] / counts[c][j] as f64
            } else {
                f64::NAN
            };
            columns.insert(name.clone(), v);
        }

        let x = columns.remove("x").unwrap_or(f64::NAN);
        let y = columns.remove("y").unwrap_or(f64::NAN);
        pts.push(RepresentativePoint {
            point_id,
            x,
            y,
            lon: f64::NAN,
            lat: f64::NAN,
            attributes: columns,
        });
    }

    Ok(ClusterSample {
        points: PointTable::new(pts),
        labels,
        scaler,
        inertia: fit.inertia,
    })
}

/// Quality of one candidate cluster count.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterScore {
    pub n_clusters: usize,
    /// Within-cluster sum of squares in standardized units.
    pub inertia: f64,
    /// Per-feature RMSE of cells against their cluster centre, physical units.
    pub rmse: BTreeMap<String, f64>,
}

/// Cluster once per candidate count and report how well each represents
/// the grid, to help choose `n_clusters`.
pub fn search_number_of_clusters(
    grid: &TerrainGrid,
    spec: &ClusterSpec,
    candidates: &[usize],
    pool: &WorkerPool,
) -> Result<Vec<ClusterScore>> {
    let mut scores = Vec::with_capacity(candidates.len());
    for &k in candidates {
        let (_cells, obs, scaler, fit) = run_clustering(grid, spec, k, pool)?;
        let centres: Vec<Vec<f64>> = fit
            .centroids
            .rows()
            .map(|r| {
                let mut c = r.to_vec();
                scaler.inverse_transform_row(&mut c);
                c
            })
            .collect();
        let mut sq = vec![0.0f64; obs.n_features];
        for (row, &l) in obs.rows().zip(&fit.labels) {
            for (f, (&v, &c)) in row.iter().zip(&centres[l]).enumerate() {
                sq[f] += (v - c) * (v - c);
            }
        }
        let n = obs.len() as f64;
        let rmse = spec
            .features
            .iter()
            .cloned()
            .zip(sq.into_iter().map(|s| (s / n).sqrt()))
            .collect();
        info!(n_clusters = k, inertia = fit.inertia, "cluster count scored");
        scores.push(ClusterScore {
            n_clusters: k,
            inertia: fit.inertia,
            rmse,
        });
    }
    Ok(scores)
}
