//! K-means and mini-batch k-means on standardized observations.
//!
//! Both variants start from seeded k-means++ centres, run their assignment
//! steps on the worker pool and finish with every one of the `k` clusters
//! non-empty and every centroid equal to the mean of its members.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::scaler::Observations;
use crate::error::{Result, TopoError};
use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct KmeansParams {
    pub k: usize,
    pub max_iter: usize,
    /// Stop when no centroid moves more than this (standardized units).
    pub tolerance: f64,
    pub seed: u64,
    /// `Some(n)` runs mini-batch updates with `n` samples per step.
    pub batch_size: Option<usize>,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            k: 8,
            max_iter: 300,
            tolerance: 1e-6,
            seed: 2,
            batch_size: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KmeansFit {
    /// Row-major `k × n_features` centres.
    pub centroids: Observations,
    /// Cluster id per observation.
    pub labels: Vec<usize>,
    /// Within-cluster sum of squared distances.
    pub inertia: f64,
    pub n_iter: usize,
}

pub fn fit(obs: &Observations, params: &KmeansParams, pool: &WorkerPool) -> Result<KmeansFit> {
    let k = params.k;
    if k == 0 {
        return Err(TopoError::Sampling("k-means requires at least one cluster".into()));
    }
    if obs.len() < k {
        return Err(TopoError::Sampling(format!(
            "not enough valid cells ({}) for {k} clusters",
            obs.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = kmeans_plus_plus(obs, k, &mut rng, pool)?;

    let n_iter = match params.batch_size {
        None => lloyd(obs, &mut centroids, params, pool),
        Some(batch) => mini_batch(obs, &mut centroids, batch.max(1), params, &mut rng, pool),
    };

    // Final consistent assignment: labels from the last centres, every
    // cluster populated, centres moved to their members' mean.
    let (mut labels, mut dists) = assign(obs, &centroids, pool);
    fill_empty_clusters(&mut labels, &mut dists, k);
    update_means(obs, &labels, &mut centroids);
    let inertia = inertia(obs, &centroids, &labels);

    Ok(KmeansFit {
        centroids,
        labels,
        inertia,
        n_iter,
    })
}

#[inline]
fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Seeded k-means++: first centre uniform, the rest drawn with probability
/// proportional to squared distance from the nearest chosen centre.
fn kmeans_plus_plus(
    obs: &Observations,
    k: usize,
    rng: &mut StdRng,
    pool: &WorkerPool,
) -> Result<Observations> {
    let n = obs.len();
    let nf = obs.n_features;
    let mut centres = Vec::with_capacity(k * nf);

    let first = rng.gen_range(0..n);
    centres.extend_from_slice(obs.row(first));
    let mut d2: Vec<f64> = pool.install(|| {
        obs.values
            .par_chunks(nf)
            .map(|row| sq_dist(row, obs.row(first)))
            .collect()
    });

    for _ in 1..k {
        let total: f64 = d2.iter().sum();
        if !(total > 0.0) {
            return Err(TopoError::Sampling(format!(
                "fewer than {k} distinct valid cells; cannot form {k} clusters"
            )));
        }
        let mut target = rng.gen::<f64>() * total;
        let mut pick = n - 1;
        for (i, &d) in d2.iter().enumerate() {
            if d <= 0.0 {
                continue;
            }
            if target < d {
                pick = i;
                break;
            }
            target -= d;
        }
        if d2[pick] <= 0.0 {
            // Rounding ran past the end: take the last cell with weight.
            pick = d2.iter().rposition(|&d| d > 0.0).unwrap_or(pick);
        }
        centres.extend_from_slice(obs.row(pick));
        let chosen = obs.row(pick);
        pool.install(|| {
            d2.par_iter_mut()
                .zip(obs.values.par_chunks(nf))
                .for_each(|(d, row)| *d = d.min(sq_dist(row, chosen)));
        });
    }
    Ok(Observations::new(nf, centres))
}

/// Nearest centre and squared distance for every observation.
fn assign(obs: &Observations, centroids: &Observations, pool: &WorkerPool) -> (Vec<usize>, Vec<f64>) {
    pool.install(|| {
        obs.values
            .par_chunks(obs.n_features)
            .map(|row| nearest(row, centroids))
            .unzip()
    })
}

fn nearest(row: &[f64], centroids: &Observations) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (j, c) in centroids.rows().enumerate() {
        let d = sq_dist(row, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// Give every empty cluster the observation farthest from its centre,
/// taken from a cluster that keeps at least one member.
fn fill_empty_clusters(labels: &mut [usize], dists: &mut [f64], k: usize) {
    let mut counts = vec![0usize; k];
    for &l in labels.iter() {
        counts[l] += 1;
    }
    for j in 0..k {
        if counts[j] > 0 {
            continue;
        }
        let donor = (0..labels.len())
            .filter(|&i| counts[labels[i]] > 1)
            .max_by(|&a, &b| dists[a].total_cmp(&dists[b]));
        if let Some(i) = donor {
            counts[labels[i]] -= 1;
            labels[i] = j;
            counts[j] = 1;
            dists[i] = 0.0;
        }
    }
}

/// Move each centre to the mean of its members. Returns the largest shift.
fn update_means(obs: &Observations, labels: &[usize], centroids: &mut Observations) -> f64 {
    let nf = obs.n_features;
    let k = centroids.len();
    let mut sums = vec![0.0; k * nf];
    let mut counts = vec![0usize; k];
    for (row, &l) in obs.rows().zip(labels) {
        counts[l] += 1;
        for (s, &v) in sums[l * nf..(l + 1) * nf].iter_mut().zip(row) {
            *s += v;
        }
    }
    let mut max_shift = 0.0f64;
    for j in 0..k {
        if counts[j] == 0 {
            continue;
        }
        let new: Vec<f64> = sums[j * nf..(j + 1) * nf]
            .iter()
            .map(|s| s / counts[j] as f64)
            .collect();
        let old = &mut centroids.values[j * nf..(j + 1) * nf];
        max_shift = max_shift.max(sq_dist(old, &new).sqrt());
        old.copy_from_slice(&new);
    }
    max_shift
}

fn lloyd(obs: &Observations, centroids: &mut Observations, params: &KmeansParams, pool: &WorkerPool) -> usize {
    for iter in 0..params.max_iter {
        let (mut labels, mut dists) = assign(obs, centroids, pool);
        fill_empty_clusters(&mut labels, &mut dists, params.k);
        let shift = update_means(obs, &labels, centroids);
        if shift <= params.tolerance {
            return iter + 1;
        }
    }
    params.max_iter
}

/// Sculley (2010) mini-batch updates with per-centre learning rate 1/count.
fn mini_batch(
    obs: &Observations,
    centroids: &mut Observations,
    batch: usize,
    params: &KmeansParams,
    rng: &mut StdRng,
    pool: &WorkerPool,
) -> usize {
    let n = obs.len();
    let nf = obs.n_features;
    let mut seen = vec![0usize; params.k];

    for iter in 0..params.max_iter {
        let sample: Vec<usize> = (0..batch.min(n)).map(|_| rng.gen_range(0..n)).collect();
        let frozen = centroids.clone();
        let nearest_ids: Vec<usize> = pool.install(|| {
            sample
                .par_iter()
                .map(|&i| nearest(obs.row(i), &frozen).0)
                .collect()
        });

        for (&i, &j) in sample.iter().zip(&nearest_ids) {
            seen[j] += 1;
            let eta = 1.0 / seen[j] as f64;
            let c = &mut centroids.values[j * nf..(j + 1) * nf];
            for (cv, &x) in c.iter_mut().zip(obs.row(i)) {
                *cv = (1.0 - eta) * *cv + eta * x;
            }
        }

        let shift = frozen
            .rows()
            .zip(centroids.rows())
            .map(|(a, b)| sq_dist(a, b).sqrt())
            .fold(0.0f64, f64::max);
        if shift <= params.tolerance {
            return iter + 1;
        }
    }
    params.max_iter
}

fn inertia(obs: &Observations, centroids: &Observations, labels: &[usize]) -> f64 {
    obs.rows()
        .zip(labels)
        .map(|(row, &l)| sq_dist(row, centroids.row(l)))
        .sum()
}
