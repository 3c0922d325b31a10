//! Per-feature standardization (zero mean, unit population variance).

use serde::{Deserialize, Serialize};

/// Row-major observation matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    pub n_features: usize,
    pub values: Vec<f64>,
}

impl Observations {
    pub fn new(n_features: usize, values: Vec<f64>) -> Self {
        debug_assert!(n_features > 0 && values.len() % n_features == 0);
        Self { n_features, values }
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.n_features
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n_features..(i + 1) * self.n_features]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.values.chunks_exact(self.n_features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Population standard deviation; 1.0 for constant features.
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(obs: &Observations) -> Self {
        let nf = obs.n_features;
        let n = obs.len().max(1) as f64;
        let mut mean = vec![0.0; nf];
        for row in obs.rows() {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; nf];
        for row in obs.rows() {
            for ((s, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m) * (v - m);
            }
        }
        let scale = var
            .into_iter()
            .map(|s| {
                let sd = (s / n).sqrt();
                if sd < 1e-12 { 1.0 } else { sd }
            })
            .collect();
        Self { mean, scale }
    }

    pub fn transform(&self, obs: &Observations) -> Observations {
        let mut values = obs.values.clone();
        for row in values.chunks_exact_mut(obs.n_features) {
            self.transform_row(row);
        }
        Observations::new(obs.n_features, values)
    }

    pub fn transform_row(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            *v = (*v - m) / s;
        }
    }

    pub fn inverse_transform_row(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            *v = *v * s + m;
        }
    }
}
