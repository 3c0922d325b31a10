//! Horizon angles by ray marching over the heightfield.

use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use topo_core::horizon::azimuths;
use topo_core::{HorizonGrid, HorizonSource};

use super::heightfield::HeightField;

/// For every cell and azimuth, the steepest elevation angle (degrees) to any
/// cell along a straight ray to the grid edge. Never negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayHorizon;

/// Horizon angle from cell `(r, c)` looking toward `azimuth` degrees.
pub fn horizon_angle(hf: &HeightField, r: usize, c: usize, azimuth: f64, cellsize: f64) -> f64 {
    let z0 = hf.get(r, c) as f64;
    if !z0.is_finite() {
        return f64::NAN;
    }
    let (de, dn) = (azimuth.to_radians().sin(), azimuth.to_radians().cos());
    let mut best = 0.0f64;
    for k in 1.. {
        let col = (c as f64 + de * k as f64).round();
        let row = (r as f64 + dn * k as f64).round();
        if col < 0.0 || row < 0.0 || col >= hf.width as f64 || row >= hf.height as f64 {
            break;
        }
        let z = hf.get(row as usize, col as usize) as f64;
        if !z.is_finite() {
            continue;
        }
        let dist = k as f64 * cellsize;
        best = best.max(((z - z0) / dist).atan().to_degrees());
    }
    best
}

impl HorizonSource for RayHorizon {
    fn compute(&self, dem: &Path, increments: usize, workers: usize) -> Result<HorizonGrid> {
        let hf = HeightField::load(dem)?;
        let cellsize = hf.cellsize_m();
        let azimuths = azimuths(increments);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .context("starting horizon worker pool")?;
        let angles: Vec<Vec<f64>> = pool.install(|| {
            azimuths
                .iter()
                .map(|&az| {
                    (0..hf.width * hf.height)
                        .into_par_iter()
                        .map(|idx| horizon_angle(&hf, idx / hf.width, idx % hf.width, az, cellsize))
                        .collect::<Vec<f64>>()
                })
                .collect()
        });
        tracing::info!(increments, cells = hf.width * hf.height, "horizon angles computed");
        Ok(HorizonGrid {
            azimuths,
            x: hf.lons(),
            y: hf.lats(),
            angles,
        })
    }
}
