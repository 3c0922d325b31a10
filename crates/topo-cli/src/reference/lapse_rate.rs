//! Single-cell lapse-rate transfer: the coarse forcing is moved to each
//! point's elevation, and shortwave is cut when the sun is behind the
//! point's horizon.
//!
//! With one forcing cell there is nothing to interpolate between, so the
//! interpolation method and the longwave terrain switch have no effect here.

use std::collections::HashMap;

use anyhow::{ensure, Context, Result};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use topo_core::collaborators::SunPosition;
use topo_core::{DownscaleRequest, Downscaler, PointSeries, RepresentativePoint};

use super::archive::Forcing;

/// Environmental temperature lapse rate, K per metre.
pub const TEMPERATURE_LAPSE: f64 = 0.0065;
/// Liston & Elder (2006) precipitation adjustment, per metre.
pub const PRECIP_FACTOR: f64 = 0.00035;

#[derive(Debug, Clone, Copy, Default)]
pub struct LapseRateDownscaler;

/// Precipitation multiplier for an elevation difference `dz` (point − cell).
pub fn precip_scale(dz: f64) -> f64 {
    let x = (PRECIP_FACTOR * dz).clamp(-0.95, 0.95);
    (1.0 + x) / (1.0 - x)
}

/// Horizon angle at the azimuth nearest to `azimuth`, 0 without a horizon.
fn horizon_toward(horizon: &[(f64, f64)], azimuth: f64) -> f64 {
    let circular = |a: f64| {
        let d = (a - azimuth).rem_euclid(360.0);
        d.min(360.0 - d)
    };
    horizon
        .iter()
        .min_by(|a, b| circular(a.0).total_cmp(&circular(b.0)))
        .map_or(0.0, |&(_, angle)| angle)
}

struct Window<'a> {
    forcing: &'a Forcing,
    /// Forcing indices inside the requested period.
    steps: Vec<usize>,
    /// Solar time step → index into the sun position vectors.
    solar_index: HashMap<NaiveDateTime, usize>,
    precip_lapse_rate: bool,
}

impl Window<'_> {
    fn downscale_point(&self, point: &RepresentativePoint, sun: Option<&SunPosition>) -> Result<PointSeries> {
        let z = point
            .attribute("elevation")
            .filter(|z| z.is_finite())
            .with_context(|| format!("point {} has no elevation", point.point_id))?;
        let dz = z - self.forcing.elevation;
        let horizon = point.horizon();

        let mut series = PointSeries::new(point.point_id.clone());
        series.time = self.steps.iter().map(|&i| self.forcing.time[i]).collect();
        for (name, source) in &self.forcing.variables {
            let raw = self.steps.iter().map(|&i| source[i]);
            let values: Vec<f64> = match name.as_str() {
                "t" => raw.map(|v| v - TEMPERATURE_LAPSE * dz).collect(),
                "tp" if self.precip_lapse_rate => {
                    let scale = precip_scale(dz);
                    raw.map(|v| v * scale).collect()
                }
                "sw" => {
                    let sun = sun.with_context(|| format!("no solar geometry for point {}", point.point_id))?;
                    let mut out = Vec::with_capacity(self.steps.len());
                    for (&i, v) in self.steps.iter().zip(raw) {
                        let t = self.forcing.time[i];
                        let j = *self
                            .solar_index
                            .get(&t)
                            .with_context(|| format!("no solar geometry at {t}"))?;
                        let shaded = sun.elevation[j] < horizon_toward(&horizon, sun.azimuth[j]);
                        out.push(if shaded { 0.0 } else { v });
                    }
                    out
                }
                _ => raw.collect(),
            };
            series.variables.insert(name.clone(), values);
        }
        Ok(series)
    }
}

impl Downscaler for LapseRateDownscaler {
    fn downscale(&self, request: &DownscaleRequest<'_>) -> Result<Vec<PointSeries>> {
        let forcing = Forcing::load(request.climate_dir)?;
        let from = request.start.and_hms_opt(0, 0, 0).context("invalid start")?;
        let to = request
            .end
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .context("invalid end")?;
        let steps: Vec<usize> = (0..forcing.time.len())
            .filter(|&i| forcing.time[i] >= from && forcing.time[i] < to)
            .collect();
        ensure!(
            !steps.is_empty(),
            "forcing has no time steps between {} and {}",
            request.start,
            request.end
        );
        let window = Window {
            forcing: &forcing,
            steps,
            solar_index: request.solar.time.iter().enumerate().map(|(j, &t)| (t, j)).collect(),
            precip_lapse_rate: request.precip_lapse_rate,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(request.workers)
            .build()
            .context("starting downscaling worker pool")?;
        let out = pool.install(|| {
            request
                .points
                .points
                .par_iter()
                .map(|p| window.downscale_point(p, request.solar.points.get(&p.point_id)))
                .collect::<Result<Vec<_>>>()
        })?;
        tracing::info!(
            start = %request.start,
            end = %request.end,
            n_points = out.len(),
            steps = window.steps.len(),
            "downscaled forcing"
        );
        Ok(out)
    }
}
