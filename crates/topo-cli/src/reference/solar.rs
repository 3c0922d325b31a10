//! Sun position from day-of-year declination and hour angle.
//!
//! Accurate to roughly a degree, enough to decide whether a point is in the
//! sun. Times are UTC; solar time adds `lon / 15` hours.

use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use topo_core::collaborators::SunPosition;
use topo_core::{PointTable, SolarGeometry, SolarSource};

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSolar;

/// Time steps from `start` 00:00 up to the last step on `end`.
pub fn time_index(start: NaiveDate, end: NaiveDate, step: Duration) -> Vec<NaiveDateTime> {
    let mut out = Vec::new();
    let (Some(mut t), Some(next_day)) = (start.and_hms_opt(0, 0, 0), end.succ_opt()) else {
        return out;
    };
    let Some(stop) = next_day.and_hms_opt(0, 0, 0) else {
        return out;
    };
    while t < stop {
        out.push(t);
        t += step;
    }
    out
}

/// `(elevation°, azimuth° clockwise from north)` at `lat`/`lon` degrees.
pub fn sun_position(t: NaiveDateTime, lon: f64, lat: f64) -> (f64, f64) {
    let doy = t.ordinal() as f64;
    let declination = (23.44f64).to_radians() * ((360.0 / 365.0) * (284.0 + doy)).to_radians().sin();
    let utc_hours = t.hour() as f64 + t.minute() as f64 / 60.0;
    let hour_angle = (15.0 * (utc_hours + lon / 15.0 - 12.0)).to_radians();
    let phi = lat.to_radians();

    let sin_el = phi.sin() * declination.sin() + phi.cos() * declination.cos() * hour_angle.cos();
    let elevation = sin_el.clamp(-1.0, 1.0).asin();
    // Azimuth measured from south, then shifted to north-based.
    let from_south = hour_angle
        .sin()
        .atan2(hour_angle.cos() * phi.sin() - declination.tan() * phi.cos());
    let azimuth = (from_south.to_degrees() + 180.0).rem_euclid(360.0);
    (elevation.to_degrees(), azimuth)
}

impl SolarSource for SimpleSolar {
    fn compute(
        &self,
        points: &PointTable,
        start: NaiveDate,
        end: NaiveDate,
        timestep: Duration,
        _epsg: u32,
        _workers: usize,
    ) -> Result<SolarGeometry> {
        ensure!(timestep > Duration::zero(), "solar time step must be positive");
        let time = time_index(start, end, timestep);
        let mut by_point = BTreeMap::new();
        for p in &points.points {
            ensure!(
                p.lon.is_finite() && p.lat.is_finite(),
                "point {} has no geographic coordinates",
                p.point_id
            );
            let (elevation, azimuth) = time.iter().map(|&t| sun_position(t, p.lon, p.lat)).unzip();
            by_point.insert(p.point_id.clone(), SunPosition { elevation, azimuth });
        }
        tracing::info!(%start, %end, steps = time.len(), n_points = by_point.len(), "solar geometry computed");
        Ok(SolarGeometry {
            start,
            end,
            time,
            points: by_point,
        })
    }
}
