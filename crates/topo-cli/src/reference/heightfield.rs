//! Elevation heightfield input and the Horn (1981) terrain attributes
//! derived from it.
//!
//! The DEM file is JSON:
//! `{"data": [...], "width": W, "height": H, "min_lon": .., "max_lon": .., "min_lat": .., "max_lat": ..}`
//! with `data` row-major, row 0 along `min_lat` (south), nodata as `null`.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Deserializer};
use topo_core::{Extent, TerrainGrid, TerrainSource};

fn null_as_nan_vec<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

/// Row-major elevation in metres over a geographic box.
#[derive(Debug, Clone, Deserialize)]
pub struct HeightField {
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl HeightField {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading DEM {}", path.display()))?;
        let hf: HeightField =
            serde_json::from_str(&text).with_context(|| format!("parsing DEM {}", path.display()))?;
        ensure!(
            hf.width > 0 && hf.height > 0 && hf.data.len() == hf.width * hf.height,
            "DEM {}: {} values for a {}x{} grid",
            path.display(),
            hf.data.len(),
            hf.width,
            hf.height
        );
        ensure!(
            hf.max_lon > hf.min_lon && hf.max_lat > hf.min_lat,
            "DEM {}: degenerate bounds",
            path.display()
        );
        Ok(hf)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Elevation with indices clamped to the grid edge.
    #[inline]
    pub fn get_clamped(&self, row: isize, col: isize) -> f64 {
        let r = row.clamp(0, self.height as isize - 1) as usize;
        let c = col.clamp(0, self.width as isize - 1) as usize;
        self.get(r, c) as f64
    }

    /// Cell-centre longitudes.
    pub fn lons(&self) -> Vec<f64> {
        let dx = (self.max_lon - self.min_lon) / self.width as f64;
        (0..self.width).map(|c| self.min_lon + (c as f64 + 0.5) * dx).collect()
    }

    /// Cell-centre latitudes, south to north.
    pub fn lats(&self) -> Vec<f64> {
        let dy = (self.max_lat - self.min_lat) / self.height as f64;
        (0..self.height).map(|r| self.min_lat + (r as f64 + 0.5) * dy).collect()
    }

    pub fn extent(&self) -> Extent {
        Extent {
            lat_n: self.max_lat,
            lat_s: self.min_lat,
            lon_w: self.min_lon,
            lon_e: self.max_lon,
        }
    }

    /// Isotropic cell size in metres from the geographic bounds.
    /// Falls back to 90 m when the bounds are degenerate.
    pub fn cellsize_m(&self) -> f64 {
        let cy = (self.max_lat - self.min_lat).abs() / self.height as f64 * 111_320.0;
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let cx = (self.max_lon - self.min_lon).abs() / self.width as f64
            * 111_320.0
            * mid_lat.to_radians().cos();
        let avg = (cy + cx) / 2.0;
        if avg < 1e-3 { 90.0 } else { avg }
    }
}

/// Horn (1981) weighted 3×3 gradient at `(r, c)`, edges replicated.
///
/// Rows increase northward here, so `N` is `r + 1`:
/// ```text
///   NW(+1,-1)  N(+1, 0)  NE(+1,+1)
///   W ( 0,-1)  *         E ( 0,+1)
///   SW(-1,-1)  S(-1, 0)  SE(-1,+1)
/// ```
/// Returns `(dz/dx, dz/dy)` with x east and y north.
pub fn horn_gradient(hf: &HeightField, r: usize, c: usize, cellsize: f64) -> (f64, f64) {
    let (r, c) = (r as isize, c as isize);
    let z = |dr: isize, dc: isize| hf.get_clamped(r + dr, c + dc);
    let (nw, n, ne) = (z(1, -1), z(1, 0), z(1, 1));
    let (w, e) = (z(0, -1), z(0, 1));
    let (sw, s, se) = (z(-1, -1), z(-1, 0), z(-1, 1));

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * cellsize);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * cellsize);
    (dz_dx, dz_dy)
}

/// Slope (degrees) and aspect (degrees clockwise from north, the downhill
/// facing direction) from a gradient. Flat cells get aspect NaN.
pub fn slope_aspect(dz_dx: f64, dz_dy: f64) -> (f64, f64) {
    let magnitude = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();
    let slope = magnitude.atan().to_degrees();
    if magnitude < 1.745e-4 {
        return (slope, f64::NAN);
    }
    let aspect = (-dz_dx).atan2(-dz_dy).to_degrees().rem_euclid(360.0);
    (slope, aspect)
}

/// Terrain source backed by a heightfield JSON file: elevation, slope and
/// aspect on the DEM's own lon/lat grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeightfieldTerrain;

impl TerrainSource for HeightfieldTerrain {
    fn compute(&self, dem: &Path) -> Result<TerrainGrid> {
        let hf = HeightField::load(dem)?;
        let cellsize = hf.cellsize_m();
        let n = hf.width * hf.height;
        let mut slope = Vec::with_capacity(n);
        let mut aspect = Vec::with_capacity(n);
        for r in 0..hf.height {
            for c in 0..hf.width {
                let (dz_dx, dz_dy) = horn_gradient(&hf, r, c, cellsize);
                let (s, a) = slope_aspect(dz_dx, dz_dy);
                slope.push(s);
                aspect.push(a);
            }
        }
        let elevation = hf.data.iter().map(|&z| z as f64).collect();
        let grid = TerrainGrid::new(hf.lons(), hf.lats())?
            .with_field("elevation", elevation)?
            .with_field("slope", slope)?
            .with_field("aspect", aspect)?;
        tracing::info!(width = hf.width, height = hf.height, cellsize_m = cellsize, "terrain attributes computed");
        Ok(grid)
    }

    fn extent(&self, dem: &Path) -> Result<Option<Extent>> {
        Ok(Some(HeightField::load(dem)?.extent()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Plane rising northward by `rise` metres per row.
    fn north_ramp(rise: f32) -> HeightField {
        let (w, h) = (5, 5);
        let data = (0..h).flat_map(|r| (0..w).map(move |_| r as f32 * rise)).collect();
        HeightField {
            data,
            width: w,
            height: h,
            min_lon: 7.0,
            max_lon: 7.005,
            min_lat: 46.0,
            max_lat: 46.005,
        }
    }

    #[test]
    fn ramp_rising_north_faces_south() {
        let hf = north_ramp(10.0);
        let cs = hf.cellsize_m();
        let (dx, dy) = horn_gradient(&hf, 2, 2, cs);
        assert_abs_diff_eq!(dx, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dy, 10.0 / cs, epsilon = 1e-9);
        let (slope, aspect) = slope_aspect(dx, dy);
        assert_abs_diff_eq!(slope, (10.0 / cs).atan().to_degrees(), epsilon = 1e-9);
        assert_abs_diff_eq!(aspect, 180.0, epsilon = 1e-9);
    }

    #[test]
    fn flat_field_has_no_aspect() {
        let hf = north_ramp(0.0);
        let (dx, dy) = horn_gradient(&hf, 0, 0, hf.cellsize_m());
        let (slope, aspect) = slope_aspect(dx, dy);
        assert_eq!(slope, 0.0);
        assert!(aspect.is_nan());
    }

    #[test]
    fn terrain_grid_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.json");
        let hf = north_ramp(5.0);
        let json = serde_json::json!({
            "data": hf.data, "width": 5, "height": 5,
            "min_lon": 7.0, "max_lon": 7.005, "min_lat": 46.0, "max_lat": 46.005,
        });
        fs::write(&path, json.to_string()).unwrap();

        let grid = HeightfieldTerrain.compute(&path).unwrap();
        assert_eq!((grid.width, grid.height), (5, 5));
        assert_abs_diff_eq!(grid.x[0], 7.0005, epsilon = 1e-12);
        assert_eq!(grid.fields["elevation"][grid.index(4, 0)], 20.0);
        assert!(grid.fields["aspect"].iter().all(|&a| (a - 180.0).abs() < 1e-9));

        let extent = HeightfieldTerrain.extent(&path).unwrap().unwrap();
        assert_eq!(extent.lat_n, 46.005);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.json");
        fs::write(
            &path,
            r#"{"data":[1,2,3],"width":2,"height":2,"min_lon":0,"max_lon":1,"min_lat":0,"max_lat":1}"#,
        )
        .unwrap();
        assert!(HeightField::load(&path).is_err());
    }
}
