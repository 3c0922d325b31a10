//! Direct-point sampling: terrain attributes at a user-supplied list of
//! coordinates, no clustering.

use std::collections::HashSet;
use std::path::Path;

use crate::config::Interpolation;
use crate::error::{Result, TopoError};
use crate::grid::TerrainGrid;
use crate::points::{padded_ids, PointTable, RepresentativePoint};

/// One row of the point list.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Read a CSV with `x` and `y` columns (grid reference system) and an
/// optional identifier column.
pub fn read_sites(path: &Path, id_column: Option<&str>) -> Result<Vec<Site>> {
    if !path.is_file() {
        return Err(TopoError::MissingFile(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            TopoError::Config(format!("{}: no '{name}' column", path.display()))
        })
    };
    let xi = column("x")?;
    let yi = column("y")?;
    let id_i = id_column.map(column).transpose()?;

    let mut sites = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let number = |i: usize| -> Result<f64> {
            let raw = record.get(i).unwrap_or("").trim();
            raw.parse().map_err(|_| {
                TopoError::Config(format!(
                    "{}: row {}: '{raw}' is not a number",
                    path.display(),
                    line + 1
                ))
            })
        };
        sites.push(Site {
            id: id_i.map(|i| normalize_id(record.get(i).unwrap_or(""))),
            x: number(xi)?,
            y: number(yi)?,
        });
    }
    Ok(sites)
}

/// Integer-looking ids lose leading zeros and whitespace (`" 007"` → `"7"`);
/// anything else is kept verbatim.
fn normalize_id(raw: &str) -> String {
    let t = raw.trim();
    match t.parse::<i64>() {
        Ok(n) => n.to_string(),
        Err(_) => t.to_string(),
    }
}

/// Sample every grid column at each site. Sites without an id get
/// 1-based, zero-padded row numbers.
pub fn extract_points(grid: &TerrainGrid, sites: &[Site], method: Interpolation) -> Result<PointTable> {
    if sites.is_empty() {
        return Err(TopoError::Sampling("point list is empty".into()));
    }
    let generated = padded_ids(sites.len(), true);
    let mut seen = HashSet::new();
    let mut points = Vec::with_capacity(sites.len());

    for (site, fallback) in sites.iter().zip(generated) {
        let point_id = site.id.clone().unwrap_or(fallback);
        if !seen.insert(point_id.clone()) {
            return Err(TopoError::Sampling(format!("duplicate point id '{point_id}'")));
        }
        if !grid.contains(site.x, site.y) {
            return Err(TopoError::Sampling(format!(
                "point '{point_id}' at ({}, {}) lies outside the terrain grid",
                site.x, site.y
            )));
        }
        let attributes = grid
            .fields
            .keys()
            .filter_map(|name| {
                grid.sample(name, site.x, site.y, method)
                    .map(|v| (name.clone(), v))
            })
            .collect();
        points.push(RepresentativePoint {
            point_id,
            x: site.x,
            y: site.y,
            lon: f64::NAN,
            lat: f64::NAN,
            attributes,
        });
    }
    Ok(PointTable::new(points))
}
