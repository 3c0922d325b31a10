//! Downscaled output files: pre-clean, per-chunk storage, per-point
//! concatenation along time and the final read-back.
//!
//! File naming, with the default pattern `down_pt_*.json`:
//! ```text
//! down_pt_07_2019-01-01_2019-12-31.json   chunk file, point 07
//! down_pt_07_2020-01-01_2020-06-30.json   chunk file, point 07
//! down_pt_07.json                          final file after concatenation
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::cache;
use crate::error::{Result, TopoError};
use crate::pool::WorkerPool;
use crate::series::{self, PointSeries};
use crate::timesplit::parse_chunk_filename;

/// Placeholder replaced by the point id in output patterns.
pub const WILDCARD: char = '*';

/// Glob-style match where `*` stands for any run of characters.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split(WILDCARD);
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Split a file name at its last dot into `(stem, extension)`.
fn stem_and_ext(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Drives where downscaled series land and how chunk files become one
/// file per point.
#[derive(Debug)]
pub struct DownscaleCoordinator<'a> {
    pub dir: &'a Path,
    /// Final per-point pattern, e.g. `down_pt_*.json`.
    pub pattern: &'a str,
    /// Expected spacing of the series; a gap at a chunk boundary is an error.
    pub timestep: Option<Duration>,
    pub pool: &'a WorkerPool,
}

impl<'a> DownscaleCoordinator<'a> {
    /// Fails with `WildcardMissing` unless the pattern names a `*` slot.
    pub fn new(
        dir: &'a Path,
        pattern: &'a str,
        timestep: Option<Duration>,
        pool: &'a WorkerPool,
    ) -> Result<Self> {
        if !pattern.contains(WILDCARD) {
            return Err(TopoError::WildcardMissing(pattern.to_string()));
        }
        Ok(Self {
            dir,
            pattern,
            timestep,
            pool,
        })
    }

    /// Final file name for one point.
    pub fn final_name(&self, point_id: &str) -> String {
        self.pattern.replace(WILDCARD, point_id)
    }

    /// Delete every file in the output directory matching the final pattern,
    /// chunk leftovers of earlier runs included. Returns how many went.
    pub fn preclean(&self) -> Result<usize> {
        if !self.dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for name in self.list_names()? {
            if wildcard_match(self.pattern, &name) {
                let path = self.dir.join(&name);
                fs::remove_file(&path).map_err(|e| TopoError::io(&path, e))?;
                info!(file = %name, "existing downscaled file removed");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Persist one chunk's series under `chunk_pattern` with `*` replaced by
    /// each point id. Chunk names must parse back to this point's final stem
    /// and ISO dates, otherwise later sorting would not be chronological.
    pub fn store_chunk(&self, chunk_pattern: &str, series: &[PointSeries]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(series.len());
        for s in series {
            s.validate()?;
            let name = chunk_pattern.replace(WILDCARD, &s.point_id);
            if chunk_pattern != self.pattern {
                let final_name = self.final_name(&s.point_id);
                let (stem, ext) = stem_and_ext(&final_name);
                let parsed = parse_chunk_filename(&name)
                    .ok_or_else(|| TopoError::UnsafeChunkName(name.clone()))?;
                if parsed.base != stem || parsed.ext.as_deref() != ext {
                    return Err(TopoError::UnsafeChunkName(name));
                }
            }
            let path = self.dir.join(&name);
            cache::persist(&path, s)?;
            debug!(file = %name, steps = s.len(), "chunk series stored");
            written.push(path);
        }
        Ok(written)
    }

    /// Chunk files of one point, sorted by name (chronological because the
    /// date tokens are ISO).
    pub fn chunk_files(&self, point_id: &str) -> Result<Vec<PathBuf>> {
        let final_name = self.final_name(point_id);
        let (stem, ext) = stem_and_ext(&final_name);
        let mut names: Vec<String> = self
            .list_names()?
            .into_iter()
            .filter(|name| {
                parse_chunk_filename(name)
                    .is_some_and(|c| c.base == stem && c.ext.as_deref() == ext)
            })
            .collect();
        names.sort();
        Ok(names.into_iter().map(|n| self.dir.join(n)).collect())
    }

    /// Join one point's chunk files into its final file, then delete them.
    pub fn concatenate_point(&self, point_id: &str) -> Result<PathBuf> {
        let files = self.chunk_files(point_id)?;
        if files.is_empty() {
            return Err(TopoError::Concat(format!("no chunk files for point {point_id}")));
        }
        let parts = files
            .iter()
            .map(|f| cache::load::<PointSeries>(f))
            .collect::<Result<Vec<_>>>()?;
        let joined = series::concat(parts, self.timestep)?;
        let out = self.dir.join(self.final_name(point_id));
        cache::persist(&out, &joined)?;
        for f in &files {
            fs::remove_file(f).map_err(|e| TopoError::io(f, e))?;
        }
        info!(point = point_id, chunks = files.len(), steps = joined.len(), "point concatenated");
        Ok(out)
    }

    /// Concatenate every point on the worker pool.
    pub fn concatenate(&self, point_ids: &[String]) -> Result<Vec<PathBuf>> {
        self.pool.install(|| {
            point_ids
                .par_iter()
                .map(|id| self.concatenate_point(id))
                .collect()
        })
    }

    /// Load every final file matching the pattern, keyed by point id.
    pub fn read_downscaled(&self) -> Result<BTreeMap<String, PointSeries>> {
        let mut out = BTreeMap::new();
        if !self.dir.is_dir() {
            return Ok(out);
        }
        let mut names: Vec<String> = self
            .list_names()?
            .into_iter()
            .filter(|n| wildcard_match(self.pattern, n) && parse_chunk_filename(n).is_none())
            .collect();
        names.sort();
        for name in names {
            let s: PointSeries = cache::load(&self.dir.join(&name))?;
            out.insert(s.point_id.clone(), s);
        }
        Ok(out)
    }

    fn list_names(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(self.dir).map_err(|e| TopoError::io(self.dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TopoError::io(self.dir, e))?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series(id: &str, start: (i32, u32, u32), hours: i64) -> PointSeries {
        let t0 = NaiveDate::from_ymd_opt(start.0, start.1, start.2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut s = PointSeries::new(id);
        s.time = (0..hours).map(|h| t0 + Duration::hours(h)).collect();
        s.variables
            .insert("t".into(), (0..hours).map(|h| h as f64).collect());
        s
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("down_pt_*.json", "down_pt_01.json"));
        assert!(wildcard_match("down_pt_*.json", "down_pt_01_2019-01-01_2019-12-31.json"));
        assert!(!wildcard_match("down_pt_*.json", "down_pt_01.json.partial"));
        assert!(!wildcard_match("down_pt_*.json", "ds_solar.json"));
        assert!(wildcard_match("*_pt_*.nc", "a_pt_3.nc"));
        assert!(!wildcard_match("a*a", "a"));
        assert!(wildcard_match("exact", "exact"));
    }

    #[test]
    fn pattern_without_wildcard_is_rejected() {
        let pool = WorkerPool::new(1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = DownscaleCoordinator::new(dir.path(), "down_pt.json", None, &pool).unwrap_err();
        assert!(matches!(err, TopoError::WildcardMissing(_)));
    }

    #[test]
    fn preclean_only_touches_matching_files() {
        let pool = WorkerPool::new(1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        for name in ["down_pt_0.json", "down_pt_0_2019-01-01_2019-12-31.json", "notes.txt"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let c = DownscaleCoordinator::new(dir.path(), "down_pt_*.json", None, &pool).unwrap();
        assert_eq!(c.preclean().unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn concatenates_chunks_in_date_order_and_cleans_up() {
        let pool = WorkerPool::new(2).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let c = DownscaleCoordinator::new(dir.path(), "down_pt_*.json", Some(Duration::hours(1)), &pool)
            .unwrap();
        // Stored newest first.
        c.store_chunk(
            "down_pt_*_2019-01-02_2019-01-02.json",
            &[series("0", (2019, 1, 2), 24), series("1", (2019, 1, 2), 24)],
        )
        .unwrap();
        c.store_chunk(
            "down_pt_*_2019-01-01_2019-01-01.json",
            &[series("0", (2019, 1, 1), 24), series("1", (2019, 1, 1), 24)],
        )
        .unwrap();

        c.concatenate(&["0".into(), "1".into()]).unwrap();
        let all = c.read_downscaled().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["0"].len(), 48);
        assert!(all["0"].is_gap_free(Duration::hours(1)));
        assert!(c.chunk_files("0").unwrap().is_empty());
    }

    #[test]
    fn chunk_names_of_other_points_are_not_mixed_in() {
        let pool = WorkerPool::new(1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let c = DownscaleCoordinator::new(dir.path(), "down_pt_*.json", None, &pool).unwrap();
        c.store_chunk(
            "down_pt_*_2019-01-01_2019-01-01.json",
            &[series("a", (2019, 1, 1), 2), series("a_b", (2019, 1, 1), 2)],
        )
        .unwrap();
        assert_eq!(c.chunk_files("a").unwrap().len(), 1);
        assert_eq!(c.chunk_files("a_b").unwrap().len(), 1);
    }

    #[test]
    fn non_iso_chunk_pattern_is_unsafe() {
        let pool = WorkerPool::new(1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let c = DownscaleCoordinator::new(dir.path(), "down_pt_*.json", None, &pool).unwrap();
        let err = c
            .store_chunk("down_pt_*_2019-1-1_2019-12-31.json", &[series("0", (2019, 1, 1), 2)])
            .unwrap_err();
        assert!(matches!(err, TopoError::UnsafeChunkName(_)));
    }

    #[test]
    fn overlapping_chunks_fail_concatenation() {
        let pool = WorkerPool::new(1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let c = DownscaleCoordinator::new(dir.path(), "down_pt_*.json", None, &pool).unwrap();
        c.store_chunk("down_pt_*_2019-01-01_2019-01-01.json", &[series("0", (2019, 1, 1), 30)])
            .unwrap();
        c.store_chunk("down_pt_*_2019-01-02_2019-01-02.json", &[series("0", (2019, 1, 2), 24)])
            .unwrap();
        assert!(matches!(c.concatenate_point("0"), Err(TopoError::Concat(_))));
    }
}
