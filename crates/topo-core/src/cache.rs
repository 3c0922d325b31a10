//! Stage cache: an artifact file's existence is the only freshness signal.
//!
//! `load_or_compute` is unversioned memoization keyed by output path. A
//! re-run with changed inputs but the same path returns the stale artifact;
//! the only invalidation is cleaning the output directory up front.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProjectPaths;
use crate::error::{Result, TopoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Loaded from an existing file.
    Hit,
    /// Computed and persisted.
    Computed,
}

/// Return the artifact at `path`, computing and persisting it when absent.
pub fn load_or_compute<T, F>(path: &Path, compute: F) -> Result<(T, CacheOutcome)>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    if path.is_file() {
        let value = load(path)?;
        info!(path = %path.display(), "artifact exists, loaded");
        return Ok((value, CacheOutcome::Hit));
    }
    let value = compute()?;
    persist(path, &value)?;
    info!(path = %path.display(), "artifact computed and saved");
    Ok((value, CacheOutcome::Computed))
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| TopoError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Load `path` if it exists.
pub fn load_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if path.is_file() {
        load(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Serialize to a sibling `.partial` file then rename over `path`, so an
/// interrupted write never leaves a truncated artifact under the final name.
pub fn persist<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| TopoError::io(parent, e))?;
        }
    }
    let tmp = partial_path(path);
    let bytes = serde_json::to_vec(value)?;
    {
        let mut f = fs::File::create(&tmp).map_err(|e| TopoError::io(&tmp, e))?;
        f.write_all(&bytes).map_err(|e| TopoError::io(&tmp, e))?;
        f.sync_all().map_err(|e| TopoError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| TopoError::io(path, e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "persisted");
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Remove a directory tree. Failure is logged and ignored; returns whether
/// anything was removed.
pub fn remove_dir_best_effort(dir: &Path) -> bool {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(dir = %dir.display(), "directory cleaned");
            true
        }
        Err(e) => {
            info!(dir = %dir.display(), error = %e, "nothing to clean");
            false
        }
    }
}

/// Wipe `outputs/` (and everything cached in it) and recreate it empty.
pub fn clean_outputs(paths: &ProjectPaths) -> Result<()> {
    remove_dir_best_effort(&paths.outputs);
    if !paths.downscaled.starts_with(&paths.outputs) {
        remove_dir_best_effort(&paths.downscaled);
    }
    paths.create_dirs()
}

/// Remove the downstream simulation directories derived from a project.
pub fn clean_simulations(project: &Path) {
    for sub in ["fsm_sims", "ensemble"] {
        remove_dir_best_effort(&project.join(sub));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn second_call_is_a_hit_and_skips_compute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");
        let calls = Cell::new(0);

        let compute = || {
            calls.set(calls.get() + 1);
            Ok(vec![1.0f64, 2.0, 3.0])
        };
        let (a, first) = load_or_compute(&path, compute).unwrap();
        let (b, second) = load_or_compute::<Vec<f64>, _>(&path, || {
            calls.set(calls.get() + 1);
            Ok(vec![9.0])
        })
        .unwrap();

        assert_eq!(first, CacheOutcome::Computed);
        assert_eq!(second, CacheOutcome::Hit);
        assert_eq!(a, b);
        assert_eq!(calls.get(), 1);
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn floats_reload_exactly_and_repersist_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("floats.json");
        let mut values = vec![7.2299999999999995, 7.05 + 0.1 * 2.0, 0.1 + 0.2, 1e-310, f64::MAX];
        values.extend((0..20_000).map(|i| 1000.0 + i as f64 * 0.1 / 3.0));
        persist(&path, &values).unwrap();
        let first = fs::read(&path).unwrap();

        let back: Vec<f64> = load(&path).unwrap();
        for (a, b) in values.iter().zip(&back) {
            assert_eq!(a.to_bits(), b.to_bits(), "{a} reloaded as {b}");
        }
        persist(&path, &back).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn existing_file_is_trusted_even_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        persist(&path, &41u32).unwrap();
        let (v, outcome) = load_or_compute(&path, || Ok(42u32)).unwrap();
        assert_eq!((v, outcome), (41, CacheOutcome::Hit));
    }

    #[test]
    fn compute_errors_propagate_and_persist_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        let res = load_or_compute::<u32, _>(&path, || {
            Err(TopoError::Collaborator(anyhow::anyhow!("solar failed")))
        });
        assert!(matches!(res, Err(TopoError::Collaborator(_))));
        assert!(!path.exists());
    }

    #[test]
    fn removing_missing_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_dir_best_effort(&dir.path().join("absent")));
        let sims = dir.path().join("fsm_sims");
        fs::create_dir_all(sims.join("a")).unwrap();
        clean_simulations(dir.path());
        assert!(!sims.exists());
    }
}
