//! Self-contained collaborators for running a project from local files:
//! a JSON heightfield DEM and a single-cell forcing file under
//! `inputs/climate/`.

pub mod archive;
pub mod heightfield;
pub mod horizon;
pub mod lapse_rate;
pub mod solar;

use topo_core::{Collaborators, GeographicIdentity, ProjectPaths};

/// Reference collaborators for a project laid out as `paths`.
pub fn collaborators(paths: &ProjectPaths) -> Collaborators {
    Collaborators {
        terrain: Box::new(heightfield::HeightfieldTerrain),
        climate: Box::new(archive::LocalClimateArchive::new(&paths.climate)),
        horizon: Box::new(horizon::RayHorizon),
        solar: Box::new(solar::SimpleSolar),
        downscaler: Box::new(lapse_rate::LapseRateDownscaler),
        transform: Box::new(GeographicIdentity),
    }
}
