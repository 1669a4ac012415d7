//! Engine configuration.
//!
//! Sources, later overriding earlier:
//!
//! | Source                     | Example                                  |
//! |----------------------------|------------------------------------------|
//! | built-in defaults          | `chunk_size = 256`                       |
//! | TOML file (optional)       | `world_radius = 40500`                   |
//! | state file (`state_path`)  | `{"world_radius": 50000}`                |
//! | environment (`SOPHON_*`)   | `SOPHON_PLANET_RARITY=16384`             |
//!
//! The state file holds the center and radius a host pushed with
//! `set-pattern` / `set-radius`, written by [`HostOverride::persist`].
//! The explorer binary layers its CLI flags on top of the loaded value.

use crate::error::{EngineError, Result};
use crate::types::{ChunkSize, Coordinate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Oracle seed shared by every worker and the remote ledger.
    pub seed: u64,
    /// Side of the footprints the spiral emits.
    pub chunk_size: ChunkSize,
    /// One in `planet_rarity` coordinates hosts content.
    pub planet_rarity: u64,
    /// Minimum terrain value of discoverable content (0 = every space type).
    pub terrain_floor: f64,
    /// Terrain boundaries between Nebula / Space and Space / DeepSpace.
    pub space_thresholds: (f64, f64),
    /// Radius of the playable disc around the origin.
    pub world_radius: u64,
    /// Spiral center.
    pub init_coords: Coordinate,
    /// Threads used to evaluate points of one footprint.
    pub explore_cores: usize,
    /// Footprints pulled ahead of the one being explored.
    pub queue_depth: usize,
    /// Whether remote `set-radius` messages are honoured.
    pub radius_updates: bool,
    /// redb file for the chunk store; in-memory when unset.
    pub store_path: Option<PathBuf>,
    /// JSON file keeping host-driven center and radius across restarts.
    /// Host changes are session-only when unset.
    pub state_path: Option<PathBuf>,
    pub reconcile: ReconcileConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            seed: 0,
            chunk_size: ChunkSize::S256,
            planet_rarity: 16384,
            terrain_floor: 0.0,
            space_thresholds: (15.0, 17.0),
            world_radius: 40500,
            init_coords: Coordinate::origin(),
            explore_cores: (cpus / 2).max(1),
            queue_depth: 16,
            radius_updates: true,
            store_path: None,
            state_path: None,
            reconcile: ReconcileConfig::default(),
        }
    }
}

/// Knobs of the action reconciliation ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Fraction of a destination's free silver capacity a move may fill.
    /// Kept below 1.0 so local/remote clock skew cannot overshoot the cap.
    pub guard_fraction: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            guard_fraction: 0.95,
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` (if any), then the state file named by
    /// the result (if it exists), then `SOPHON_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::build(path, None)?;
        if let Some(state) = cfg.state_path.clone().filter(|p| p.exists()) {
            cfg = Self::build(path, Some(&state))?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn build(path: Option<&Path>, state: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(::config::File::from(p));
        }
        if let Some(p) = state {
            builder = builder.add_source(
                ::config::File::from(p)
                    .format(::config::FileFormat::Json)
                    .required(false),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("SOPHON")
                .prefix_separator("_")
                .separator("__"),
        );
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.planet_rarity == 0 {
            return Err(EngineError::Config("planet_rarity must be positive".into()));
        }
        if self.explore_cores == 0 {
            return Err(EngineError::Config("explore_cores must be positive".into()));
        }
        if self.queue_depth == 0 {
            return Err(EngineError::Config("queue_depth must be positive".into()));
        }
        let g = self.reconcile.guard_fraction;
        if !(g > 0.0 && g <= 1.0) {
            return Err(EngineError::Config(format!(
                "guard_fraction must be in (0, 1], got {g}"
            )));
        }
        if !self.init_coords.in_range() {
            return Err(EngineError::Config(format!(
                "init_coords {} outside the lattice",
                self.init_coords
            )));
        }
        let r = self.world_radius as i128;
        if self.init_coords.dist_sq(&Coordinate::origin()) > r * r {
            return Err(EngineError::Config(format!(
                "init_coords {} outside world radius {}",
                self.init_coords, self.world_radius
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Host overrides
// ---------------------------------------------------------------------------

/// A setting changed by the host at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostOverride {
    InitCoords(Coordinate),
    WorldRadius(u64),
}

impl HostOverride {
    /// Merge this override into the JSON state file at `path`, keeping
    /// every other key. The file is created if missing.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let io = |e: std::io::Error| EngineError::Config(format!("{}: {e}", path.display()));
        let mut state = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::Map::new(),
            Err(e) => return Err(io(e)),
        };
        let (key, value) = match self {
            HostOverride::InitCoords(c) => ("init_coords", serde_json::to_value(c)?),
            HostOverride::WorldRadius(r) => ("world_radius", serde_json::Value::from(*r)),
        };
        state.insert(key.to_string(), value);
        std::fs::write(path, serde_json::to_vec_pretty(&state)?).map_err(io)
    }
}
