//! Spatial hash oracle: the deterministic coordinate → (identifier, terrain)
//! function that decides what exists at every lattice point.
//!
//! Both halves are computed from integer hashing plus IEEE-754 basic
//! arithmetic only, so any implementation fed the same seed produces
//! bit-identical output and workers never need to agree on anything else.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{Coordinate, DiscoveredItem, LocationId, SpaceType};

/// Upper bound (exclusive) of the terrain scale.
pub const TERRAIN_MAX: f64 = 32.0;

/// Length scale of the coarsest noise octave in lattice units.
const NOISE_SCALE: f64 = 4096.0;
const NOISE_OCTAVES: u32 = 3;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Anything that can identify lattice points and gate discoverable content.
///
/// Implementations must be pure: no interior mutability, safe to share
/// between any number of threads.
pub trait SpatialOracle: Send + Sync {
    fn identify(&self, c: Coordinate) -> Result<(LocationId, f64)>;

    /// Rarity / threshold gate applied to an identified point.
    fn is_discoverable(&self, id: &LocationId, terrain: f64) -> bool;

    /// Identify `c` and return it as content if it passes the gate.
    fn probe(&self, c: Coordinate) -> Result<Option<DiscoveredItem>> {
        let (id, terrain) = self.identify(c)?;
        Ok(self
            .is_discoverable(&id, terrain)
            .then_some(DiscoveredItem { coords: c, id, terrain }))
    }
}

// ---------------------------------------------------------------------------
// Hash oracle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HashOracle {
    pub seed: u64,
    /// One in `rarity` identifiers passes the gate.
    pub rarity: u64,
    /// Points with terrain below this value are never content.
    pub terrain_floor: f64,
    /// Nebula / Space / DeepSpace boundaries on the terrain scale.
    pub space_thresholds: (f64, f64),
    gate: u64,
}

impl HashOracle {
    pub fn new(seed: u64, rarity: u64, terrain_floor: f64) -> Self {
        let rarity = rarity.max(1);
        Self {
            seed,
            rarity,
            terrain_floor,
            space_thresholds: (15.0, 17.0),
            gate: u64::MAX / rarity,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        let (nebula, space) = cfg.space_thresholds;
        Self::new(cfg.seed, cfg.planet_rarity, cfg.terrain_floor).with_space_thresholds(nebula, space)
    }

    pub fn with_space_thresholds(mut self, nebula: f64, space: f64) -> Self {
        self.space_thresholds = (nebula, space);
        self
    }

    /// One-way identifier: MD5 over `seed ‖ x ‖ y`, little-endian.
    pub fn location_id(&self, c: Coordinate) -> LocationId {
        let mut buf = [0u8; 24];
        buf[..8].copy_from_slice(&self.seed.to_le_bytes());
        buf[8..16].copy_from_slice(&c.x.to_le_bytes());
        buf[16..].copy_from_slice(&c.y.to_le_bytes());
        LocationId(md5::compute(buf).0)
    }

    /// Coherent terrain field in `[0, TERRAIN_MAX)`.
    pub fn terrain_at(&self, c: Coordinate) -> f64 {
        let mut total = 0.0;
        let mut weight = 0.0;
        let mut amp = 1.0;
        for octave in 0..NOISE_OCTAVES {
            // Powers of two keep the scaling exact.
            let freq = (1u64 << octave) as f64 / NOISE_SCALE;
            let n = value_noise(
                self.seed.wrapping_add(octave as u64),
                c.x as f64 * freq,
                c.y as f64 * freq,
            );
            total += n * amp;
            weight += amp;
            amp *= 0.5;
        }
        (total / weight) * TERRAIN_MAX
    }

    pub fn space_type(&self, terrain: f64) -> SpaceType {
        SpaceType::classify(terrain, self.space_thresholds)
    }
}

impl SpatialOracle for HashOracle {
    fn identify(&self, c: Coordinate) -> Result<(LocationId, f64)> {
        if !c.in_range() {
            return Err(EngineError::OracleInput(c));
        }
        Ok((self.location_id(c), self.terrain_at(c)))
    }

    fn is_discoverable(&self, id: &LocationId, terrain: f64) -> bool {
        id.prefix_u64() < self.gate && terrain >= self.terrain_floor
    }
}

// ---------------------------------------------------------------------------
// Noise
// ---------------------------------------------------------------------------

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Uniform value in `[0, 1)` attached to an integer lattice corner.
fn lattice_value(seed: u64, ix: i64, iy: i64) -> f64 {
    let h = splitmix64(
        seed ^ splitmix64(ix as u64) ^ splitmix64((iy as u64).rotate_left(32) ^ 0xD6E8_FEB8_6659_FD93),
    );
    (h >> 11) as f64 / (1u64 << 53) as f64
}

fn value_noise(seed: u64, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (ix, iy) = (x0 as i64, y0 as i64);
    let fade = |t: f64| t * t * (3.0 - 2.0 * t);
    let sx = fade(x - x0);
    let sy = fade(y - y0);

    let a = lattice_value(seed, ix, iy);
    let b = lattice_value(seed, ix + 1, iy);
    let c = lattice_value(seed, ix, iy + 1);
    let d = lattice_value(seed, ix + 1, iy + 1);

    let lerp = |lo: f64, hi: f64, t: f64| lo + (hi - lo) * t;
    lerp(lerp(a, b, sx), lerp(c, d, sx), sy)
}
