//! Core exploration types shared across all modules.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Largest absolute coordinate the oracle accepts on either axis.
pub const MAX_COORD: i64 = 1 << 40;

// ---------------------------------------------------------------------------
// Lattice coordinates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i64,
    pub y: i64,
}

impl Coordinate {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self::new(0, 0)
    }

    pub fn in_range(&self) -> bool {
        self.x.unsigned_abs() <= MAX_COORD as u64 && self.y.unsigned_abs() <= MAX_COORD as u64
    }

    /// Squared Euclidean distance to `other`, exact for in-range coordinates.
    pub fn dist_sq(&self, other: &Coordinate) -> i128 {
        let dx = self.x as i128 - other.x as i128;
        let dy = self.y as i128 - other.y as i128;
        dx * dx + dy * dy
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Footprints
// ---------------------------------------------------------------------------

/// Allowed footprint side lengths. Sides are powers of two so footprints
/// produced at one size always tile the lattice on a shared grid.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ChunkSize {
    S16,
    S32,
    S64,
    S128,
    S256,
}

impl ChunkSize {
    pub const ALL: [ChunkSize; 5] = [
        ChunkSize::S16,
        ChunkSize::S32,
        ChunkSize::S64,
        ChunkSize::S128,
        ChunkSize::S256,
    ];

    pub fn side(self) -> u32 {
        match self {
            ChunkSize::S16 => 16,
            ChunkSize::S32 => 32,
            ChunkSize::S64 => 64,
            ChunkSize::S128 => 128,
            ChunkSize::S256 => 256,
        }
    }

    pub fn from_side(side: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.side() == side)
    }
}

impl TryFrom<u32> for ChunkSize {
    type Error = String;

    fn try_from(side: u32) -> Result<Self, Self::Error> {
        Self::from_side(side).ok_or_else(|| format!("unsupported chunk size {side}"))
    }
}

impl From<ChunkSize> for u32 {
    fn from(size: ChunkSize) -> u32 {
        size.side()
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::S256
    }
}

/// A square region of the lattice: the unit of exploration work.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    /// Lower-left corner.
    pub origin: Coordinate,
    pub side: ChunkSize,
}

impl Footprint {
    pub fn new(origin: Coordinate, side: ChunkSize) -> Self {
        Self { origin, side }
    }

    /// The grid-aligned footprint of size `side` containing `c`.
    pub fn containing(c: Coordinate, side: ChunkSize) -> Self {
        let s = side.side() as i64;
        Self::new(
            Coordinate::new(c.x.div_euclid(s) * s, c.y.div_euclid(s) * s),
            side,
        )
    }

    pub fn side_len(&self) -> i64 {
        self.side.side() as i64
    }

    pub fn area(&self) -> u64 {
        let s = self.side.side() as u64;
        s * s
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        let s = self.side_len();
        c.x >= self.origin.x && c.x < self.origin.x + s && c.y >= self.origin.y && c.y < self.origin.y + s
    }

    /// Every lattice point inside the footprint, row by row from the origin.
    pub fn points(&self) -> impl Iterator<Item = Coordinate> + '_ {
        let s = self.side_len();
        let o = self.origin;
        (0..s).flat_map(move |dy| (0..s).map(move |dx| Coordinate::new(o.x + dx, o.y + dy)))
    }

    /// True when any lattice point of the footprint lies within `radius` of
    /// the world origin.
    pub fn intersects_disc(&self, radius: u64) -> bool {
        let s = self.side_len();
        let nearest = |lo: i64| -> i64 { 0i64.clamp(lo, lo + s - 1) };
        let near = Coordinate::new(nearest(self.origin.x), nearest(self.origin.y));
        let r = radius as i128;
        near.dist_sq(&Coordinate::origin()) <= r * r
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::of(self)
    }
}

impl fmt::Display for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.origin, self.side.side())
    }
}

/// Deterministic storage key of a footprint: `bucket:<qx>:<qy>:<side>`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BucketKey(String);

impl BucketKey {
    pub const PREFIX: &'static str = "bucket:";

    pub fn of(footprint: &Footprint) -> Self {
        let s = footprint.side_len();
        let qx = footprint.origin.x.div_euclid(s);
        let qy = footprint.origin.y.div_euclid(s);
        Self(format!("{}{}:{}:{}", Self::PREFIX, qx, qy, s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Discovered content
// ---------------------------------------------------------------------------

/// Oracle identifier of a coordinate. Serialised as lowercase hex.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LocationId(pub [u8; 16]);

impl LocationId {
    /// Top 64 bits, big-endian. Used by the rarity gate.
    pub fn prefix_u64(&self) -> u64 {
        let mut hi = [0u8; 8];
        hi.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(hi)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }
}

impl fmt::Debug for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocationId({})", self.to_hex())
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for LocationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LocationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        LocationId::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid location id '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredItem {
    pub coords: Coordinate,
    pub id: LocationId,
    pub terrain: f64,
}

/// Everything learned by exploring one footprint. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExploredRegion {
    pub footprint: Footprint,
    pub items: Vec<DiscoveredItem>,
    /// Mean terrain value over every point of the footprint.
    pub mean_terrain: f64,
    /// Unix epoch milliseconds.
    pub discovered_at: u64,
}

impl ExploredRegion {
    pub fn key(&self) -> BucketKey {
        self.footprint.bucket_key()
    }
}

// ---------------------------------------------------------------------------
// Terrain classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    Nebula,
    Space,
    DeepSpace,
}

impl SpaceType {
    pub fn classify(terrain: f64, thresholds: (f64, f64)) -> Self {
        if terrain < thresholds.0 {
            SpaceType::Nebula
        } else if terrain < thresholds.1 {
            SpaceType::Space
        } else {
            SpaceType::DeepSpace
        }
    }
}
