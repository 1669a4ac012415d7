//! Traversal patterns: lazy, resumable sequences of footprints covering the
//! lattice outward from a center.

use crate::types::{ChunkSize, Coordinate, Footprint};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Source of exploration work for the miner.
///
/// A pattern is fully described by `(center, chunk_size, consumed)`; the
/// miner persists those three values and recreates the pattern on restart.
pub trait TraversalPattern: Send {
    /// The next footprint. Sequences are infinite and never repeat.
    fn next_footprint(&mut self) -> Footprint;

    fn center(&self) -> Coordinate;

    fn chunk_size(&self) -> ChunkSize;

    /// Number of footprints emitted so far.
    fn consumed(&self) -> u64;

    /// Move the cursor back so the next footprint is the one emitted at
    /// position `consumed`.
    fn rewind(&mut self, consumed: u64);

    /// True when every footprint this pattern has yet to emit lies entirely
    /// outside the world disc of `radius` around the origin.
    fn exhausted_within(&self, _radius: u64) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Spiral
// ---------------------------------------------------------------------------

/// Square rings of grid cells around the cell containing `center`.
///
/// Ring `k` holds the cells at Chebyshev distance `k`. Inside a ring, cells
/// are ordered by Euclidean distance, ties going clockwise from due east.
#[derive(Debug, Clone)]
pub struct SpiralPattern {
    center: Coordinate,
    size: ChunkSize,
    home: (i64, i64),
    index: u64,
    ring: Option<(u64, Vec<(i64, i64)>)>,
}

impl SpiralPattern {
    pub fn new(center: Coordinate, size: ChunkSize) -> Self {
        Self::resume(center, size, 0)
    }

    /// Recreate a pattern that has already emitted `consumed` footprints.
    pub fn resume(center: Coordinate, size: ChunkSize, consumed: u64) -> Self {
        let s = size.side() as i64;
        Self {
            center,
            size,
            home: (center.x.div_euclid(s), center.y.div_euclid(s)),
            index: consumed,
            ring: None,
        }
    }

    /// Ring number and position within the ring of footprint `index`.
    pub fn cursor(index: u64) -> (u64, u64) {
        if index == 0 {
            return (0, 0);
        }
        let k = (isqrt(index) + 1) / 2;
        let inner = 2 * k - 1;
        (k, index - inner * inner)
    }

    /// Grid offsets of ring `k` in emission order.
    pub fn ring_offsets(k: u64) -> Vec<(i64, i64)> {
        let k = k as i64;
        if k == 0 {
            return vec![(0, 0)];
        }
        let mut cells = Vec::with_capacity(8 * k as usize);
        for d in -k..=k {
            cells.push((d, -k));
            cells.push((d, k));
        }
        for d in (-k + 1)..k {
            cells.push((-k, d));
            cells.push((k, d));
        }
        cells.sort_by(|a, b| {
            let da = a.0 * a.0 + a.1 * a.1;
            let db = b.0 * b.0 + b.1 * b.1;
            da.cmp(&db).then_with(|| clockwise_from_east(*a, *b))
        });
        cells
    }

    fn footprint_at(&self, offset: (i64, i64)) -> Footprint {
        let s = self.size.side() as i64;
        Footprint::new(
            Coordinate::new((self.home.0 + offset.0) * s, (self.home.1 + offset.1) * s),
            self.size,
        )
    }
}

impl TraversalPattern for SpiralPattern {
    fn next_footprint(&mut self) -> Footprint {
        let (k, pos) = Self::cursor(self.index);
        let cached = matches!(&self.ring, Some((ring, _)) if *ring == k);
        if !cached {
            self.ring = Some((k, Self::ring_offsets(k)));
        }
        let offset = match &self.ring {
            Some((_, offsets)) => offsets[pos as usize],
            None => (0, 0),
        };
        self.index += 1;
        self.footprint_at(offset)
    }

    fn center(&self) -> Coordinate {
        self.center
    }

    fn chunk_size(&self) -> ChunkSize {
        self.size
    }

    fn consumed(&self) -> u64 {
        self.index
    }

    fn rewind(&mut self, consumed: u64) {
        self.index = consumed;
    }

    fn exhausted_within(&self, radius: u64) -> bool {
        let (k, _) = Self::cursor(self.index);
        if k == 0 {
            return false;
        }
        // Rings below `k` cover cells home-(k-1) ..= home+(k-1); the disc's
        // bounding box must sit strictly inside them on both axes.
        let s = self.size.side() as i128;
        let k = k as i128;
        let r = radius as i128;
        [self.home.0, self.home.1].iter().all(|&h| {
            let h = h as i128;
            (h - (k - 1)) * s <= -r && r <= (h + k) * s - 1
        })
    }
}

impl Iterator for SpiralPattern {
    type Item = Footprint;

    fn next(&mut self) -> Option<Footprint> {
        Some(self.next_footprint())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Angular order starting due east and sweeping clockwise (y grows north).
fn clockwise_from_east(a: (i64, i64), b: (i64, i64)) -> Ordering {
    let half = |(x, y): (i64, i64)| -> u8 {
        if y < 0 || (y == 0 && x > 0) {
            0
        } else {
            1
        }
    };
    half(a).cmp(&half(b)).then_with(|| {
        let cross = a.0 * b.1 - a.1 * b.0;
        cross.cmp(&0)
    })
}

fn isqrt(n: u64) -> u64 {
    let mut r = (n as f64).sqrt() as u64;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r
}
