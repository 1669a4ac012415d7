//! Traversal pattern tests

#[cfg(test)]
mod tests {
    use sophon::pattern::{SpiralPattern, TraversalPattern};
    use sophon::types::{ChunkSize, Coordinate, Footprint};
    use std::collections::HashSet;

    fn spiral(x: i64, y: i64, size: ChunkSize) -> SpiralPattern {
        SpiralPattern::new(Coordinate::new(x, y), size)
    }

    fn ring_of(fp: &Footprint, home: &Footprint) -> i64 {
        let s = fp.side_len();
        let dx = (fp.origin.x - home.origin.x) / s;
        let dy = (fp.origin.y - home.origin.y) / s;
        dx.abs().max(dy.abs())
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn first_five_origins_go_east_then_clockwise() {
        let origins: Vec<(i64, i64)> = spiral(0, 0, ChunkSize::S16)
            .take(5)
            .map(|fp| (fp.origin.x, fp.origin.y))
            .collect();
        assert_eq!(origins, vec![(0, 0), (16, 0), (0, -16), (-16, 0), (0, 16)]);
    }

    #[test]
    fn first_five_origins_have_non_decreasing_distance() {
        let center = Coordinate::new(0, 0);
        let dists: Vec<i128> = spiral(0, 0, ChunkSize::S16)
            .take(5)
            .map(|fp| fp.origin.dist_sq(&center))
            .collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]), "{:?}", dists);
    }

    #[test]
    fn rings_are_emitted_in_order() {
        let mut pattern = spiral(1000, -2000, ChunkSize::S64);
        let home = pattern.next_footprint();
        let mut last_ring = 0;
        let mut last_dist = 0;
        for _ in 0..1200 {
            let fp = pattern.next_footprint();
            let ring = ring_of(&fp, &home);
            assert!(ring >= last_ring, "ring went back from {} to {}", last_ring, ring);
            let dist = fp.origin.dist_sq(&home.origin);
            if ring == last_ring {
                assert!(dist >= last_dist, "distance shrank inside ring {}", ring);
            }
            last_ring = ring;
            last_dist = dist;
        }
    }

    #[test]
    fn ring_sizes_match_square_perimeters() {
        assert_eq!(SpiralPattern::ring_offsets(0).len(), 1);
        for k in 1..6u64 {
            assert_eq!(SpiralPattern::ring_offsets(k).len() as u64, 8 * k);
        }
    }

    #[test]
    fn cursor_positions() {
        assert_eq!(SpiralPattern::cursor(0), (0, 0));
        assert_eq!(SpiralPattern::cursor(1), (1, 0));
        assert_eq!(SpiralPattern::cursor(8), (1, 7));
        assert_eq!(SpiralPattern::cursor(9), (2, 0));
        assert_eq!(SpiralPattern::cursor(24), (2, 15));
        assert_eq!(SpiralPattern::cursor(25), (3, 0));
    }

    // -----------------------------------------------------------------------
    // Coverage
    // -----------------------------------------------------------------------

    #[test]
    fn footprints_never_repeat_and_stay_aligned() {
        let mut seen = HashSet::new();
        for fp in spiral(-37, 91, ChunkSize::S32).take(2500) {
            assert_eq!(fp.origin.x.rem_euclid(32), 0);
            assert_eq!(fp.origin.y.rem_euclid(32), 0);
            assert!(seen.insert(fp.bucket_key()), "repeated {}", fp);
        }
    }

    #[test]
    fn home_footprint_contains_center() {
        let center = Coordinate::new(100, -7);
        let home = spiral(100, -7, ChunkSize::S32).next_footprint();
        assert!(home.contains(&center));
        assert_eq!(home.origin, Coordinate::new(96, -32));
    }

    // -----------------------------------------------------------------------
    // Resumability
    // -----------------------------------------------------------------------

    #[test]
    fn resume_continues_exactly() {
        let mut fresh = spiral(5, 5, ChunkSize::S16);
        for _ in 0..37 {
            fresh.next_footprint();
        }
        let mut resumed = SpiralPattern::resume(Coordinate::new(5, 5), ChunkSize::S16, 37);
        assert_eq!(resumed.consumed(), 37);
        for _ in 0..50 {
            assert_eq!(fresh.next_footprint(), resumed.next_footprint());
        }
    }

    // -----------------------------------------------------------------------
    // Exhaustion
    // -----------------------------------------------------------------------

    #[test]
    fn small_disc_is_exhausted_after_first_ring() {
        let mut pattern = spiral(0, 0, ChunkSize::S16);
        assert!(!pattern.exhausted_within(2));
        for _ in 0..9 {
            pattern.next_footprint();
        }
        assert!(pattern.exhausted_within(2));
        assert!(!pattern.exhausted_within(40_500));
    }

    #[test]
    fn exhausted_pattern_emits_only_footprints_outside_disc() {
        let mut pattern = spiral(0, 0, ChunkSize::S16);
        while !pattern.exhausted_within(100) {
            pattern.next_footprint();
        }
        for _ in 0..500 {
            assert!(!pattern.next_footprint().intersects_disc(100));
        }
    }
}
