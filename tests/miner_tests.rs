//! Miner (worker coordinator) tests

#[cfg(test)]
mod tests {
    use sophon::error::{EngineError, Result};
    use sophon::kv::KvStore;
    use sophon::miner::{MinerEvent, MinerManager, MinerSettings, MinerState};
    use sophon::oracle::{HashOracle, SpatialOracle};
    use sophon::pattern::SpiralPattern;
    use sophon::store::ChunkStore;
    use sophon::types::{ChunkSize, Coordinate, ExploredRegion, Footprint};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const SEED: u64 = 11;

    fn settings(radius: u64, queue_depth: usize) -> MinerSettings {
        MinerSettings {
            world_radius: radius,
            cores: 2,
            queue_depth,
        }
    }

    fn make_miner(store: Arc<ChunkStore>, settings: MinerSettings) -> MinerManager {
        let oracle = Arc::new(HashOracle::new(SEED, 64, 0.0));
        let pattern = SpiralPattern::new(Coordinate::origin(), ChunkSize::S16);
        MinerManager::new(oracle, store, Box::new(pattern), settings).unwrap()
    }

    fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn disc_footprints(radius: u64) -> Vec<Footprint> {
        (-20..20)
            .flat_map(|qx| (-20..20).map(move |qy| (qx, qy)))
            .map(|(qx, qy)| Footprint::new(Coordinate::new(qx * 16, qy * 16), ChunkSize::S16))
            .filter(|fp| fp.intersects_disc(radius))
            .collect()
    }

    struct FailingKv;

    impl KvStore for FailingKv {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn put(&self, _key: &str, _value: &[u8]) -> Result<()> {
            Err(EngineError::StoreIo("disk full".into()))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        fn iterate(&self, _prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
            Ok(Vec::new())
        }
    }

    // -----------------------------------------------------------------------
    // Radius changes
    // -----------------------------------------------------------------------

    #[test]
    fn shrinking_radius_discards_queued_footprints_outside_disc() {
        let store = Arc::new(ChunkStore::in_memory());
        let miner = make_miner(store.clone(), settings(40_500, 10));

        miner.prefetch();
        assert_eq!(miner.queued(), 10);

        miner.set_radius(2);
        assert_eq!(miner.discarded(), 6);
        assert_eq!(miner.queued(), 4);

        let mut explored = Vec::new();
        while let Some(region) = miner.explore_next().unwrap() {
            explored.push(region.footprint);
        }
        assert_eq!(explored.len(), 4);
        assert!(explored.iter().all(|fp| fp.intersects_disc(2)));
        assert_eq!(miner.discarded(), 6);
        assert_eq!(miner.explored(), 4);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn growing_radius_keeps_queue() {
        let miner = make_miner(Arc::new(ChunkStore::in_memory()), settings(1_000, 8));
        miner.prefetch();
        miner.set_radius(5_000);
        assert_eq!(miner.queued(), 8);
        assert_eq!(miner.discarded(), 0);
    }

    #[test]
    fn growing_radius_revisits_footprints_passed_over() {
        let store = Arc::new(ChunkStore::in_memory());
        let miner = make_miner(store.clone(), settings(16, 4));
        while miner.explore_next().unwrap().is_some() {}
        let small = store.len();
        assert_eq!(small, disc_footprints(16).len());

        miner.set_radius(100);
        while miner.explore_next().unwrap().is_some() {}

        let expected = disc_footprints(100);
        assert_eq!(store.len(), expected.len());
        assert!(expected.iter().all(|fp| store.has(fp)));
        assert!(store.has(&Footprint::new(Coordinate::new(16, 16), ChunkSize::S16)));
        assert_eq!(miner.explored() as usize, expected.len());
    }

    #[test]
    fn shrink_then_grow_recovers_dropped_queue() {
        let store = Arc::new(ChunkStore::in_memory());
        let miner = make_miner(store.clone(), settings(40_500, 10));
        miner.prefetch();
        miner.set_radius(2);
        assert_eq!(miner.discarded(), 6);

        miner.set_radius(40);
        while miner.explore_next().unwrap().is_some() {}
        let expected = disc_footprints(40);
        assert_eq!(store.len(), expected.len());
        assert!(expected.iter().all(|fp| store.has(fp)));
    }

    // -----------------------------------------------------------------------
    // Work selection
    // -----------------------------------------------------------------------

    #[test]
    fn footprints_already_stored_are_skipped() {
        let store = Arc::new(ChunkStore::in_memory());
        let home = Footprint::new(Coordinate::origin(), ChunkSize::S16);
        store
            .put(ExploredRegion {
                footprint: home,
                items: Vec::new(),
                mean_terrain: 0.0,
                discovered_at: 0,
            })
            .unwrap();

        let miner = make_miner(store.clone(), settings(40_500, 4));
        let first = miner.explore_next().unwrap().unwrap();
        assert_ne!(first.footprint, home);
        assert_eq!(first.footprint.origin, Coordinate::new(16, 0));
        assert!(store.get(&home).unwrap().items.is_empty(), "stored record untouched");
    }

    #[test]
    fn replacing_pattern_discards_whole_queue() {
        let miner = make_miner(Arc::new(ChunkStore::in_memory()), settings(40_500, 6));
        miner.prefetch();
        miner.set_pattern(Box::new(SpiralPattern::new(
            Coordinate::new(1_000, 1_000),
            ChunkSize::S32,
        )));
        assert_eq!(miner.queued(), 0);
        assert_eq!(miner.discarded(), 6);

        let next = miner.explore_next().unwrap().unwrap();
        assert_eq!(next.footprint.origin, Coordinate::new(992, 992));
        assert_eq!(miner.status().chunk_size, ChunkSize::S32);
    }

    // -----------------------------------------------------------------------
    // Region content
    // -----------------------------------------------------------------------

    #[test]
    fn explored_region_matches_oracle() {
        let miner = make_miner(Arc::new(ChunkStore::in_memory()), settings(40_500, 1));
        let oracle = HashOracle::new(SEED, 64, 0.0);
        let region = miner.explore_next().unwrap().unwrap();

        let expected: Vec<_> = region
            .footprint
            .points()
            .filter_map(|c| oracle.probe(c).unwrap())
            .collect();
        assert_eq!(region.items, expected);

        let terrain_sum: f64 = region
            .footprint
            .points()
            .map(|c| oracle.terrain_at(c))
            .sum();
        let mean = terrain_sum / region.footprint.area() as f64;
        assert!((region.mean_terrain - mean).abs() < 1e-9);
    }

    #[test]
    fn evaluation_does_not_depend_on_core_count() {
        let miner = make_miner(Arc::new(ChunkStore::in_memory()), settings(40_500, 1));
        let fp = Footprint::new(Coordinate::new(-64, 32), ChunkSize::S64);
        let a = miner.evaluate(fp).unwrap();
        miner.set_cores(1).unwrap();
        let b = miner.evaluate(fp).unwrap();
        assert_eq!(a.items, b.items);
        assert_eq!(a.mean_terrain.to_bits(), b.mean_terrain.to_bits());
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    #[test]
    fn state_transitions() {
        let miner = make_miner(Arc::new(ChunkStore::in_memory()), settings(40_500, 2));
        assert_eq!(miner.state(), MinerState::Idle);
        miner.pause();
        assert_eq!(miner.state(), MinerState::Idle, "pause needs a running miner");
        miner.start();
        assert_eq!(miner.state(), MinerState::Exploring);
        miner.pause();
        assert_eq!(miner.state(), MinerState::Paused);
        miner.resume();
        assert_eq!(miner.state(), MinerState::Exploring);
        miner.stop();
        assert_eq!(miner.state(), MinerState::Idle);
    }

    #[test]
    fn discoveries_are_published() {
        let miner = make_miner(Arc::new(ChunkStore::in_memory()), settings(40_500, 2));
        let mut events = miner.subscribe();
        let region = miner.explore_next().unwrap().unwrap();
        let discovered: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                MinerEvent::Discovered { region, .. } => Some(region.footprint),
                _ => None,
            })
            .collect();
        assert_eq!(discovered, vec![region.footprint]);
        assert!(miner.hash_rate() > 0.0);
    }

    #[test]
    fn store_write_failure_pauses_miner() {
        let store = Arc::new(ChunkStore::open(Arc::new(FailingKv)).unwrap());
        let miner = make_miner(store.clone(), settings(40_500, 2));
        let mut events = miner.subscribe();
        miner.start();

        match miner.explore_next() {
            Err(EngineError::StoreIo(msg)) => assert!(msg.contains("disk full")),
            other => panic!("expected StoreIo, got {:?}", other.map(|r| r.map(|r| r.footprint))),
        }
        assert_eq!(miner.state(), MinerState::Paused);
        assert!(store.is_empty());
        assert!(events
            .drain()
            .iter()
            .any(|e| matches!(e, MinerEvent::Error(reason) if reason.contains("disk full"))));
    }

    // -----------------------------------------------------------------------
    // Driver thread
    // -----------------------------------------------------------------------

    #[test]
    fn spawned_miner_explores_disc_then_idles() {
        let store = Arc::new(ChunkStore::in_memory());
        let miner = Arc::new(make_miner(store.clone(), settings(20, 4)));
        let handle = miner.spawn().unwrap();
        miner.start();

        let expected = disc_footprints(20).len();

        wait_for("miner to go idle", || miner.state() == MinerState::Idle);
        assert_eq!(store.len(), expected);
        assert_eq!(miner.status().explored as usize, expected);
        handle.shutdown();
    }

    #[test]
    fn idle_miner_wakes_when_radius_grows() {
        let store = Arc::new(ChunkStore::in_memory());
        let miner = Arc::new(make_miner(store.clone(), settings(20, 4)));
        let handle = miner.spawn().unwrap();
        miner.start();
        wait_for("miner to go idle", || miner.state() == MinerState::Idle);
        assert_eq!(store.len(), disc_footprints(20).len());

        miner.set_radius(60);
        let expected = disc_footprints(60).len();
        wait_for("larger disc explored", || {
            store.len() == expected && miner.state() == MinerState::Idle
        });

        // A stopped miner stays stopped.
        miner.stop();
        miner.set_radius(90);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(miner.state(), MinerState::Idle);
        assert_eq!(store.len(), expected);
        handle.shutdown();
    }

    #[test]
    fn paused_miner_stops_between_footprints() {
        let store = Arc::new(ChunkStore::in_memory());
        let miner = Arc::new(make_miner(store.clone(), settings(40_500, 4)));
        let handle = miner.spawn().unwrap();
        miner.start();
        wait_for("first footprint", || store.len() >= 2);

        miner.pause();
        // Let a footprint in flight finish.
        std::thread::sleep(Duration::from_millis(200));
        let frozen = store.len();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(store.len(), frozen);

        miner.resume();
        wait_for("exploration to resume", || store.len() > frozen);
        handle.shutdown();
    }
}
