//! Chunk store tests

#[cfg(test)]
mod tests {
    use sophon::kv::{KvStore, MemoryKv, RedbKv};
    use sophon::store::ChunkStore;
    use sophon::types::{ChunkSize, Coordinate, DiscoveredItem, ExploredRegion, Footprint, LocationId};
    use std::sync::Arc;
    use std::thread;

    fn region(x: i64, y: i64, items: usize) -> ExploredRegion {
        let footprint = Footprint::containing(Coordinate::new(x, y), ChunkSize::S16);
        ExploredRegion {
            footprint,
            items: (0..items)
                .map(|i| DiscoveredItem {
                    coords: Coordinate::new(footprint.origin.x + i as i64, footprint.origin.y),
                    id: LocationId([i as u8; 16]),
                    terrain: 12.5,
                })
                .collect(),
            mean_terrain: 12.5,
            discovered_at: 1_700_000_000_000,
        }
    }

    // -----------------------------------------------------------------------
    // Bucket keys
    // -----------------------------------------------------------------------

    #[test]
    fn bucket_key_format() {
        let fp = Footprint::new(Coordinate::new(-32, 48), ChunkSize::S16);
        assert_eq!(fp.bucket_key().as_str(), "bucket:-2:3:16");
        let same = Footprint::containing(Coordinate::new(-20, 50), ChunkSize::S16);
        assert_eq!(fp.bucket_key(), same.bucket_key());
    }

    // -----------------------------------------------------------------------
    // Idempotence
    // -----------------------------------------------------------------------

    #[test]
    fn second_put_is_a_no_op() {
        let store = ChunkStore::in_memory();
        assert!(store.put(region(0, 0, 2)).unwrap());
        assert!(!store.put(region(0, 0, 5)).unwrap());
        assert_eq!(store.len(), 1);
        let kept = store.get(&region(0, 0, 0).footprint).unwrap();
        assert_eq!(kept.items.len(), 2, "first record wins");
    }

    #[test]
    fn has_and_get_track_puts() {
        let store = ChunkStore::in_memory();
        let r = region(100, 100, 1);
        assert!(!store.has(&r.footprint));
        assert!(store.get(&r.footprint).is_none());
        store.put(r.clone()).unwrap();
        assert!(store.has(&r.footprint));
        assert_eq!(*store.get(&r.footprint).unwrap(), r);
    }

    #[test]
    fn concurrent_puts_of_same_footprint_store_once() {
        let store = Arc::new(ChunkStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.put(region(48, -48, 1)).unwrap())
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|new| *new)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stats_count_regions_and_items() {
        let store = ChunkStore::in_memory();
        store.put(region(0, 0, 2)).unwrap();
        store.put(region(16, 0, 3)).unwrap();
        let stats = store.stats();
        assert_eq!(stats.regions, 2);
        assert_eq!(stats.items, 5);
    }

    #[test]
    fn iter_is_ordered_and_restartable() {
        let store = ChunkStore::in_memory();
        for x in [64, 0, 32, 16, 48] {
            store.put(region(x, 0, 0)).unwrap();
        }
        let keys: Vec<String> = store.iter().map(|r| r.key().to_string()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(store.iter().count(), 5);
        assert_eq!(store.iter().count(), 5);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[test]
    fn put_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.redb");
        {
            let kv: Arc<dyn KvStore> = Arc::new(RedbKv::open(&path).unwrap());
            let store = ChunkStore::open(kv).unwrap();
            assert!(store.put(region(0, 0, 3)).unwrap());
            assert!(store.put(region(16, 16, 0)).unwrap());
        }
        let kv: Arc<dyn KvStore> = Arc::new(RedbKv::open(&path).unwrap());
        let store = ChunkStore::open(kv).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.put(region(0, 0, 3)).unwrap(), "still a duplicate after restart");
        assert_eq!(store.get(&region(0, 0, 0).footprint).unwrap().items.len(), 3);
    }

    #[test]
    fn unreadable_records_are_skipped_on_open() {
        let kv = Arc::new(MemoryKv::new());
        kv.put("bucket:9:9:16", b"not json").unwrap();
        kv.put("tx:unrelated", b"{}").unwrap();
        let good = region(0, 0, 1);
        kv.put(good.key().as_str(), &serde_json::to_vec(&good).unwrap()).unwrap();

        let store = ChunkStore::open(kv).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.has(&good.footprint));
    }

    #[test]
    fn redb_iterate_respects_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let kv = RedbKv::open(dir.path().join("kv.redb")).unwrap();
        kv.put("a:1", b"1").unwrap();
        kv.put("b:1", b"2").unwrap();
        kv.put("b:2", b"3").unwrap();
        kv.put("c:1", b"4").unwrap();
        let keys: Vec<String> = kv.iterate("b:").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b:1", "b:2"]);
        kv.remove("b:1").unwrap();
        assert!(kv.get("b:1").unwrap().is_none());
        assert_eq!(kv.get("b:2").unwrap().as_deref(), Some(&b"3"[..]));
    }

    // -----------------------------------------------------------------------
    // Import / export
    // -----------------------------------------------------------------------

    #[test]
    fn export_then_import_into_fresh_store() {
        let source = ChunkStore::in_memory();
        source.put(region(0, 0, 1)).unwrap();
        source.put(region(-16, 0, 2)).unwrap();
        let json = source.export_json().unwrap();

        let target = ChunkStore::in_memory();
        target.put(region(0, 0, 1)).unwrap();
        assert_eq!(target.import_json(&json).unwrap(), 1);
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn import_rejects_malformed_map() {
        let store = ChunkStore::in_memory();
        assert!(store.import_json("{not a map").is_err());
        assert!(store.is_empty());
    }
}
