//! Chunk store: durable, deduplicating cache of explored regions.
//!
//! Records live in a [`KvStore`] under their [`BucketKey`]; an in-memory
//! index split into shards answers `has` without touching the backend, and
//! writes only contend with other writes to the same shard.

use crate::error::{EngineError, Result};
use crate::kv::{KvStore, MemoryKv};
use crate::types::{BucketKey, ExploredRegion, Footprint};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

const SHARDS: usize = 16;
const READ_ATTEMPTS: u32 = 4;
const READ_BACKOFF: Duration = Duration::from_millis(25);

type Shard = RwLock<HashMap<BucketKey, Arc<ExploredRegion>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub regions: usize,
    pub items: usize,
}

pub struct ChunkStore {
    kv: Arc<dyn KvStore>,
    shards: Vec<Shard>,
}

impl ChunkStore {
    /// Open a store over `kv`, indexing every record already persisted.
    pub fn open(kv: Arc<dyn KvStore>) -> Result<Self> {
        let store = Self {
            kv,
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        };

        let entries = with_read_retry(|| store.kv.iterate(BucketKey::PREFIX))?;
        let mut loaded = 0usize;
        for (key, bytes) in entries {
            match serde_json::from_slice::<ExploredRegion>(&bytes) {
                Ok(region) => {
                    let key = region.key();
                    store.shard(&key).write().insert(key, Arc::new(region));
                    loaded += 1;
                }
                Err(e) => warn!("Skipping unreadable record {}: {}", key, e),
            }
        }
        debug!("Chunk store opened with {} regions", loaded);
        Ok(store)
    }

    /// A store backed by a fresh [`MemoryKv`].
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(MemoryKv::new()),
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &BucketKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub fn has(&self, footprint: &Footprint) -> bool {
        let key = footprint.bucket_key();
        self.shard(&key).read().contains_key(&key)
    }

    pub fn get(&self, footprint: &Footprint) -> Option<Arc<ExploredRegion>> {
        let key = footprint.bucket_key();
        self.shard(&key).read().get(&key).cloned()
    }

    /// Persist `region`. Returns `false` (and writes nothing) when its
    /// footprint is already stored.
    pub fn put(&self, region: ExploredRegion) -> Result<bool> {
        let key = region.key();
        let mut shard = self.shard(&key).write();
        match shard.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                let bytes = serde_json::to_vec(&region)?;
                self.kv.put(v.key().as_str(), &bytes)?;
                v.insert(Arc::new(region));
                Ok(true)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats { regions: 0, items: 0 };
        for shard in &self.shards {
            let shard = shard.read();
            stats.regions += shard.len();
            stats.items += shard.values().map(|r| r.items.len()).sum::<usize>();
        }
        stats
    }

    /// Snapshot of every record, ordered by bucket key. Call again to
    /// restart from the beginning.
    pub fn iter(&self) -> impl Iterator<Item = Arc<ExploredRegion>> {
        let mut all: Vec<(BucketKey, Arc<ExploredRegion>)> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().map(|(_, region)| region)
    }

    // -----------------------------------------------------------------------
    // Map import / export
    // -----------------------------------------------------------------------

    /// Every record as a JSON array.
    pub fn export_json(&self) -> Result<String> {
        let regions: Vec<ExploredRegion> = self.iter().map(|r| (*r).clone()).collect();
        Ok(serde_json::to_string(&regions)?)
    }

    /// Load a JSON array produced by [`ChunkStore::export_json`]. Returns the
    /// number of regions that were new.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let regions: Vec<ExploredRegion> = serde_json::from_str(json)?;
        let mut added = 0;
        for region in regions {
            if self.put(region)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("regions", &self.len())
            .finish_non_exhaustive()
    }
}

fn with_read_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = READ_BACKOFF;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(EngineError::StoreIo(msg)) if attempt < READ_ATTEMPTS => {
                warn!("Store read failed (attempt {}): {}", attempt, msg);
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
