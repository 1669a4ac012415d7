//! Explorer sync wire protocol.
//!
//! This module owns **every message that crosses the worker boundary**
//! between a host (the game client aggregating discoveries) and one or more
//! hashing workers, possibly on other machines.
//!
//! ## Directions
//!
//! | Message        | Direction      | Purpose                                   |
//! |----------------|----------------|-------------------------------------------|
//! | `configure`    | host → worker  | pattern center, chunk size, world radius  |
//! | `set-pattern`  | host → worker  | move the spiral center                    |
//! | `set-radius`   | host → worker  | world radius changed                      |
//! | `sync-request` | host → worker  | send everything explored so far           |
//! | `discovered`   | worker → host  | one newly explored region                 |
//! | `hash-rate`    | worker → host  | smoothed points/second                    |
//! | `sync-batch`   | worker → host  | up to [`SYNC_BATCH_LIMIT`] known regions  |
//!
//! ## Design rules
//!
//! 1. Messages are JSON objects tagged by name (`"type"`), never positional.
//! 2. Regions travel whole; receivers dedup by footprint so replays are safe.
//! 3. Framing is the transport's business; one message per frame.

use crate::types::{ChunkSize, Coordinate, ExploredRegion};
use serde::{Deserialize, Serialize};

/// Maximum number of regions carried by one `sync-batch`.
pub const SYNC_BATCH_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Host → worker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    Configure {
        center: Coordinate,
        chunk_size: ChunkSize,
        radius: u64,
    },
    SetPattern {
        center: Coordinate,
    },
    SetRadius {
        radius: u64,
    },
    SyncRequest,
}

// ---------------------------------------------------------------------------
// Worker → host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Discovered { region: ExploredRegion },
    HashRate { rate: f64 },
    SyncBatch { regions: Vec<ExploredRegion> },
}

impl WorkerMessage {
    /// Split `regions` into `sync-batch` messages of at most
    /// [`SYNC_BATCH_LIMIT`] regions each. The final partial batch is kept.
    pub fn sync_batches(regions: impl IntoIterator<Item = ExploredRegion>) -> Vec<WorkerMessage> {
        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(SYNC_BATCH_LIMIT);
        for region in regions {
            current.push(region);
            if current.len() == SYNC_BATCH_LIMIT {
                batches.push(WorkerMessage::SyncBatch {
                    regions: std::mem::take(&mut current),
                });
            }
        }
        if !current.is_empty() {
            batches.push(WorkerMessage::SyncBatch { regions: current });
        }
        batches
    }
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(msg)
}

pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}
