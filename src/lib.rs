//! Sophon
//!
//! Deterministic universe exploration plus optimistic action reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ExplorerHub  (hub.rs)        ← aggregates workers over Links (transport.rs)
//!   └── ExplorerNode  (node.rs)   ← worker end of the sync protocol (protocol.rs)
//!         └── MinerManager  (miner.rs)  ← queue, rayon pool, hash rate
//!               ├── SpiralPattern  (pattern.rs)
//!               ├── HashOracle     (oracle.rs)
//!               └── ChunkStore     (store.rs) over KvStore (kv.rs)
//!
//! ActionPipeline / Ledger  (ledger.rs)  ← initiate → prove → submit → resolve
//!   └── WorldModel  (world.rs)          ← authoritative state + pending deltas
//! ```
//!
//! Fan-out between components goes through typed [`bus::Publisher`]s.

// Always available: lattice types, oracle, patterns, wire protocol, config.
pub mod config;
pub mod error;
pub mod oracle;
pub mod pattern;
pub mod protocol;
pub mod types;

// Engine modules require the `server` feature.
#[cfg(feature = "server")]
pub mod bus;
#[cfg(feature = "server")]
pub mod hub;
#[cfg(feature = "server")]
pub mod kv;
#[cfg(feature = "server")]
pub mod ledger;
#[cfg(feature = "server")]
pub mod miner;
#[cfg(feature = "server")]
pub mod node;
#[cfg(feature = "server")]
pub mod store;
#[cfg(feature = "server")]
pub mod transport;
#[cfg(feature = "server")]
pub mod world;

// Convenience re-exports
pub use config::{EngineConfig, HostOverride, ReconcileConfig};
pub use error::{EngineError, Result};
pub use oracle::{HashOracle, SpatialOracle};
pub use pattern::{SpiralPattern, TraversalPattern};
pub use protocol::{HostMessage, WorkerMessage, SYNC_BATCH_LIMIT};
pub use types::{
    BucketKey, ChunkSize, Coordinate, DiscoveredItem, ExploredRegion, Footprint, LocationId,
    SpaceType,
};

#[cfg(feature = "server")]
pub use hub::{ExplorerHub, HubEvent, HubSettings, WorkerInfo};
#[cfg(feature = "server")]
pub use kv::{KvStore, MemoryKv, RedbKv};
#[cfg(feature = "server")]
pub use ledger::{
    ActionEvent, ActionKind, ActionPipeline, ActionState, Ledger, LedgerEvent, LocalActionId,
    Outcome, PendingAction, Proof, ProofProvider, RemoteHandle, RemoteLedger,
};
#[cfg(feature = "server")]
pub use miner::{MinerEvent, MinerHandle, MinerManager, MinerSettings, MinerState, MinerStatus};
#[cfg(feature = "server")]
pub use node::ExplorerNode;
#[cfg(feature = "server")]
pub use store::{ChunkStore, StoreStats};
#[cfg(feature = "server")]
pub use transport::Link;
#[cfg(feature = "server")]
pub use world::{EntityUpdate, Planet, Player, Voyage, WorldModel, WorldView};
