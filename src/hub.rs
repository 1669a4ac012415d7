//! ExplorerHub – the host end of the sync protocol.
//!
//! ## Threading model
//!
//! ```text
//! caller                     │  one task per worker
//! ───────────────────────── │ ─────────────────────────────────────
//! hub.set_radius(r)          │
//!   → cmd_tx.send(msg) ──────┼─▶ cmd_rx.recv() → link.send(msg)
//!                            │
//! hub.store().len()    ◀─────┼── link.recv()   → store.put(region)
//! ```
//!
//! Commands reach workers through unbounded queues, so the hub never waits
//! on a slow or dead worker. Every region any worker reports lands in one
//! [`ChunkStore`]; duplicates are dropped by bucket key.

use crate::bus::{Publisher, Subscription};
use crate::protocol::{HostMessage, WorkerMessage};
use crate::store::ChunkStore;
use crate::transport::Link;
use crate::types::{ChunkSize, Coordinate, ExploredRegion, Footprint};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Exploration parameters every worker is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HubSettings {
    pub center: Coordinate,
    pub chunk_size: ChunkSize,
    pub radius: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub connected: bool,
    pub hash_rate: f64,
    pub last_footprint: Option<Footprint>,
    /// Regions received from this worker, duplicates included.
    pub regions_received: u64,
}

#[derive(Debug, Clone)]
pub enum HubEvent {
    Attached(String),
    Detached(String),
    /// A region no worker had reported before.
    Discovered {
        worker: String,
        region: Arc<ExploredRegion>,
    },
}

struct WorkerSlot {
    info: WorkerInfo,
    /// Bumped on every attach so a stale task cannot detach its successor.
    epoch: u64,
    cmd: mpsc::UnboundedSender<HostMessage>,
    task: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// ExplorerHub
// ---------------------------------------------------------------------------

pub struct ExplorerHub {
    store: Arc<ChunkStore>,
    settings: Mutex<HubSettings>,
    workers: RwLock<HashMap<String, WorkerSlot>>,
    events: Publisher<HubEvent>,
}

impl ExplorerHub {
    pub fn new(store: Arc<ChunkStore>, settings: HubSettings) -> Self {
        Self {
            store,
            settings: Mutex::new(settings),
            workers: RwLock::new(HashMap::new()),
            events: Publisher::new(),
        }
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn settings(&self) -> HubSettings {
        *self.settings.lock()
    }

    pub fn subscribe(&self) -> Subscription<HubEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Worker lifecycle
    // -----------------------------------------------------------------------

    /// Attach a worker. A new worker is configured and asked for its
    /// regions; a known id re-attaches in place (its previous task is
    /// dropped) and is only asked to sync.
    pub fn attach(self: &Arc<Self>, id: impl Into<String>, link: Link) {
        let id = id.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let mut workers = self.workers.write();

        let known = workers.get(&id).map(|slot| {
            slot.task.abort();
            (slot.epoch + 1, slot.info.clone())
        });
        let (epoch, mut info) = known.clone().unwrap_or_else(|| {
            (
                0,
                WorkerInfo {
                    id: id.clone(),
                    connected: true,
                    hash_rate: 0.0,
                    last_footprint: None,
                    regions_received: 0,
                },
            )
        });
        info.connected = true;

        if known.is_some() {
            info!("Worker {} re-attached, resyncing", id);
        } else {
            let s = *self.settings.lock();
            info!("Worker {} attached", id);
            let _ = cmd_tx.send(HostMessage::Configure {
                center: s.center,
                chunk_size: s.chunk_size,
                radius: s.radius,
            });
        }
        let _ = cmd_tx.send(HostMessage::SyncRequest);

        let task = tokio::spawn(self.clone().service(id.clone(), epoch, link, cmd_rx));
        workers.insert(
            id.clone(),
            WorkerSlot {
                info,
                epoch,
                cmd: cmd_tx,
                task,
            },
        );
        drop(workers);
        self.events.publish(HubEvent::Attached(id));
    }

    /// Drop a worker's connection. Its record stays, marked disconnected.
    pub fn detach(&self, id: &str) {
        let found = {
            let mut workers = self.workers.write();
            match workers.get_mut(id) {
                Some(slot) if slot.info.connected => {
                    slot.task.abort();
                    slot.info.connected = false;
                    slot.info.hash_rate = 0.0;
                    true
                }
                _ => false,
            }
        };
        if found {
            info!("Worker {} detached", id);
            self.events.publish(HubEvent::Detached(id.to_string()));
        }
    }

    /// Drop every worker connection.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.workers.read().keys().cloned().collect();
        for id in ids {
            self.detach(&id);
        }
    }

    async fn service(
        self: Arc<Self>,
        id: String,
        epoch: u64,
        mut link: Link,
        mut cmd_rx: mpsc::UnboundedReceiver<HostMessage>,
    ) {
        loop {
            tokio::select! {
                incoming = link.recv::<WorkerMessage>() => match incoming {
                    None => break,
                    Some(Err(e)) => warn!("Dropping message from worker {}: {}", id, e),
                    Some(Ok(msg)) => self.ingest(&id, msg),
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(msg) => {
                        if let Err(e) = link.send(&msg).await {
                            debug!("Worker {}: {}", id, e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        self.mark_disconnected(&id, epoch);
    }

    fn mark_disconnected(&self, id: &str, epoch: u64) {
        let changed = {
            let mut workers = self.workers.write();
            match workers.get_mut(id) {
                Some(slot) if slot.epoch == epoch && slot.info.connected => {
                    slot.info.connected = false;
                    slot.info.hash_rate = 0.0;
                    true
                }
                _ => false,
            }
        };
        if changed {
            warn!("Worker {} disconnected", id);
            self.events.publish(HubEvent::Detached(id.to_string()));
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Merge one worker message into the hub.
    pub fn ingest(&self, worker: &str, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Discovered { region } => self.accept(worker, region),
            WorkerMessage::SyncBatch { regions } => {
                debug!("Sync batch of {} regions from {}", regions.len(), worker);
                for region in regions {
                    self.accept(worker, region);
                }
            }
            WorkerMessage::HashRate { rate } => {
                if let Some(slot) = self.workers.write().get_mut(worker) {
                    slot.info.hash_rate = rate;
                }
            }
        }
    }

    fn accept(&self, worker: &str, region: ExploredRegion) {
        let footprint = region.footprint;
        let region = Arc::new(region);
        let is_new = match self.store.put((*region).clone()) {
            Ok(new) => new,
            Err(e) => {
                warn!("Could not store region {} from {}: {}", footprint, worker, e);
                false
            }
        };
        if let Some(slot) = self.workers.write().get_mut(worker) {
            slot.info.regions_received += 1;
            slot.info.last_footprint = Some(footprint);
        }
        if is_new {
            self.events.publish(HubEvent::Discovered {
                worker: worker.to_string(),
                region,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Queue `msg` for every connected worker. Returns how many were reached.
    pub fn broadcast(&self, msg: HostMessage) -> usize {
        self.workers
            .read()
            .values()
            .filter(|slot| slot.info.connected)
            .filter(|slot| slot.cmd.send(msg.clone()).is_ok())
            .count()
    }

    pub fn set_radius(&self, radius: u64) -> usize {
        self.settings.lock().radius = radius;
        self.broadcast(HostMessage::SetRadius { radius })
    }

    pub fn set_pattern(&self, center: Coordinate) -> usize {
        self.settings.lock().center = center;
        self.broadcast(HostMessage::SetPattern { center })
    }

    pub fn request_sync(&self, id: &str) -> bool {
        self.workers
            .read()
            .get(id)
            .is_some_and(|slot| slot.info.connected && slot.cmd.send(HostMessage::SyncRequest).is_ok())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn worker(&self, id: &str) -> Option<WorkerInfo> {
        self.workers.read().get(id).map(|slot| slot.info.clone())
    }

    /// Every worker ever attached, sorted by id.
    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut all: Vec<_> = self.workers.read().values().map(|s| s.info.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Sum of the connected workers' hash rates.
    pub fn total_hash_rate(&self) -> f64 {
        self.workers
            .read()
            .values()
            .filter(|s| s.info.connected)
            .map(|s| s.info.hash_rate)
            .sum()
    }
}
