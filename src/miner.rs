//! MinerManager – drives the oracle over a traversal pattern, one footprint
//! at a time, writing every explored region to the chunk store.
//!
//! ## State machine
//!
//! ```text
//!          start()            pause()
//!   Idle ──────────▶ Exploring ──────▶ Paused
//!    ▲                  │  ▲   resume()  │
//!    │ stop()/exhausted │  └─────────────┘
//!    └──────────────────┘◀──── stop() ───┘
//! ```
//!
//! Pause and stop take effect between footprints: the footprint being
//! evaluated always completes, no new one is started.
//!
//! Point evaluation inside a footprint runs on a rayon pool; the only
//! shared write is the final [`ChunkStore::put`].

use crate::bus::{Publisher, Subscription};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::oracle::SpatialOracle;
use crate::pattern::TraversalPattern;
use crate::store::ChunkStore;
use crate::types::{ChunkSize, Coordinate, DiscoveredItem, ExploredRegion, Footprint};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Weight of the newest sample in the smoothed hash rate.
const RATE_ALPHA: f64 = 0.3;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinerState {
    Idle,
    Exploring,
    Paused,
}

#[derive(Debug, Clone)]
pub enum MinerEvent {
    /// A footprint was explored and newly stored.
    Discovered {
        region: Arc<ExploredRegion>,
        elapsed: Duration,
    },
    StateChanged(MinerState),
    /// Exploration paused because of `reason`.
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerStatus {
    pub state: MinerState,
    pub center: Coordinate,
    pub chunk_size: ChunkSize,
    pub radius: u64,
    pub consumed: u64,
    pub queued: usize,
    pub explored: u64,
    pub discarded: u64,
    pub hash_rate: f64,
    pub last_footprint: Option<Footprint>,
}

#[derive(Debug, Clone, Copy)]
pub struct MinerSettings {
    pub world_radius: u64,
    pub cores: usize,
    pub queue_depth: usize,
}

impl From<&EngineConfig> for MinerSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            world_radius: cfg.world_radius,
            cores: cfg.explore_cores,
            queue_depth: cfg.queue_depth,
        }
    }
}

// ---------------------------------------------------------------------------
// MinerManager
// ---------------------------------------------------------------------------

struct Queue {
    pattern: Box<dyn TraversalPattern>,
    /// Footprints with their position in the pattern.
    pending: VecDeque<(u64, Footprint)>,
    radius: u64,
    /// Earliest pattern position passed over because it lay outside the
    /// disc. A larger radius rewinds the pattern to it.
    rewind_to: Option<u64>,
    depth: usize,
    /// Bumped whenever the pattern is replaced; results of older
    /// generations are abandoned.
    generation: u64,
    explored: u64,
    discarded: u64,
    last_footprint: Option<Footprint>,
}

struct Control {
    state: MinerState,
    /// Went idle because the pattern left the disc.
    exhausted: bool,
    shutdown: bool,
}

pub struct MinerManager {
    oracle: Arc<dyn SpatialOracle>,
    store: Arc<ChunkStore>,
    queue: Mutex<Queue>,
    control: Mutex<Control>,
    wake: Condvar,
    pool: RwLock<Arc<ThreadPool>>,
    hash_rate: Mutex<f64>,
    events: Publisher<MinerEvent>,
}

impl MinerManager {
    pub fn new(
        oracle: Arc<dyn SpatialOracle>,
        store: Arc<ChunkStore>,
        pattern: Box<dyn TraversalPattern>,
        settings: MinerSettings,
    ) -> Result<Self> {
        Ok(Self {
            oracle,
            store,
            queue: Mutex::new(Queue {
                pattern,
                pending: VecDeque::new(),
                radius: settings.world_radius,
                rewind_to: None,
                depth: settings.queue_depth.max(1),
                generation: 0,
                explored: 0,
                discarded: 0,
                last_footprint: None,
            }),
            control: Mutex::new(Control {
                state: MinerState::Idle,
                exhausted: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
            pool: RwLock::new(Arc::new(build_pool(settings.cores)?)),
            hash_rate: Mutex::new(0.0),
            events: Publisher::new(),
        })
    }

    pub fn subscribe(&self) -> Subscription<MinerEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    pub fn state(&self) -> MinerState {
        self.control.lock().state
    }

    fn set_state(&self, next: MinerState) {
        self.transition(next, false);
    }

    fn transition(&self, next: MinerState, exhausted: bool) {
        let changed = {
            let mut ctl = self.control.lock();
            let changed = ctl.state != next;
            ctl.state = next;
            ctl.exhausted = exhausted;
            changed
        };
        if changed {
            debug!("Miner state -> {:?}", next);
            self.wake.notify_all();
            self.events.publish(MinerEvent::StateChanged(next));
        }
    }

    pub fn start(&self) {
        self.prefetch();
        self.set_state(MinerState::Exploring);
    }

    pub fn pause(&self) {
        if self.state() == MinerState::Exploring {
            self.set_state(MinerState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.state() == MinerState::Paused {
            self.set_state(MinerState::Exploring);
        }
    }

    pub fn stop(&self) {
        self.set_state(MinerState::Idle);
    }

    // -----------------------------------------------------------------------
    // Reconfiguration
    // -----------------------------------------------------------------------

    /// Replace the pattern. Queued footprints are dropped and a footprint
    /// being evaluated right now is abandoned. A miner that went idle at
    /// the edge of the disc picks up the new pattern.
    pub fn set_pattern(&self, pattern: Box<dyn TraversalPattern>) {
        {
            let mut q = self.queue.lock();
            info!(
                "Mining pattern -> center {} size {}",
                pattern.center(),
                pattern.chunk_size().side()
            );
            q.discarded += q.pending.len() as u64;
            q.pending.clear();
            q.pattern = pattern;
            q.rewind_to = None;
            q.generation += 1;
        }
        self.wake_exhausted();
    }

    /// Change the world radius. Queued footprints no longer intersecting
    /// the disc are dropped unexplored. A larger radius rewinds the pattern
    /// to the first footprint passed over so far, and wakes a miner that
    /// went idle at the edge of the old disc.
    pub fn set_radius(&self, radius: u64) {
        let grew = {
            let mut q = self.queue.lock();
            if q.radius == radius {
                return;
            }
            let grew = radius > q.radius;
            q.radius = radius;
            if grew {
                if let Some(pos) = q.rewind_to.take() {
                    q.pending.retain(|(i, _)| *i < pos);
                    q.pattern.rewind(pos);
                    info!("World radius -> {} (pattern rewound to {})", radius, pos);
                } else {
                    info!("World radius -> {}", radius);
                }
            } else {
                let mut dropped = 0u64;
                let mut first = None;
                q.pending.retain(|&(i, fp)| {
                    let keep = fp.intersects_disc(radius);
                    if !keep {
                        dropped += 1;
                        first.get_or_insert(i);
                    }
                    keep
                });
                q.discarded += dropped;
                if let Some(i) = first {
                    q.rewind_to = Some(q.rewind_to.map_or(i, |r| r.min(i)));
                }
                info!("World radius -> {} ({} queued footprints discarded)", radius, dropped);
            }
            grew
        };

        if grew {
            self.wake_exhausted();
        }
    }

    fn wake_exhausted(&self) {
        let wake = {
            let ctl = self.control.lock();
            ctl.exhausted && ctl.state == MinerState::Idle
        };
        if wake {
            info!("New work inside the disc, resuming exploration");
            self.set_state(MinerState::Exploring);
        }
    }

    pub fn set_cores(&self, cores: usize) -> Result<()> {
        let pool = build_pool(cores)?;
        *self.pool.write() = Arc::new(pool);
        info!("Miner cores -> {}", cores.max(1));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn hash_rate(&self) -> f64 {
        *self.hash_rate.lock()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn discarded(&self) -> u64 {
        self.queue.lock().discarded
    }

    pub fn explored(&self) -> u64 {
        self.queue.lock().explored
    }

    pub fn status(&self) -> MinerStatus {
        let state = self.state();
        let hash_rate = self.hash_rate();
        let q = self.queue.lock();
        MinerStatus {
            state,
            center: q.pattern.center(),
            chunk_size: q.pattern.chunk_size(),
            radius: q.radius,
            consumed: q.pattern.consumed(),
            queued: q.pending.len(),
            explored: q.explored,
            discarded: q.discarded,
            hash_rate,
            last_footprint: q.last_footprint,
        }
    }

    // -----------------------------------------------------------------------
    // Work
    // -----------------------------------------------------------------------

    /// Pull footprints from the pattern until the queue holds `depth`
    /// footprints inside the world disc or the pattern has left the disc.
    pub fn prefetch(&self) {
        let mut q = self.queue.lock();
        Self::refill(&mut q);
    }

    fn refill(q: &mut Queue) {
        while q.pending.len() < q.depth {
            if q.pattern.exhausted_within(q.radius) {
                break;
            }
            let pos = q.pattern.consumed();
            let fp = q.pattern.next_footprint();
            if fp.intersects_disc(q.radius) {
                q.pending.push_back((pos, fp));
            } else {
                q.rewind_to.get_or_insert(pos);
            }
        }
    }

    /// Explore the next eligible footprint. Footprints already in the store
    /// are skipped. Returns `Ok(None)` once the pattern has nothing left
    /// inside the world disc.
    pub fn explore_next(&self) -> Result<Option<Arc<ExploredRegion>>> {
        loop {
            let (fp, generation) = {
                let mut q = self.queue.lock();
                if q.pending.is_empty() {
                    Self::refill(&mut q);
                }
                match q.pending.pop_front() {
                    Some((_, fp)) => (fp, q.generation),
                    None => return Ok(None),
                }
            };

            if self.store.has(&fp) {
                debug!("Footprint {} already explored, skipping", fp);
                continue;
            }

            let started = Instant::now();
            let region = self.evaluate(fp)?;
            let elapsed = started.elapsed();

            if self.queue.lock().generation != generation {
                debug!("Pattern replaced while exploring {}, abandoning", fp);
                continue;
            }

            let region = Arc::new(region);
            if let Err(e) = self.store.put((*region).clone()) {
                warn!("Chunk store write failed, pausing exploration: {}", e);
                self.pause();
                self.events.publish(MinerEvent::Error(e.to_string()));
                return Err(e);
            }

            self.record_rate(fp.area(), elapsed);
            {
                let mut q = self.queue.lock();
                q.explored += 1;
                q.last_footprint = Some(fp);
            }
            debug!(
                "Explored {} in {:?}: {} items",
                fp,
                elapsed,
                region.items.len()
            );
            self.events.publish(MinerEvent::Discovered {
                region: region.clone(),
                elapsed,
            });
            return Ok(Some(region));
        }
    }

    /// Evaluate the oracle at every point of `fp`, rows in parallel.
    pub fn evaluate(&self, fp: Footprint) -> Result<ExploredRegion> {
        let pool = self.pool.read().clone();
        let oracle = &self.oracle;
        let side = fp.side_len();

        let rows: Vec<(Vec<DiscoveredItem>, f64)> = pool.install(|| {
            (0..side)
                .into_par_iter()
                .map(|dy| -> Result<(Vec<DiscoveredItem>, f64)> {
                    let mut items = Vec::new();
                    let mut terrain_sum = 0.0;
                    for dx in 0..side {
                        let c = Coordinate::new(fp.origin.x + dx, fp.origin.y + dy);
                        let (id, terrain) = oracle.identify(c)?;
                        terrain_sum += terrain;
                        if oracle.is_discoverable(&id, terrain) {
                            items.push(DiscoveredItem {
                                coords: c,
                                id,
                                terrain,
                            });
                        }
                    }
                    Ok((items, terrain_sum))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut items = Vec::new();
        let mut terrain_sum = 0.0;
        for (row_items, row_sum) in rows {
            items.extend(row_items);
            terrain_sum += row_sum;
        }

        Ok(ExploredRegion {
            footprint: fp,
            items,
            mean_terrain: terrain_sum / fp.area() as f64,
            discovered_at: now_millis(),
        })
    }

    fn record_rate(&self, points: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(1e-6);
        let sample = points as f64 / secs;
        let mut rate = self.hash_rate.lock();
        *rate = if *rate == 0.0 {
            sample
        } else {
            RATE_ALPHA * sample + (1.0 - RATE_ALPHA) * *rate
        };
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    /// Explore until paused, stopped or out of work. Blocks the caller.
    pub fn run(&self) -> Result<()> {
        while self.state() == MinerState::Exploring {
            if self.explore_next()?.is_some() {
                continue;
            }
            // Decided under the queue lock so a concurrent larger radius
            // either refills the queue first or finds the miner exhausted.
            let q = self.queue.lock();
            if q.pending.is_empty() && q.pattern.exhausted_within(q.radius) {
                info!("Pattern left the world disc, miner going idle");
                self.transition(MinerState::Idle, true);
            }
        }
        Ok(())
    }

    /// Run the miner on a dedicated thread that sleeps while paused or
    /// idle. The thread exits when the returned handle is shut down.
    pub fn spawn(self: &Arc<Self>) -> Result<MinerHandle> {
        let miner = self.clone();
        let thread = thread::Builder::new()
            .name("sophon-miner".into())
            .spawn(move || miner.drive())
            .map_err(|e| EngineError::Config(format!("failed to spawn miner thread: {e}")))?;
        Ok(MinerHandle {
            miner: self.clone(),
            thread: Some(thread),
        })
    }

    fn drive(&self) {
        loop {
            {
                let mut ctl = self.control.lock();
                while ctl.state != MinerState::Exploring && !ctl.shutdown {
                    self.wake.wait(&mut ctl);
                }
                if ctl.shutdown {
                    break;
                }
            }
            if let Err(e) = self.run() {
                warn!("Miner stopped on error: {}", e);
            }
        }
        debug!("Miner thread exiting");
    }

    fn shutdown(&self) {
        self.control.lock().shutdown = true;
        self.set_state(MinerState::Idle);
        self.wake.notify_all();
    }
}

/// Owner of the miner thread. Dropping it stops the thread.
pub struct MinerHandle {
    miner: Arc<MinerManager>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MinerHandle {
    pub fn miner(&self) -> &Arc<MinerManager> {
        &self.miner
    }

    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.miner.shutdown();
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("Miner thread panicked");
            }
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        self.join();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_pool(cores: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(cores.max(1))
        .thread_name(|i| format!("sophon-hash-{i}"))
        .build()
        .map_err(|e| EngineError::Config(format!("failed to build hash pool: {e}")))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
