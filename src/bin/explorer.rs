//! sophon-explorer binary
//!
//! Runs one exploration worker: hashes the universe around a center,
//! keeps the results in a local chunk store, and serves the sync protocol
//! to any host that connects over TCP.
//!
//! ## Configuration (TOML / env via `config`, flags via `clap`)
//!
//! | Key                      | Default  | Description                          |
//! |--------------------------|----------|--------------------------------------|
//! | `SOPHON_SEED`            | `0`      | Oracle seed                          |
//! | `SOPHON_CHUNK_SIZE`      | `256`    | Footprint side (16..256)             |
//! | `SOPHON_PLANET_RARITY`   | `16384`  | One in N points hosts a planet       |
//! | `SOPHON_WORLD_RADIUS`    | `40500`  | Radius of the explorable disc        |
//! | `SOPHON_EXPLORE_CORES`   | CPUs / 2 | Hashing threads                      |
//! | `SOPHON_STORE_PATH`      | unset    | redb file (in-memory when unset)     |
//! | `SOPHON_STATE_PATH`      | unset    | JSON file keeping host changes       |
//! | `SOPHON_PORT`            | unset    | Serve hosts on this TCP port         |
//! | `SOPHON_PRELOAD_MAP`     | unset    | JSON map imported before exploring   |
//! | `SOPHON_DUMP_MAP`        | unset    | JSON map written on shutdown         |

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use sophon::{
    ChunkSize, ChunkStore, Coordinate, EngineConfig, ExplorerNode, HashOracle, KvStore, Link,
    MemoryKv, MinerEvent, MinerManager, MinerSettings, RedbKv, SpiralPattern,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Interval of the hash rate log line.
const RATE_LOG_INTERVAL: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "sophon-explorer", about = "Sophon universe explorer", version)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "SOPHON_CONFIG")]
    config: Option<PathBuf>,

    /// Oracle seed
    #[arg(long)]
    seed: Option<u64>,

    /// Footprint side: 16, 32, 64, 128 or 256
    #[arg(long)]
    chunk_size: Option<u32>,

    /// One in N points hosts a planet
    #[arg(long)]
    planet_rarity: Option<u64>,

    /// Radius of the explorable disc
    #[arg(long)]
    world_radius: Option<u64>,

    /// Spiral center x
    #[arg(long, allow_hyphen_values = true)]
    x: Option<i64>,

    /// Spiral center y
    #[arg(long, allow_hyphen_values = true)]
    y: Option<i64>,

    /// Hashing threads
    #[arg(long)]
    cores: Option<usize>,

    /// redb file for the chunk store
    #[arg(long)]
    store: Option<PathBuf>,

    /// Start exploring immediately
    #[arg(long, env = "SOPHON_EXPLORE", default_value_t = true, action = clap::ArgAction::Set)]
    explore: bool,

    /// Serve hosts on this TCP port
    #[arg(long, env = "SOPHON_PORT")]
    port: Option<u16>,

    /// Import this JSON map before exploring
    #[arg(long, env = "SOPHON_PRELOAD_MAP")]
    preload: Option<PathBuf>,

    /// Write the whole map as JSON here on shutdown
    #[arg(long, env = "SOPHON_DUMP_MAP")]
    dump: Option<PathBuf>,
}

impl Args {
    /// Layer explicitly given flags over the loaded configuration.
    fn apply(&self, cfg: &mut EngineConfig) -> Result<()> {
        if let Some(seed) = self.seed {
            cfg.seed = seed;
        }
        if let Some(side) = self.chunk_size {
            cfg.chunk_size = ChunkSize::from_side(side)
                .ok_or_else(|| anyhow!("unsupported chunk size {side}"))?;
        }
        if let Some(r) = self.planet_rarity {
            cfg.planet_rarity = r;
        }
        if let Some(r) = self.world_radius {
            cfg.world_radius = r;
        }
        if self.x.is_some() || self.y.is_some() {
            cfg.init_coords = Coordinate::new(
                self.x.unwrap_or(cfg.init_coords.x),
                self.y.unwrap_or(cfg.init_coords.y),
            );
        }
        if let Some(n) = self.cores {
            cfg.explore_cores = n;
        }
        if let Some(p) = &self.store {
            cfg.store_path = Some(p.clone());
        }
        cfg.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sophon=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut cfg = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut cfg).context("Invalid command line")?;

    tracing::info!(
        seed = cfg.seed,
        chunk = cfg.chunk_size.side(),
        radius = cfg.world_radius,
        cores = cfg.explore_cores,
        "Starting sophon-explorer at {}",
        cfg.init_coords
    );

    // Chunk store
    let kv: Arc<dyn KvStore> = match &cfg.store_path {
        Some(path) => Arc::new(
            RedbKv::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Arc::new(MemoryKv::new()),
    };
    let store = Arc::new(ChunkStore::open(kv).context("Failed to load chunk store")?);

    if let Some(path) = &args.preload {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read map {}", path.display()))?;
        let added = store.import_json(&json).context("Failed to import map")?;
        log::info!("Preloaded {} regions from {}", added, path.display());
    }
    let stats = store.stats();
    log::info!("Chunk store holds {} regions, {} planets", stats.regions, stats.items);

    // Miner
    let oracle = Arc::new(HashOracle::from_config(&cfg));
    let pattern = SpiralPattern::new(cfg.init_coords, cfg.chunk_size);
    let miner = Arc::new(MinerManager::new(
        oracle,
        store.clone(),
        Box::new(pattern),
        MinerSettings::from(&cfg),
    )?);
    let handle = miner.spawn()?;

    let mut events = miner.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MinerEvent::Discovered { region, elapsed } => log::debug!(
                    "Explored {} in {:?}: {} planets",
                    region.footprint,
                    elapsed,
                    region.items.len()
                ),
                MinerEvent::Error(reason) => log::error!("Exploration paused: {}", reason),
                MinerEvent::StateChanged(state) => log::info!("Miner {:?}", state),
            }
        }
    });

    let rate_miner = miner.clone();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(RATE_LOG_INTERVAL);
        loop {
            timer.tick().await;
            let status = rate_miner.status();
            log::info!(
                "{:.0} points/s, {} explored, {} queued",
                status.hash_rate,
                status.explored,
                status.queued
            );
        }
    });

    if args.explore {
        miner.start();
    }

    // Sync protocol
    if let Some(port) = args.port {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to bind port {port}"))?;
        log::info!("Serving hosts on port {}", port);
        let node = Arc::new(ExplorerNode::new(miner.clone(), cfg.radius_updates));

        let mut overrides = node.subscribe();
        let state_path = cfg.state_path.clone();
        tokio::spawn(async move {
            while let Some(change) = overrides.recv().await {
                match &state_path {
                    Some(path) => match change.persist(path) {
                        Ok(()) => log::info!("Saved {:?} to {}", change, path.display()),
                        Err(e) => log::warn!("Failed to save {:?}: {}", change, e),
                    },
                    None => log::info!("{:?} applied for this session only (no state_path)", change),
                }
            }
        });
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let node = node.clone();
                        tokio::spawn(async move {
                            let link = Link::over_tcp(stream, addr.to_string());
                            if let Err(e) = node.serve(link).await {
                                log::warn!("Host {} dropped: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => log::warn!("Accept failed: {}", e),
                }
            }
        });
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    log::info!("sophon-explorer shutting down (SIGINT)");

    miner.stop();
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("Miner thread did not shut down")?;

    if let Some(path) = &args.dump {
        std::fs::write(path, store.export_json()?)
            .with_context(|| format!("Failed to write map {}", path.display()))?;
        log::info!("Map written to {}", path.display());
    }
    Ok(())
}
