//! ExplorerNode – the worker end of the sync protocol.
//!
//! A node wraps a [`MinerManager`] and its chunk store. It applies the
//! host's configuration to the miner, forwards every newly explored region
//! and the hash rate upstream, and answers `sync-request` with the whole
//! store in `sync-batch` messages.
//!
//! `set-pattern` and `set-radius` changes it applies are published as
//! [`HostOverride`]s so the process can keep them across restarts.
//!
//! The node does not own the miner thread; whoever built the miner decides
//! how it runs ([`MinerManager::spawn`] or by hand).

use crate::bus::{Publisher, Subscription};
use crate::config::HostOverride;
use crate::error::Result;
use crate::miner::{MinerEvent, MinerManager, MinerState};
use crate::pattern::SpiralPattern;
use crate::protocol::{HostMessage, WorkerMessage};
use crate::transport::Link;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// How often the hash rate is reported to the host.
pub const HASH_RATE_INTERVAL: Duration = Duration::from_secs(1);

pub struct ExplorerNode {
    miner: Arc<MinerManager>,
    /// When false, `set-radius` from the host is ignored.
    radius_updates: bool,
    overrides: Publisher<HostOverride>,
}

impl ExplorerNode {
    pub fn new(miner: Arc<MinerManager>, radius_updates: bool) -> Self {
        Self {
            miner,
            radius_updates,
            overrides: Publisher::new(),
        }
    }

    pub fn miner(&self) -> &Arc<MinerManager> {
        &self.miner
    }

    /// Host-driven center and radius changes, in the order applied.
    pub fn subscribe(&self) -> Subscription<HostOverride> {
        self.overrides.subscribe()
    }

    /// Service one host connection until it closes. Returns
    /// `TransportDisconnected` if the host vanished while a message was on
    /// its way out; `Ok` when the host closed the link cleanly.
    pub async fn serve(&self, mut link: Link) -> Result<()> {
        info!("Serving host {}", link.peer());
        let mut discoveries = self.miner.subscribe();
        let mut ticker = tokio::time::interval(HASH_RATE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                incoming = link.recv::<HostMessage>() => match incoming {
                    None => {
                        info!("Host {} closed the link", link.peer());
                        return Ok(());
                    }
                    Some(Err(e)) => warn!("Dropping message from {}: {}", link.peer(), e),
                    Some(Ok(msg)) => self.handle(msg, &link).await?,
                },
                event = discoveries.recv() => match event {
                    Some(MinerEvent::Discovered { region, .. }) => {
                        link.send(&WorkerMessage::Discovered { region: (*region).clone() }).await?;
                    }
                    Some(MinerEvent::Error(reason)) => warn!("Miner paused: {}", reason),
                    Some(MinerEvent::StateChanged(_)) => {}
                    None => return Ok(()),
                },
                _ = ticker.tick() => {
                    let rate = self.miner.hash_rate();
                    if rate > 0.0 {
                        link.send(&WorkerMessage::HashRate { rate }).await?;
                    }
                }
            }
        }
    }

    /// Apply one host message. Replies, if any, go out on `link`.
    pub async fn handle(&self, msg: HostMessage, link: &Link) -> Result<()> {
        match msg {
            HostMessage::Configure {
                center,
                chunk_size,
                radius,
            } => {
                info!(
                    "Configured by host: center {} chunk {} radius {}",
                    center,
                    chunk_size.side(),
                    radius
                );
                self.miner
                    .set_pattern(Box::new(SpiralPattern::new(center, chunk_size)));
                self.miner.set_radius(radius);
                if self.miner.state() == MinerState::Idle {
                    self.miner.start();
                }
            }
            HostMessage::SetPattern { center } => {
                let size = self.miner.status().chunk_size;
                self.miner
                    .set_pattern(Box::new(SpiralPattern::new(center, size)));
                self.overrides.publish(HostOverride::InitCoords(center));
            }
            HostMessage::SetRadius { radius } => {
                if self.radius_updates {
                    self.miner.set_radius(radius);
                    self.overrides.publish(HostOverride::WorldRadius(radius));
                } else {
                    debug!("Ignoring set-radius {} (radius updates disabled)", radius);
                }
            }
            HostMessage::SyncRequest => {
                let regions = self.miner.store().iter().map(|r| (*r).clone());
                let batches = WorkerMessage::sync_batches(regions);
                debug!("Answering sync request with {} batches", batches.len());
                for batch in &batches {
                    link.send(batch).await?;
                }
            }
        }
        Ok(())
    }
}
