//! Client-side world model: planets, voyages and the player.
//!
//! Authoritative values come from remote refreshes and confirmed ledger
//! events. Optimistic effects of pending actions are kept next to them as
//! deltas keyed by [`LocalActionId`] and folded in on every read, so
//! reversing one action never disturbs another action's effect on the same
//! planet.
//!
//! Everything sits behind one `RwLock`; staging, resolving and reading an
//! effect are each a single critical section.

use crate::error::Result;
use crate::ledger::LocalActionId;
use crate::types::{ExploredRegion, LocationId};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Number of upgrade branches per planet.
pub const UPGRADE_BRANCHES: usize = 3;

const DEFAULT_ENERGY_CAP: f64 = 100.0;
const DEFAULT_SILVER_CAP: f64 = 100.0;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Planet {
    pub id: LocationId,
    pub owner: Option<String>,
    pub energy: f64,
    pub energy_cap: f64,
    pub silver: f64,
    pub silver_cap: f64,
    pub upgrade_state: [u8; UPGRADE_BRANCHES],
    pub hat_level: u8,
}

impl Planet {
    /// A freshly discovered planet nobody has claimed.
    pub fn unclaimed(id: LocationId) -> Self {
        Self {
            id,
            owner: None,
            energy: 0.0,
            energy_cap: DEFAULT_ENERGY_CAP,
            silver: 0.0,
            silver_cap: DEFAULT_SILVER_CAP,
            upgrade_state: [0; UPGRADE_BRANCHES],
            hat_level: 0,
        }
    }

    /// Silver the planet can still take before hitting its cap.
    pub fn free_silver(&self) -> f64 {
        (self.silver_cap - self.silver).max(0.0)
    }

    fn with_delta(mut self, d: &PlanetDelta) -> Self {
        self.energy += d.energy;
        self.silver += d.silver;
        for (level, step) in self.upgrade_state.iter_mut().zip(d.upgrades) {
            *level = shift(*level, step);
        }
        self.hat_level = shift(self.hat_level, d.hat);
        self
    }
}

fn shift(level: u8, step: i16) -> u8 {
    (level as i16 + step).clamp(0, u8::MAX as i16) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voyage {
    pub id: String,
    pub from: LocationId,
    pub to: LocationId,
    pub energy: f64,
    pub silver: f64,
    /// Not yet confirmed by the remote ledger.
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub address: String,
    pub home: LocationId,
}

/// Authoritative entity state reported by the remote ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "kebab-case")]
pub enum EntityUpdate {
    Planet(Planet),
    Voyage(Voyage),
    VoyageArrived { id: String },
    Player(Player),
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Additive change to one planet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanetDelta {
    pub energy: f64,
    pub silver: f64,
    pub upgrades: [i16; UPGRADE_BRANCHES],
    pub hat: i16,
}

/// Optimistic effect of one pending action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub planets: BTreeMap<LocationId, PlanetDelta>,
    pub voyage: Option<Voyage>,
    pub player: Option<Player>,
}

impl Effect {
    pub fn planet(&mut self, id: LocationId) -> &mut PlanetDelta {
        self.planets.entry(id).or_default()
    }
}

// ---------------------------------------------------------------------------
// Read-only view
// ---------------------------------------------------------------------------

/// What UI code is allowed to see. Every value already includes pending
/// effects.
pub trait WorldView {
    fn planet(&self, id: &LocationId) -> Option<Planet>;
    fn voyages(&self) -> Vec<Voyage>;
    fn player(&self) -> Option<Player>;
    fn pending_effects(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct WorldState {
    planets: HashMap<LocationId, Planet>,
    voyages: BTreeMap<String, Voyage>,
    player: Option<Player>,
    pending: BTreeMap<LocalActionId, Effect>,
}

impl WorldView for WorldState {
    fn planet(&self, id: &LocationId) -> Option<Planet> {
        let base = self.planets.get(id)?.clone();
        Some(
            self.pending
                .values()
                .filter_map(|e| e.planets.get(id))
                .fold(base, |p, d| p.with_delta(d)),
        )
    }

    fn voyages(&self) -> Vec<Voyage> {
        self.voyages
            .values()
            .cloned()
            .chain(self.pending.values().filter_map(|e| e.voyage.clone()))
            .collect()
    }

    fn player(&self) -> Option<Player> {
        self.player
            .clone()
            .or_else(|| self.pending.values().find_map(|e| e.player.clone()))
    }

    fn pending_effects(&self) -> usize {
        self.pending.len()
    }
}

impl WorldState {
    fn apply_update(&mut self, update: EntityUpdate) {
        match update {
            EntityUpdate::Planet(p) => {
                self.planets.insert(p.id, p);
            }
            EntityUpdate::Voyage(mut v) => {
                v.provisional = false;
                self.voyages.insert(v.id.clone(), v);
            }
            EntityUpdate::VoyageArrived { id } => {
                self.voyages.remove(&id);
            }
            EntityUpdate::Player(p) => self.player = Some(p),
        }
    }
}

// ---------------------------------------------------------------------------
// WorldModel
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WorldModel {
    state: RwLock<WorldState>,
}

impl WorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every item of `region` as an unclaimed planet unless the
    /// planet is already known. Returns the number added.
    pub fn add_discovered(&self, region: &ExploredRegion) -> usize {
        let mut state = self.state.write();
        let mut added = 0;
        for item in &region.items {
            if !state.planets.contains_key(&item.id) {
                state.planets.insert(item.id, Planet::unclaimed(item.id));
                added += 1;
            }
        }
        if added > 0 {
            debug!("World model: {} planets added from {}", added, region.footprint);
        }
        added
    }

    /// Overwrite authoritative state (remote refresh).
    pub fn apply_updates(&self, updates: impl IntoIterator<Item = EntityUpdate>) {
        let mut state = self.state.write();
        for update in updates {
            state.apply_update(update);
        }
    }

    /// Compute an effect from the current composed state and record it under
    /// `id`, in one critical section. Nothing is recorded when `build` fails.
    pub fn stage_effect(
        &self,
        id: LocalActionId,
        build: impl FnOnce(&WorldState) -> Result<Effect>,
    ) -> Result<Effect> {
        let mut state = self.state.write();
        let effect = build(&state)?;
        state.pending.insert(id, effect.clone());
        Ok(effect)
    }

    /// Re-apply a previously computed effect (restart path).
    pub fn apply_effect(&self, id: LocalActionId, effect: Effect) {
        self.state.write().pending.insert(id, effect);
    }

    /// Drop the effect of `id` only.
    pub fn revert(&self, id: &LocalActionId) -> Option<Effect> {
        self.state.write().pending.remove(id)
    }

    /// Swap the optimistic effect of `id` for authoritative state.
    pub fn confirm(&self, id: &LocalActionId, updates: impl IntoIterator<Item = EntityUpdate>) {
        let mut state = self.state.write();
        state.pending.remove(id);
        for update in updates {
            state.apply_update(update);
        }
    }

    pub fn effect(&self, id: &LocalActionId) -> Option<Effect> {
        self.state.read().pending.get(id).cloned()
    }

    pub fn planet_count(&self) -> usize {
        self.state.read().planets.len()
    }
}

impl WorldView for WorldModel {
    fn planet(&self, id: &LocationId) -> Option<Planet> {
        self.state.read().planet(id)
    }

    fn voyages(&self) -> Vec<Voyage> {
        self.state.read().voyages()
    }

    fn player(&self) -> Option<Player> {
        self.state.read().player()
    }

    fn pending_effects(&self) -> usize {
        self.state.read().pending_effects()
    }
}
