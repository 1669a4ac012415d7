//! Optimistic action reconciliation.
//!
//! Every user action gets a client-generated [`LocalActionId`] and walks a
//! one-way state machine:
//!
//! ```text
//!  Initiated ──submit ok──▶ Submitted ──confirmed──▶ Confirmed
//!      │                        │
//!      └──submit err──▶ Failed ◀┘ reverted
//! ```
//!
//! Initiation stages the action's effect on the [`WorldModel`]; failure
//! reverts exactly that effect and confirmation swaps it for the
//! authoritative state carried by the remote event. Submitted actions are
//! written to the KV store under `tx:<local id>` so a restarted client can
//! re-attach to them without submitting again.

use crate::bus::{Publisher, Subscription};
use crate::config::ReconcileConfig;
use crate::error::{EngineError, Result};
use crate::kv::KvStore;
use crate::miner::now_millis;
use crate::types::LocationId;
use crate::world::{Effect, EntityUpdate, Player, Voyage, WorldModel, WorldState, WorldView, UPGRADE_BRANCHES};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const TX_PREFIX: &str = "tx:";
/// Highest level a single upgrade branch can reach.
pub const MAX_BRANCH_LEVEL: u8 = 4;
/// Share of the silver cap one upgrade level costs.
const UPGRADE_COST_FACTOR: f64 = 0.2;
/// Events for handles nobody has claimed yet; the oldest is evicted first.
const MAX_UNCLAIMED_EVENTS: usize = 256;
/// Recently settled actions remembered so late resolutions are ignored.
const MAX_SETTLED: usize = 256;

// ---------------------------------------------------------------------------
// Identifiers and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalActionId(Uuid);

impl LocalActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    fn tx_key(&self) -> String {
        format!("{TX_PREFIX}{}", self.0)
    }
}

impl Default for LocalActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier the remote ledger assigned to a submission.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(pub String);

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionKind {
    InitializePlayer {
        address: String,
        home: LocationId,
    },
    MoveResources {
        from: LocationId,
        to: LocationId,
        energy: f64,
        silver: f64,
    },
    Upgrade {
        planet: LocationId,
        branch: u8,
    },
    PurchaseCosmetic {
        planet: LocationId,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::InitializePlayer { .. } => "initialize-player",
            ActionKind::MoveResources { .. } => "move-resources",
            ActionKind::Upgrade { .. } => "upgrade",
            ActionKind::PurchaseCosmetic { .. } => "purchase-cosmetic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Initiated,
    Submitted,
    Confirmed,
    Failed,
}

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionState::Confirmed | ActionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: LocalActionId,
    /// Arguments as submitted (silver already clipped for moves).
    pub kind: ActionKind,
    pub state: ActionState,
    pub handle: Option<RemoteHandle>,
    pub initiated_at: u64,
    pub submitted_at: Option<u64>,
    pub failure: Option<String>,
}

/// Opaque authorization produced by a [`ProofProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof(pub serde_json::Value);

// ---------------------------------------------------------------------------
// External seams
// ---------------------------------------------------------------------------

pub trait RemoteLedger: Send + Sync + 'static {
    fn submit(
        &self,
        kind: &ActionKind,
        payload: serde_json::Value,
        proof: Proof,
    ) -> impl Future<Output = Result<RemoteHandle>> + Send;
}

pub trait ProofProvider: Send + Sync + 'static {
    fn prove(&self, action: &PendingAction) -> impl Future<Output = Result<Proof>> + Send;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Confirmed,
    Reverted { reason: String },
}

/// Resolution of one submission, as emitted by the remote ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub handle: RemoteHandle,
    pub outcome: Outcome,
    #[serde(default)]
    pub deltas: Vec<EntityUpdate>,
}

/// Published on every state transition. The terminal event is the last
/// trace of an action: the ledger forgets it right after.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEvent {
    pub id: LocalActionId,
    pub kind: &'static str,
    pub state: ActionState,
    pub handle: Option<RemoteHandle>,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TxRecord {
    action: PendingAction,
    effect: Effect,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Live actions only. Terminal ones leave `actions` and `by_handle` and
/// are remembered in `settled` for a while.
#[derive(Default)]
struct Book {
    actions: HashMap<LocalActionId, PendingAction>,
    by_handle: HashMap<RemoteHandle, LocalActionId>,
    /// Outcomes that arrived before the submit call returned their handle,
    /// oldest first.
    unclaimed: VecDeque<(RemoteHandle, Outcome)>,
    settled: VecDeque<(LocalActionId, ActionState)>,
}

impl Book {
    fn settle(&mut self, id: &LocalActionId) -> Option<PendingAction> {
        let action = self.actions.remove(id)?;
        if let Some(handle) = &action.handle {
            self.by_handle.remove(handle);
        }
        if self.settled.len() >= MAX_SETTLED {
            self.settled.pop_front();
        }
        self.settled.push_back((action.id, action.state));
        Some(action)
    }

    fn settled_state(&self, id: &LocalActionId) -> Option<ActionState> {
        self.settled
            .iter()
            .find(|(settled, _)| settled == id)
            .map(|(_, state)| *state)
    }

    fn hold(&mut self, handle: RemoteHandle, outcome: Outcome) {
        if self.unclaimed.len() >= MAX_UNCLAIMED_EVENTS {
            if let Some((dropped, _)) = self.unclaimed.pop_front() {
                warn!("Dropping unclaimed event for {}", dropped);
            }
        }
        self.unclaimed.push_back((handle, outcome));
    }

    fn claim(&mut self, handle: &RemoteHandle) -> Option<Outcome> {
        let pos = self.unclaimed.iter().position(|(h, _)| h == handle)?;
        self.unclaimed.remove(pos).map(|(_, outcome)| outcome)
    }
}

pub struct Ledger {
    world: Arc<WorldModel>,
    kv: Arc<dyn KvStore>,
    config: ReconcileConfig,
    book: Mutex<Book>,
    events: Publisher<ActionEvent>,
}

impl Ledger {
    pub fn new(world: Arc<WorldModel>, kv: Arc<dyn KvStore>, config: ReconcileConfig) -> Self {
        Self {
            world,
            kv,
            config,
            book: Mutex::new(Book::default()),
            events: Publisher::new(),
        }
    }

    pub fn world(&self) -> &Arc<WorldModel> {
        &self.world
    }

    pub fn subscribe(&self) -> Subscription<ActionEvent> {
        self.events.subscribe()
    }

    /// A live (initiated or submitted) action.
    pub fn action(&self, id: &LocalActionId) -> Option<PendingAction> {
        self.book.lock().actions.get(id).cloned()
    }

    /// Final state of a recently settled action.
    pub fn settled(&self, id: &LocalActionId) -> Option<ActionState> {
        self.book.lock().settled_state(id)
    }

    /// Every live action, oldest first.
    pub fn actions(&self) -> Vec<PendingAction> {
        let mut all: Vec<_> = self.book.lock().actions.values().cloned().collect();
        all.sort_by_key(|a| a.initiated_at);
        all
    }

    fn publish(&self, action: &PendingAction) {
        self.events.publish(ActionEvent {
            id: action.id,
            kind: action.kind.name(),
            state: action.state,
            handle: action.handle.clone(),
            reason: action.failure.clone(),
        });
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Record a new action and stage its optimistic effect. Local
    /// preconditions are checked first; on `InvalidAction` nothing is
    /// recorded.
    pub fn initiate(&self, kind: ActionKind) -> Result<PendingAction> {
        let id = LocalActionId::new();
        let guard = self.config.guard_fraction;
        let mut effective = kind;
        self.world.stage_effect(id, |state| {
            let (kind, effect) = build_effect(state, id, effective.clone(), guard)?;
            effective = kind;
            Ok(effect)
        })?;

        let action = PendingAction {
            id,
            kind: effective,
            state: ActionState::Initiated,
            handle: None,
            initiated_at: now_millis(),
            submitted_at: None,
            failure: None,
        };
        self.book.lock().actions.insert(id, action.clone());
        info!("Action {} ({}) initiated", id, action.kind.name());
        self.publish(&action);
        Ok(action)
    }

    /// The remote ledger accepted the submission.
    pub fn mark_submitted(&self, id: &LocalActionId, handle: RemoteHandle) -> Result<()> {
        let (action, early) = {
            let mut book = self.book.lock();
            let action = book
                .actions
                .get_mut(id)
                .ok_or_else(|| EngineError::InvalidAction(format!("action {id} is not live")))?;
            if action.state != ActionState::Initiated {
                return Err(EngineError::InvalidAction(format!(
                    "action {id} is {:?}, cannot mark submitted",
                    action.state
                )));
            }
            action.state = ActionState::Submitted;
            action.handle = Some(handle.clone());
            action.submitted_at = Some(now_millis());
            let action = action.clone();
            book.by_handle.insert(handle.clone(), *id);
            let early = book.claim(&handle);
            (action, early)
        };

        if let Err(e) = self.persist(&action) {
            warn!("Action {} will not survive a restart: {}", id, e);
        }
        debug!("Action {} submitted as {}", id, handle);
        self.publish(&action);

        if let Some(outcome) = early {
            // Authoritative deltas were applied when the event arrived.
            self.resolve(id, outcome, Vec::new())?;
        }
        Ok(())
    }

    /// Mark an action failed and reverse its effect. Recently settled
    /// actions are left untouched.
    pub fn fail(&self, id: &LocalActionId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let action = {
            let mut book = self.book.lock();
            if let Some(state) = book.settled_state(id) {
                debug!("Ignoring failure of {:?} action {}", state, id);
                return Ok(());
            }
            let action = book
                .actions
                .get_mut(id)
                .ok_or_else(|| EngineError::InvalidAction(format!("unknown action {id}")))?;
            action.state = ActionState::Failed;
            action.failure = Some(reason.clone());
            let failed = action.clone();
            book.settle(id);
            failed
        };

        self.world.revert(id);
        self.forget(id)?;
        warn!("Action {} ({}) failed: {}", id, action.kind.name(), reason);
        self.publish(&action);
        Ok(())
    }

    fn confirm(&self, id: &LocalActionId, deltas: Vec<EntityUpdate>) -> Result<()> {
        let action = {
            let mut book = self.book.lock();
            let Some(action) = book.actions.get_mut(id) else {
                return Ok(());
            };
            if action.state != ActionState::Submitted {
                debug!("Ignoring confirmation of {:?} action {}", action.state, id);
                return Ok(());
            }
            action.state = ActionState::Confirmed;
            let confirmed = action.clone();
            book.settle(id);
            confirmed
        };

        self.world.confirm(id, deltas);
        self.forget(id)?;
        info!("Action {} ({}) confirmed", id, action.kind.name());
        self.publish(&action);
        Ok(())
    }

    fn resolve(&self, id: &LocalActionId, outcome: Outcome, deltas: Vec<EntityUpdate>) -> Result<()> {
        match outcome {
            Outcome::Confirmed => self.confirm(id, deltas),
            Outcome::Reverted { reason } => {
                self.world.apply_updates(deltas);
                self.fail(id, EngineError::RemoteRevert(reason).to_string())
            }
        }
    }

    /// Apply one remote event. Events for handles not submitted yet are
    /// held until [`Ledger::mark_submitted`] claims them; their deltas are
    /// applied right away.
    pub fn on_remote_event(&self, event: LedgerEvent) -> Result<()> {
        let id = {
            let mut book = self.book.lock();
            let known = book.by_handle.get(&event.handle).copied();
            if known.is_none() {
                book.hold(event.handle.clone(), event.outcome.clone());
            }
            known
        };
        match id {
            Some(id) => self.resolve(&id, event.outcome, event.deltas),
            None => {
                debug!("Event for unknown handle {}, holding", event.handle);
                self.world.apply_updates(event.deltas);
                Ok(())
            }
        }
    }

    /// Consume the remote event stream for the rest of the session.
    pub async fn run_events(&self, mut rx: mpsc::Receiver<LedgerEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.on_remote_event(event) {
                warn!("Failed to apply ledger event: {}", e);
            }
        }
        debug!("Ledger event stream closed");
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persist(&self, action: &PendingAction) -> Result<()> {
        let effect = self.world.effect(&action.id).unwrap_or_default();
        let record = TxRecord {
            action: action.clone(),
            effect,
        };
        self.kv.put(&action.id.tx_key(), &serde_json::to_vec(&record)?)
    }

    fn forget(&self, id: &LocalActionId) -> Result<()> {
        self.kv.remove(&id.tx_key())
    }

    /// Re-attach to every action a previous session submitted: the effect
    /// is re-staged and the handle registered, nothing is resubmitted.
    /// Returns the number of actions restored.
    pub fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for (key, bytes) in self.kv.iterate(TX_PREFIX)? {
            let record: TxRecord = match serde_json::from_slice(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Dropping unreadable pending action {}: {}", key, e);
                    continue;
                }
            };
            let action = record.action;
            let Some(handle) = action.handle.clone() else {
                continue;
            };
            self.world.apply_effect(action.id, record.effect);
            let mut book = self.book.lock();
            book.by_handle.insert(handle, action.id);
            book.actions.insert(action.id, action);
            restored += 1;
        }
        if restored > 0 {
            info!("Re-attached {} submitted actions", restored);
        }
        Ok(restored)
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidAction(msg.into())
}

/// Silver one more level of `branch` costs on `planet`.
pub fn upgrade_cost(current_level: u8, silver_cap: f64) -> f64 {
    (current_level as f64 + 1.0) * UPGRADE_COST_FACTOR * silver_cap
}

fn build_effect(
    state: &WorldState,
    id: LocalActionId,
    kind: ActionKind,
    guard_fraction: f64,
) -> Result<(ActionKind, Effect)> {
    let planet = |pid: &LocationId| state.planet(pid).ok_or_else(|| invalid(format!("unknown planet {pid}")));
    let mut effect = Effect::default();

    let kind = match kind {
        ActionKind::InitializePlayer { address, home } => {
            if state.player().is_some() {
                return Err(invalid("player already initialized"));
            }
            let home_planet = planet(&home)?;
            if home_planet.owner.is_some() {
                return Err(invalid(format!("planet {home} is already owned")));
            }
            effect.player = Some(Player {
                address: address.clone(),
                home,
            });
            ActionKind::InitializePlayer { address, home }
        }

        ActionKind::MoveResources {
            from,
            to,
            energy,
            silver,
        } => {
            if from == to {
                return Err(invalid("move source and destination are the same planet"));
            }
            if energy < 0.0 || silver < 0.0 {
                return Err(invalid("move amounts must be non-negative"));
            }
            let source = planet(&from)?;
            let dest = planet(&to)?;
            let player = state
                .player()
                .ok_or_else(|| invalid("no player to move resources for"))?;
            if source.owner.as_deref() != Some(player.address.as_str()) {
                return Err(invalid(format!(
                    "planet {from} is not owned by {}",
                    player.address
                )));
            }
            if energy > source.energy {
                return Err(invalid(format!(
                    "planet {from} has {:.0} energy, {energy:.0} requested",
                    source.energy
                )));
            }
            if silver > source.silver {
                return Err(invalid(format!(
                    "planet {from} has {:.0} silver, {silver:.0} requested",
                    source.silver
                )));
            }
            let silver = silver.min(guard_fraction * dest.free_silver());
            let delta = effect.planet(from);
            delta.energy -= energy;
            delta.silver -= silver;
            effect.voyage = Some(Voyage {
                id: id.to_string(),
                from,
                to,
                energy,
                silver,
                provisional: true,
            });
            ActionKind::MoveResources {
                from,
                to,
                energy,
                silver,
            }
        }

        ActionKind::Upgrade { planet: pid, branch } => {
            let b = branch as usize;
            if b >= UPGRADE_BRANCHES {
                return Err(invalid(format!("no upgrade branch {branch}")));
            }
            let p = planet(&pid)?;
            let level = p.upgrade_state[b];
            if level >= MAX_BRANCH_LEVEL {
                return Err(invalid(format!("branch {branch} of {pid} is maxed")));
            }
            let cost = upgrade_cost(level, p.silver_cap);
            if p.silver < cost {
                return Err(invalid(format!(
                    "upgrade costs {cost:.0} silver, planet {pid} has {:.0}",
                    p.silver
                )));
            }
            let delta = effect.planet(pid);
            delta.silver -= cost;
            delta.upgrades[b] += 1;
            ActionKind::Upgrade { planet: pid, branch }
        }

        ActionKind::PurchaseCosmetic { planet: pid } => {
            planet(&pid)?;
            effect.planet(pid).hat += 1;
            ActionKind::PurchaseCosmetic { planet: pid }
        }
    };

    Ok((kind, effect))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives one action from initiation to its terminal state:
/// `initiate → prove → submit → await event`. Any failure along the way
/// lands the action in `Failed`.
pub struct ActionPipeline<R, P> {
    ledger: Arc<Ledger>,
    remote: Arc<R>,
    prover: Arc<P>,
}

impl<R: RemoteLedger, P: ProofProvider> ActionPipeline<R, P> {
    pub fn new(ledger: Arc<Ledger>, remote: Arc<R>, prover: Arc<P>) -> Self {
        Self {
            ledger,
            remote,
            prover,
        }
    }

    /// Initiate `kind` and hand the rest to a spawned task. Local
    /// precondition failures are returned here; the task resolves to the
    /// action's terminal state.
    pub fn dispatch(&self, kind: ActionKind) -> Result<(LocalActionId, JoinHandle<ActionState>)> {
        let mut updates = self.ledger.subscribe();
        let action = self.ledger.initiate(kind)?;
        let id = action.id;
        let ledger = self.ledger.clone();
        let remote = self.remote.clone();
        let prover = self.prover.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = submit(&ledger, &*remote, &*prover, &action).await {
                if let Err(fail_err) = ledger.fail(&id, e.to_string()) {
                    warn!("Could not record failure of {}: {}", id, fail_err);
                    return ActionState::Failed;
                }
            }

            // Subscribed before submitting, so the terminal event is queued
            // even when the action settled inside `submit`.
            while let Some(ev) = updates.recv().await {
                if ev.id == id && ev.state.is_terminal() {
                    return ev.state;
                }
            }
            ActionState::Failed
        });

        Ok((id, task))
    }
}

async fn submit<R: RemoteLedger, P: ProofProvider>(
    ledger: &Ledger,
    remote: &R,
    prover: &P,
    action: &PendingAction,
) -> Result<()> {
    let proof = prover.prove(action).await?;
    let payload = serde_json::to_value(&action.kind)?;
    let handle = remote.submit(&action.kind, payload, proof).await?;
    ledger.mark_submitted(&action.id, handle)
}
