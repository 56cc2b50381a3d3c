//! Game State, Snapshots and Divergence Detection
//!
//! `GameState` is the full deterministic world: the entity map, the
//! player-to-entity binding, and a ring of snapshots for rollback. The
//! snapshot hash (canonical serialisation + MD5) is the divergence signal
//! between peers - a diagnostic, never a safety mechanism.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::hash::{StateHash, StateHasher};
use crate::game::entity::Entity;

/// Simulation-layer errors. These never mutate state: the caller observes
/// the failure and decides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// No snapshot stored for the requested frame.
    #[error("no snapshot for frame {0}")]
    UnknownSnapshot(u32),

    /// Prediction would exceed the allowed lookahead.
    #[error("prediction limit reached at {outstanding} outstanding frames")]
    PredictionLimit {
        /// Predicted frames currently awaiting confirmation.
        outstanding: usize,
    },
}

/// An immutable copy of the world at one frame, with its canonical hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// Frame the snapshot was taken at.
    pub frame_id: u32,
    /// Entity map copy, keyed (and therefore hashed) in ascending id order.
    pub entities: BTreeMap<u32, Entity>,
    /// MD5 over the canonical serialisation.
    pub hash: StateHash,
}

impl StateSnapshot {
    /// Capture a snapshot of an entity map.
    pub fn capture(frame_id: u32, entities: &BTreeMap<u32, Entity>) -> Self {
        Self {
            frame_id,
            entities: entities.clone(),
            hash: Self::compute_hash(frame_id, entities),
        }
    }

    /// Canonical hash of a world: frame id, then every entity in ascending
    /// id order, every field in fixed order. No floats anywhere.
    pub fn compute_hash(frame_id: u32, entities: &BTreeMap<u32, Entity>) -> StateHash {
        let mut hasher = StateHasher::for_state();
        hasher.update_u32(frame_id);
        hasher.update_u32(entities.len() as u32);
        for entity in entities.values() {
            entity.hash_into(&mut hasher);
        }
        hasher.finalize()
    }
}

/// The deterministic world state.
///
/// Invariant after session start: exactly one entity per active player,
/// tracked through `player_entities`.
pub struct GameState {
    /// Current logical frame.
    pub frame_id: u32,
    /// All live entities, keyed by id.
    pub entities: BTreeMap<u32, Entity>,
    /// player index -> entity id binding.
    player_entities: BTreeMap<u16, u32>,
    /// Snapshot ring for rollback, keyed by frame id.
    snapshots: BTreeMap<u32, StateSnapshot>,
    /// Ring capacity (60 = 2 s at 30 Hz).
    max_snapshots: u32,
}

impl GameState {
    /// Default snapshot ring capacity.
    pub const MAX_SNAPSHOTS: u32 = 60;

    /// Create an empty world at frame 0.
    pub fn new() -> Self {
        Self {
            frame_id: 0,
            entities: BTreeMap::new(),
            player_entities: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            max_snapshots: Self::MAX_SNAPSHOTS,
        }
    }

    /// Create a world with a custom snapshot ring capacity.
    pub fn with_snapshot_capacity(max_snapshots: u32) -> Self {
        Self {
            max_snapshots: max_snapshots.max(1),
            ..Self::new()
        }
    }

    /// Insert an entity, returning its id.
    pub fn add_entity(&mut self, entity: Entity) -> u32 {
        let id = entity.id;
        self.entities.insert(id, entity);
        id
    }

    /// Remove an entity.
    pub fn remove_entity(&mut self, entity_id: u32) {
        self.entities.remove(&entity_id);
    }

    /// Look up an entity.
    pub fn entity(&self, entity_id: u32) -> Option<&Entity> {
        self.entities.get(&entity_id)
    }

    /// Look up an entity mutably.
    pub fn entity_mut(&mut self, entity_id: u32) -> Option<&mut Entity> {
        self.entities.get_mut(&entity_id)
    }

    /// Bind a player index to the entity it controls.
    pub fn bind_player(&mut self, player: u16, entity_id: u32) {
        self.player_entities.insert(player, entity_id);
    }

    /// Unbind a player and remove their entity.
    pub fn remove_player(&mut self, player: u16) {
        if let Some(entity_id) = self.player_entities.remove(&player) {
            self.entities.remove(&entity_id);
        }
    }

    /// The entity id a player controls.
    pub fn player_entity_id(&self, player: u16) -> Option<u32> {
        self.player_entities.get(&player).copied()
    }

    /// The entity a player controls.
    pub fn player_entity(&self, player: u16) -> Option<&Entity> {
        self.player_entity_id(player)
            .and_then(|id| self.entities.get(&id))
    }

    /// Players currently bound to entities, in index order.
    pub fn players(&self) -> impl Iterator<Item = u16> + '_ {
        self.player_entities.keys().copied()
    }

    /// Take a snapshot of the current state without storing it.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(self.frame_id, &self.entities)
    }

    /// Snapshot the current state into the ring, evicting entries older
    /// than the ring capacity.
    pub fn save_snapshot(&mut self) -> StateHash {
        let snapshot = self.snapshot();
        let hash = snapshot.hash;
        self.snapshots.insert(self.frame_id, snapshot);

        let oldest = self.frame_id.saturating_sub(self.max_snapshots);
        self.snapshots.retain(|&fid, _| fid >= oldest);

        hash
    }

    /// Restore the world from a stored snapshot.
    ///
    /// The entity map is replaced entirely; nothing is merged. On an
    /// unknown frame the state is left untouched.
    pub fn restore_snapshot(&mut self, frame_id: u32) -> Result<(), SimulationError> {
        let snapshot = self
            .snapshots
            .get(&frame_id)
            .ok_or(SimulationError::UnknownSnapshot(frame_id))?;

        self.frame_id = snapshot.frame_id;
        self.entities = snapshot.entities.clone();
        Ok(())
    }

    /// Restore directly from an externally held snapshot.
    pub fn restore_from(&mut self, snapshot: &StateSnapshot) {
        self.frame_id = snapshot.frame_id;
        self.entities = snapshot.entities.clone();
    }

    /// Whether the ring holds a snapshot for a frame.
    pub fn has_snapshot(&self, frame_id: u32) -> bool {
        self.snapshots.contains_key(&frame_id)
    }

    /// Number of snapshots currently held.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Hash of the current state, without storing a snapshot.
    pub fn compute_state_hash(&self) -> StateHash {
        StateSnapshot::compute_hash(self.frame_id, &self.entities)
    }

    /// Advance the frame counter.
    pub fn advance_frame(&mut self) {
        self.frame_id += 1;
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// STATE VALIDATOR
// =============================================================================

/// A recorded divergence between two peers' state hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    /// Frame the hashes disagree at.
    pub frame_id: u32,
    /// Hash the remote peer reported.
    pub expected: StateHash,
    /// Hash computed locally.
    pub actual: StateHash,
}

/// Records per-frame hashes and collects mismatches against a remote peer.
///
/// This is the diagnostic surface for sustained desync: the client records
/// its own hashes and verifies any hash the server reports.
#[derive(Debug, Default)]
pub struct StateValidator {
    hash_history: BTreeMap<u32, StateHash>,
    mismatches: Vec<HashMismatch>,
}

impl StateValidator {
    /// Create an empty validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the locally computed hash for a frame.
    pub fn record_hash(&mut self, frame_id: u32, hash: StateHash) {
        self.hash_history.insert(frame_id, hash);
    }

    /// Verify a remotely reported hash against the local record.
    ///
    /// Frames with no local record pass vacuously.
    pub fn verify_hash(&mut self, frame_id: u32, expected: StateHash) -> bool {
        let Some(&actual) = self.hash_history.get(&frame_id) else {
            return true;
        };

        if actual != expected {
            self.mismatches.push(HashMismatch {
                frame_id,
                expected,
                actual,
            });
            return false;
        }
        true
    }

    /// All mismatches observed so far.
    pub fn mismatches(&self) -> &[HashMismatch] {
        &self.mismatches
    }

    /// Drop mismatch records.
    pub fn clear_mismatches(&mut self) {
        self.mismatches.clear();
    }

    /// Drop hash records older than a frame, bounding memory.
    pub fn evict_before(&mut self, oldest_frame: u32) {
        self.hash_history.retain(|&fid, _| fid >= oldest_frame);
    }
}

// =============================================================================
// TESTS
// =============================================================================
