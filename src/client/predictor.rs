//! Client Prediction and Rollback
//!
//! The client runs the same deterministic simulation as every other peer,
//! but optimistically: the local input is applied immediately, other
//! players' inputs are guessed from their last seen values. When the
//! authoritative frame arrives the guess is checked; a wrong guess rolls
//! the world back to the snapshot taken before the frame, applies the
//! authoritative inputs, and replays the remaining predictions in order.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::Config;
use crate::core::fixed::Fixed;
use crate::game::input::PlayerInput;
use crate::game::physics::PhysicsEngine;
use crate::game::state::{GameState, SimulationError, StateSnapshot};
use crate::sync::frame::Frame;

/// Outcome of feeding one server frame to the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionResult {
    /// Frame this result describes.
    pub frame_id: u32,
    /// Whether the frame had been predicted locally.
    pub predicted: bool,
    /// Whether the prediction matched the authoritative inputs.
    pub correct: bool,
    /// Whether a rollback-and-replay was performed.
    pub rolled_back: bool,
}

/// Predictor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorStats {
    /// Frames predicted so far.
    pub predictions: u64,
    /// Predictions confirmed unchanged.
    pub correct: u64,
    /// Mispredictions that forced a rollback.
    pub rollbacks: u64,
    /// Predictions still awaiting confirmation.
    pub outstanding: usize,
    /// Snapshots currently held.
    pub snapshots: usize,
}

/// Client-side prediction and rollback driver.
///
/// Owns the client's copy of the deterministic simulation. The server's
/// frame stream flows through [`on_server_frame`](Self::on_server_frame);
/// local inputs enter through [`predict_frame`](Self::predict_frame).
pub struct ClientPredictor {
    state: GameState,
    physics: PhysicsEngine,
    local_player: u16,
    frame_time_ms: i32,
    player_speed: Fixed,
    /// Optimistically executed frames, keyed by frame id.
    predicted_frames: BTreeMap<u32, Frame>,
    /// Local inputs not yet covered by an authoritative frame.
    unconfirmed_inputs: Vec<(u32, Vec<u8>)>,
    /// Pre-prediction snapshots, keyed by the frame they precede.
    snapshots: BTreeMap<u32, StateSnapshot>,
    predictions: u64,
    correct: u64,
    rollbacks: u64,
}

impl ClientPredictor {
    /// Most frames the client may run ahead of the server (1 s at 30 Hz).
    /// When full, prediction stalls until a server frame drains the set.
    pub const MAX_PREDICTED_FRAMES: usize = 30;

    /// Snapshot ring capacity; must cover every outstanding prediction.
    pub const MAX_SNAPSHOTS: u32 = 60;

    /// Create a predictor for the local player.
    pub fn new(config: &Config, local_player: u16) -> Self {
        Self {
            state: GameState::new(),
            physics: PhysicsEngine::new(&config.physics),
            local_player,
            frame_time_ms: config.network.frame_time_ms() as i32,
            player_speed: config.game.player_speed_fixed(),
            predicted_frames: BTreeMap::new(),
            unconfirmed_inputs: Vec::new(),
            snapshots: BTreeMap::new(),
            predictions: 0,
            correct: 0,
            rollbacks: 0,
        }
    }

    /// The simulated world.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Mutable world access for session setup (spawning, binding players).
    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    /// Local player index.
    pub fn local_player(&self) -> u16 {
        self.local_player
    }

    /// Whether another frame may be predicted right now.
    pub fn can_predict(&self) -> bool {
        self.predicted_frames.len() < Self::MAX_PREDICTED_FRAMES
    }

    /// Optimistically execute a frame before the server confirms it.
    ///
    /// Takes a snapshot first (so the frame can be rolled back), guesses
    /// every other player's input from the last value seen for them, then
    /// applies the frame immediately.
    pub fn predict_frame(
        &mut self,
        frame_id: u32,
        my_input: Vec<u8>,
        other_players: &[u16],
    ) -> Result<Frame, SimulationError> {
        if !self.can_predict() {
            return Err(SimulationError::PredictionLimit {
                outstanding: self.predicted_frames.len(),
            });
        }

        // Snapshot before any mutation, keyed by the frame it precedes
        self.snapshots
            .insert(frame_id, self.state.snapshot());
        let oldest = frame_id.saturating_sub(Self::MAX_SNAPSHOTS);
        self.snapshots.retain(|&fid, _| fid >= oldest);

        let mut frame = Frame::new(frame_id);
        frame.set_input(self.local_player, my_input.clone());
        for &other in other_players {
            frame.set_input(other, self.last_seen_input(other));
        }

        self.predicted_frames.insert(frame_id, frame.clone());
        self.unconfirmed_inputs.push((frame_id, my_input));

        self.apply_frame(&frame);
        self.predictions += 1;

        Ok(frame)
    }

    /// Reconcile an authoritative server frame against local predictions.
    pub fn on_server_frame(
        &mut self,
        server_frame: &Frame,
        other_players: &[u16],
    ) -> PredictionResult {
        let frame_id = server_frame.frame_id;

        // Not a prediction: just execute it
        if !self.predicted_frames.contains_key(&frame_id) {
            self.apply_frame(server_frame);
            return PredictionResult {
                frame_id,
                predicted: false,
                correct: true,
                rolled_back: false,
            };
        }

        let matches = self
            .predicted_frames
            .get(&frame_id)
            .is_some_and(|predicted| Self::inputs_match(self.local_player, predicted, server_frame));

        if matches {
            self.correct += 1;
            self.predicted_frames.remove(&frame_id);
            self.drop_confirmed(frame_id);
            PredictionResult {
                frame_id,
                predicted: true,
                correct: true,
                rolled_back: false,
            }
        } else {
            debug!(frame_id, "misprediction, rolling back");
            self.rollback_and_replay(server_frame);
            self.rollbacks += 1;
            self.drop_confirmed(frame_id);
            PredictionResult {
                frame_id,
                predicted: true,
                correct: false,
                rolled_back: true,
            }
        }
    }

    /// Compare predicted vs authoritative inputs for *other* players only.
    /// The local input is authoritative on this client and echoed unchanged
    /// by the server. A missing entry equals empty bytes.
    fn inputs_match(local_player: u16, predicted: &Frame, actual: &Frame) -> bool {
        static EMPTY: &[u8] = &[];
        for (&player, actual_input) in &actual.inputs {
            if player == local_player {
                continue;
            }
            let predicted_input = predicted.input(player).unwrap_or(EMPTY);
            if predicted_input != actual_input.as_slice() {
                return false;
            }
        }
        true
    }

    /// Restore the pre-frame snapshot, apply the authoritative frame, and
    /// replay every later prediction in ascending order.
    fn rollback_and_replay(&mut self, server_frame: &Frame) {
        let frame_id = server_frame.frame_id;

        if let Some(snapshot) = self.snapshots.get(&frame_id) {
            let snapshot = snapshot.clone();
            self.state.restore_from(&snapshot);
        }

        self.apply_frame(server_frame);

        let replay_ids: Vec<u32> = self
            .predicted_frames
            .range(frame_id + 1..)
            .map(|(&fid, _)| fid)
            .collect();
        for fid in replay_ids {
            if let Some(frame) = self.predicted_frames.get(&fid).cloned() {
                self.apply_frame(&frame);
            }
        }

        // Everything at or below the corrected frame is settled
        self.predicted_frames.retain(|&fid, _| fid > frame_id);
    }

    /// Execute one frame deterministically: decode each player's input,
    /// steer their entity, step the physics once, adopt the frame id.
    fn apply_frame(&mut self, frame: &Frame) {
        for (&player, data) in &frame.inputs {
            if data.is_empty() {
                continue;
            }
            let Ok(input) = PlayerInput::decode(data) else {
                continue;
            };
            if let Some(entity_id) = self.state.player_entity_id(player) {
                self.physics.apply_input(
                    &mut self.state.entities,
                    entity_id,
                    input.flags,
                    self.player_speed,
                );
            }
        }

        self.physics.update(&mut self.state.entities, self.frame_time_ms);
        self.state.frame_id = frame.frame_id;
    }

    /// Most recent input seen for a player across outstanding predictions.
    fn last_seen_input(&self, player: u16) -> Vec<u8> {
        for frame in self.predicted_frames.values().rev() {
            if let Some(input) = frame.input(player) {
                return input.to_vec();
            }
        }
        Vec::new()
    }

    /// Drop unconfirmed inputs covered by a confirmed frame.
    fn drop_confirmed(&mut self, confirmed_frame: u32) {
        self.unconfirmed_inputs.retain(|(fid, _)| *fid > confirmed_frame);
    }

    /// Prediction accuracy in percent.
    pub fn accuracy(&self) -> f64 {
        if self.predictions == 0 {
            return 0.0;
        }
        self.correct as f64 / self.predictions as f64 * 100.0
    }

    /// Predictor counters.
    pub fn stats(&self) -> PredictorStats {
        PredictorStats {
            predictions: self.predictions,
            correct: self.correct,
            rollbacks: self.rollbacks,
            outstanding: self.predicted_frames.len(),
            snapshots: self.snapshots.len(),
        }
    }
}

// =============================================================================
// INTERPOLATION (render side)
// =============================================================================

/// Linear interpolation between the last two logical frames.
///
/// The render loop runs faster than the 30 Hz logic loop; positions are
/// blended by `alpha = elapsed / frame_time` so motion looks continuous.
/// Interpolation output never feeds back into the simulation.
#[derive(Default)]
pub struct InterpolationRenderer {
    prev: Option<BTreeMap<u32, (Fixed, Fixed)>>,
    curr: Option<BTreeMap<u32, (Fixed, Fixed)>>,
    alpha: f32,
}

impl InterpolationRenderer {
    /// Create an empty renderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record positions after a logic frame executed.
    pub fn on_logic_frame(&mut self, state: &GameState) {
        let captured: BTreeMap<u32, (Fixed, Fixed)> = state
            .entities
            .iter()
            .map(|(&id, e)| (id, (e.x, e.y)))
            .collect();
        self.prev = self.curr.take();
        self.curr = Some(captured);
        self.alpha = 0.0;
    }

    /// Advance the blend factor from render time.
    pub fn update(&mut self, elapsed_ms: f32, frame_time_ms: f32) {
        if frame_time_ms > 0.0 {
            self.alpha = (elapsed_ms / frame_time_ms).min(1.0);
        }
    }

    /// Current blend factor in [0, 1].
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Interpolated render position for an entity, in float pixels.
    ///
    /// Falls back to the live simulation position while fewer than two
    /// logic frames have been captured.
    pub fn position(&self, state: &GameState, entity_id: u32) -> Option<(f32, f32)> {
        use crate::core::fixed::to_float;

        let (Some(prev), Some(curr)) = (&self.prev, &self.curr) else {
            return state.entity(entity_id).map(|e| e.position_f32());
        };

        let (Some(&(px, py)), Some(&(cx, cy))) = (prev.get(&entity_id), curr.get(&entity_id))
        else {
            return state.entity(entity_id).map(|e| e.position_f32());
        };

        let x = to_float(px) + (to_float(cx) - to_float(px)) * self.alpha;
        let y = to_float(py) + (to_float(cy) - to_float(py)) * self.alpha;
        Some((x, y))
    }
}

// =============================================================================
// TESTS
// =============================================================================
