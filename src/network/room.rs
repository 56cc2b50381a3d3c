//! Room Management
//!
//! A room is one lockstep session: a set of players, the frame engine that
//! sequences their inputs, and a 30 Hz tick task that drives commits and
//! broadcasts. The `RoomManager` owns the room map and the per-room tasks.
//!
//! Locking discipline: all mutation of a room goes through one
//! `Arc<RwLock<Room>>`; critical sections are short and never await.
//! Broadcast collects the member channels under the lock and sends after
//! releasing it, so one slow peer cannot stall the room.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::game::input::{InputRejection, InputValidator};
use crate::game::state::GameState;
use crate::network::protocol::{ServerMessage, WireFrame};
use crate::sync::engine::FrameEngine;
use crate::sync::frame::Frame;

/// Room-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// Membership is at the configured cap.
    #[error("room is full")]
    RoomFull,

    /// A member already resolves to the same player index.
    #[error("player index {0} already taken")]
    DuplicatePlayer(u16),
}

/// Derive the numeric player index from a player id string.
///
/// `"player_3"` style ids use the integer suffix after the last
/// underscore; anything else hashes (FNV-1a, fixed keys, stable across
/// builds and platforms) modulo 1000. Resolved exactly once at join.
pub fn player_index(player_id: &str) -> u16 {
    if let Some(suffix) = player_id.rsplit('_').next() {
        if let Ok(index) = suffix.parse::<u16>() {
            return index;
        }
    }

    let mut hash: u32 = 0x811c_9dc5;
    for byte in player_id.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash % 1000) as u16
}

/// A connected member of a room.
pub struct RoomPlayer {
    /// Player id string as presented at auth.
    pub player_id: String,
    /// Numeric index used on the wire and in frames.
    pub index: u16,
    /// Channel to this player's writer task.
    pub sender: mpsc::Sender<ServerMessage>,
    /// When the player joined.
    pub connected_at: Instant,
}

/// One lockstep session.
pub struct Room {
    /// Room identity, as requested by the first joiner.
    pub room_id: String,
    config: Arc<Config>,
    players: BTreeMap<u16, RoomPlayer>,
    engine: FrameEngine,
    /// Placeholder world: the server is authoritative by input sequencing
    /// alone and never simulates.
    #[allow(dead_code)]
    game_state: GameState,
    validator: InputValidator,
    created_at: Instant,
    started: bool,
    start_frame: u32,
}

impl Room {
    /// Create an empty room.
    pub fn new(room_id: String, config: Arc<Config>) -> Self {
        let validator = InputValidator::new(
            config.game.max_apm,
            config.network.max_frame_ahead,
            config.max_target_coord(),
        );
        Self {
            room_id,
            engine: FrameEngine::with_history(
                1,
                config.network.buffer_size,
                config.history.max_frame_history,
            ),
            game_state: GameState::new(),
            validator,
            created_at: Instant::now(),
            started: false,
            start_frame: 0,
            players: BTreeMap::new(),
            config,
        }
    }

    /// Add a player, resolving their numeric index.
    pub fn add_player(
        &mut self,
        player_id: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<u16, RoomError> {
        if self.players.len() as u32 >= self.config.game.max_players_per_room {
            return Err(RoomError::RoomFull);
        }

        let index = player_index(&player_id);
        if self.players.contains_key(&index) {
            return Err(RoomError::DuplicatePlayer(index));
        }

        self.players.insert(
            index,
            RoomPlayer {
                player_id,
                index,
                sender,
                connected_at: Instant::now(),
            },
        );
        self.engine.set_player_count(self.players.len() as u32);
        Ok(index)
    }

    /// Remove a player, dropping their validator state.
    pub fn remove_player(&mut self, index: u16) -> Option<RoomPlayer> {
        let player = self.players.remove(&index)?;
        self.validator.forget_player(index);
        self.engine.set_player_count(self.players.len().max(1) as u32);
        Some(player)
    }

    /// Current member count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// True once the last member left; empty rooms are destroyed.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Member player id strings, in index order.
    pub fn player_ids(&self) -> Vec<String> {
        self.players.values().map(|p| p.player_id.clone()).collect()
    }

    /// Member channels, for broadcasting outside the room lock.
    pub fn senders(&self) -> Vec<mpsc::Sender<ServerMessage>> {
        self.players.values().map(|p| p.sender.clone()).collect()
    }

    /// Whether lockstep has begun.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Frame the session started at.
    pub fn start_frame(&self) -> u32 {
        self.start_frame
    }

    /// Age of the room.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Server frame cursor.
    pub fn current_frame(&self) -> u32 {
        self.engine.current_frame()
    }

    /// Begin lockstep once two players are present.
    /// Returns the start frame on the transition tick only.
    pub fn maybe_start(&mut self) -> Option<u32> {
        if !self.started && self.players.len() >= 2 {
            self.started = true;
            self.start_frame = self.engine.current_frame();
            info!(room = %self.room_id, start_frame = self.start_frame, "game start");
            return Some(self.start_frame);
        }
        None
    }

    /// Validate and sequence one input from a member.
    ///
    /// Rejections leave the engine untouched and the session alive; the
    /// reason is logged anonymised (index only, never the id string).
    pub fn handle_input(&mut self, index: u16, data: &[u8]) -> Result<(), InputRejection> {
        let input = self
            .validator
            .validate(index, data, self.engine.current_frame())?;
        self.engine.add_input(input.frame_id, index, data.to_vec());
        Ok(())
    }

    /// Produce at most one frame for this tick period.
    ///
    /// Commits if every input is in; force-commits once the deadline has
    /// lapsed; otherwise produces nothing and the period is skipped.
    pub fn tick_once(&mut self) -> Option<Frame> {
        if let Some(frame) = self.engine.tick() {
            return Some(frame);
        }

        let timeout = Duration::from_secs_f64(self.config.network.frame_timeout);
        if self.engine.deadline_exceeded(timeout) {
            let frame = self.engine.force_tick();
            debug!(
                room = %self.room_id,
                frame_id = frame.frame_id,
                "force-committed after deadline"
            );
            return Some(frame);
        }
        None
    }

    /// Committed frames after `last_frame`, plus the current cursor:
    /// the reconnect catch-up payload.
    pub fn sync_frames_since(&self, last_frame: u32) -> (Vec<WireFrame>, u32) {
        let frames = self
            .engine
            .frames_since(i64::from(last_frame))
            .iter()
            .map(WireFrame::from)
            .collect();
        (frames, self.engine.current_frame())
    }
}

// =============================================================================
// ROOM MANAGER
// =============================================================================

/// What a successful join gives the connection task.
pub struct JoinInfo {
    /// The joiner's resolved player index.
    pub index: u16,
    /// Membership after the join.
    pub player_count: u32,
    /// All member id strings, including the joiner.
    pub players: Vec<String>,
    /// Channels of the *other* members, for the playerJoined broadcast.
    pub others: Vec<mpsc::Sender<ServerMessage>>,
    /// Handle to the joined room.
    pub room: Arc<RwLock<Room>>,
}

/// Result of a player leaving a room.
pub struct LeaveInfo {
    /// Id string of the departed player.
    pub player_id: String,
    /// Channels of the remaining members.
    pub remaining: Vec<mpsc::Sender<ServerMessage>>,
    /// Whether the room was destroyed because it emptied.
    pub room_destroyed: bool,
}

struct RoomEntry {
    room: Arc<RwLock<Room>>,
    tick_task: JoinHandle<()>,
}

/// Owns every active room and its tick task.
///
/// The rooms map is shared by the connection acceptor and the room tasks;
/// create/destroy is serialised through this one `RwLock`.
pub struct RoomManager {
    config: Arc<Config>,
    rooms: RwLock<BTreeMap<String, RoomEntry>>,
}

impl RoomManager {
    /// Create a manager.
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Join a room, creating it (and its tick task) if absent.
    pub async fn join_room(
        &self,
        room_id: &str,
        player_id: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<JoinInfo, RoomError> {
        let room = {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.get(room_id) {
                entry.room.clone()
            } else {
                let room = Arc::new(RwLock::new(Room::new(
                    room_id.to_owned(),
                    self.config.clone(),
                )));
                let tick_task = tokio::spawn(run_room_loop(room.clone(), self.config.clone()));
                rooms.insert(
                    room_id.to_owned(),
                    RoomEntry {
                        room: room.clone(),
                        tick_task,
                    },
                );
                info!(room = room_id, "room created");
                room
            }
        };

        let mut guard = room.write().await;
        let others = guard.senders();
        let index = guard.add_player(player_id, sender)?;
        let player_count = guard.player_count() as u32;
        let players = guard.player_ids();
        drop(guard);

        Ok(JoinInfo {
            index,
            player_count,
            players,
            others,
            room,
        })
    }

    /// Look up a room.
    pub async fn get_room(&self, room_id: &str) -> Option<Arc<RwLock<Room>>> {
        self.rooms.read().await.get(room_id).map(|e| e.room.clone())
    }

    /// Remove a player; destroys the room when it empties.
    pub async fn leave_room(&self, room_id: &str, index: u16) -> Option<LeaveInfo> {
        let room = self.get_room(room_id).await?;

        let (player, remaining, now_empty) = {
            let mut guard = room.write().await;
            let player = guard.remove_player(index)?;
            (player, guard.senders(), guard.is_empty())
        };

        if now_empty {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.remove(room_id) {
                entry.tick_task.abort();
            }
            info!(room = room_id, "room destroyed");
        }

        Some(LeaveInfo {
            player_id: player.player_id,
            remaining,
            room_destroyed: now_empty,
        })
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Stop every room tick task and drop all rooms.
    pub async fn shutdown(&self) {
        let mut rooms = self.rooms.write().await;
        for (_, entry) in rooms.iter() {
            entry.tick_task.abort();
        }
        rooms.clear();
    }
}

/// Per-room tick task: one frame attempt per period, broadcast outside
/// the lock. Exits when the room empties.
async fn run_room_loop(room: Arc<RwLock<Room>>, config: Arc<Config>) {
    let period = Duration::from_millis(u64::from(1000 / config.network.frame_rate));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first interval tick fires immediately, possibly before the
    // creating player's join has landed; only an emptied room exits.
    let mut had_players = false;

    loop {
        ticker.tick().await;

        let (messages, senders) = {
            let mut guard = room.write().await;
            if guard.player_count() > 0 {
                had_players = true;
            }
            if guard.is_empty() && (had_players || guard.age() > Duration::from_secs(30)) {
                break;
            }

            let mut messages: Vec<ServerMessage> = Vec::new();
            if let Some(start_frame) = guard.maybe_start() {
                messages.push(ServerMessage::GameStart { start_frame });
            }

            // One frame per period once running; a stalled room produces
            // nothing until the force-commit deadline lapses
            if guard.started() && guard.player_count() >= 2 {
                if let Some(frame) = guard.tick_once() {
                    messages.push(ServerMessage::GameFrame(WireFrame::from(&frame)));
                }
            }

            (messages, guard.senders())
        };

        for message in messages {
            for sender in &senders {
                if sender.send(message.clone()).await.is_err() {
                    // Peer is on its way out; disconnect handling will
                    // remove it from the room
                    warn!("dropping broadcast to a closing connection");
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
