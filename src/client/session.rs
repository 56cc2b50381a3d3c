//! Game Client Session
//!
//! Connects to the server, authenticates into a room, and exchanges
//! envelopes: local inputs out, authoritative frames in. The client core
//! is effectively single-threaded - the receive task only parks messages
//! into a mutex-guarded store (never holding it across an await), and the
//! logic loop drains that store at a fixed 30 Hz.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::client::predictor::{ClientPredictor, InterpolationRenderer};
use crate::core::fixed::Fixed;
use crate::game::input::InputManager;
use crate::network::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::network::room::player_index;
use crate::sync::frame::Frame;

/// Client session errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error("connection error: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope encode/decode failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server did not answer the auth in time.
    #[error("timed out waiting for join confirmation")]
    JoinTimeout,

    /// The server refused the session (room full, bad auth).
    #[error("join rejected: {0}")]
    Rejected(String),

    /// Operation on a session that is no longer connected.
    #[error("not connected")]
    NotConnected,
}

/// The room membership the server confirmed at join.
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    /// Room id.
    pub room_id: String,
    /// Local player id string.
    pub player_id: String,
    /// Local numeric player index.
    pub player_index: u16,
    /// Members at join time.
    pub players: Vec<String>,
}

/// State shared between the receive task and the logic loop.
/// Guarded by a plain mutex, held only for short synchronous sections.
struct ClientShared {
    /// Frames received and not yet executed, keyed by frame id.
    frames: BTreeMap<u32, Frame>,
    /// Highest confirmed frame id seen, -1 before any.
    last_confirmed_frame: i64,
    /// Highest frame id seen at all (confirmed or forced), -1 before any.
    latest_server_frame: i64,
    /// Last frame handed to the logic loop, -1 before any.
    executed_frame: i64,
    /// Other players' indices, kept current by join/leave messages.
    peers: Vec<u16>,
    /// Lockstep start announcement.
    started: bool,
    start_frame: u32,
    connected: bool,
}

/// Local input bookkeeping: the manager plus the frame cursor that
/// advances as inputs are sent.
struct LocalInput {
    manager: InputManager,
    current_frame: u32,
}

/// A connected lockstep client session.
pub struct GameClient {
    config: Arc<Config>,
    info: JoinedRoom,
    shared: Arc<Mutex<ClientShared>>,
    local: Mutex<LocalInput>,
    out_tx: mpsc::Sender<ClientMessage>,
    recv_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl GameClient {
    /// Connect, authenticate, and wait for `joinSuccess`.
    pub async fn connect(
        url: &str,
        player_id: &str,
        room_id: &str,
        config: Arc<Config>,
    ) -> Result<Self, ClientError> {
        let (mut ws, _) = connect_async(url).await?;

        let auth = ClientMessage::Auth {
            player_id: player_id.to_owned(),
            room_id: room_id.to_owned(),
        };
        ws.send(Message::Binary(auth.to_msgpack()?)).await?;

        // Await joinSuccess; anything else during the window is ignored,
        // a close is a rejection
        let join_deadline = Duration::from_secs_f64(config.network.auth_timeout);
        let joined = loop {
            let message = timeout(join_deadline, ws.next())
                .await
                .map_err(|_| ClientError::JoinTimeout)?;
            match message {
                Some(Ok(Message::Binary(data))) => {
                    match ServerMessage::from_msgpack(&data) {
                        Ok(ServerMessage::JoinSuccess {
                            room_id,
                            player_id,
                            players,
                            ..
                        }) => {
                            let player_index = player_index(&player_id);
                            break JoinedRoom {
                                room_id,
                                player_id,
                                player_index,
                                players,
                            };
                        }
                        Ok(other) => {
                            debug!("pre-join message ignored: {other:?}");
                        }
                        Err(e) => {
                            debug!("undecodable pre-join message: {e}");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("close {}: {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed".to_owned());
                    return Err(ClientError::Rejected(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ClientError::Connect(e)),
                None => return Err(ClientError::Rejected("closed".to_owned())),
            }
        };

        info!(room = %joined.room_id, index = joined.player_index, "joined room");

        let peers = joined
            .players
            .iter()
            .map(|id| player_index(id))
            .filter(|&idx| idx != joined.player_index)
            .collect();
        let shared = Arc::new(Mutex::new(ClientShared {
            frames: BTreeMap::new(),
            last_confirmed_frame: -1,
            latest_server_frame: -1,
            executed_frame: -1,
            peers,
            started: false,
            start_frame: 0,
            connected: true,
        }));

        let (ws_tx, ws_rx) = ws.split();
        let (out_tx, out_rx) = mpsc::channel::<ClientMessage>(64);

        let writer_task = tokio::spawn(run_writer(ws_tx, out_rx));
        let recv_task = tokio::spawn(run_receiver(
            ws_rx,
            shared.clone(),
            joined.player_index,
        ));

        Ok(Self {
            local: Mutex::new(LocalInput {
                manager: InputManager::new(joined.player_index),
                current_frame: 0,
            }),
            config,
            info: joined,
            shared,
            out_tx,
            recv_task,
            writer_task,
        })
    }

    /// Membership confirmed at join.
    pub fn info(&self) -> &JoinedRoom {
        &self.info
    }

    /// Whether the transport is still up.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().map(|s| s.connected).unwrap_or(false)
    }

    /// Whether the server announced game start.
    pub fn started(&self) -> bool {
        self.shared.lock().map(|s| s.started).unwrap_or(false)
    }

    /// Frame the session started at (valid once `started`).
    pub fn start_frame(&self) -> u32 {
        self.shared.lock().map(|s| s.start_frame).unwrap_or(0)
    }

    /// Highest confirmed frame id seen, -1 before any.
    pub fn last_confirmed_frame(&self) -> i64 {
        self.shared.lock().map(|s| s.last_confirmed_frame).unwrap_or(-1)
    }

    /// Highest frame id seen at all, -1 before any.
    pub fn latest_server_frame(&self) -> i64 {
        self.shared.lock().map(|s| s.latest_server_frame).unwrap_or(-1)
    }

    /// Other players' indices, as currently known.
    pub fn other_players(&self) -> Vec<u16> {
        self.shared.lock().map(|s| s.peers.clone()).unwrap_or_default()
    }

    /// Frame id the local input cursor is at.
    pub fn current_input_frame(&self) -> u32 {
        self.local.lock().map(|l| l.current_frame).unwrap_or(0)
    }

    /// Record the local input for the current frame.
    pub fn set_input(&self, flags: u8, target_x: Fixed, target_y: Fixed) {
        if let Ok(mut local) = self.local.lock() {
            let frame_id = local.current_frame;
            local.manager.begin_frame(frame_id);
            local.manager.set_input(flags, target_x, target_y);
        }
    }

    /// Finish and send the current frame's input; advances the cursor.
    ///
    /// Returns the encoded input bytes that went out (the predictor wants
    /// them), or `None` when no input was begun.
    pub async fn send_input(&self) -> Result<Option<Vec<u8>>, ClientError> {
        let finished = {
            let mut local = self.local.lock().map_err(|_| ClientError::NotConnected)?;
            let finished = local.manager.end_frame();
            if finished.is_some() {
                local.current_frame += 1;
            }
            finished
        };

        let Some(input) = finished else {
            return Ok(None);
        };
        let encoded = input.encode();

        self.out_tx
            .send(ClientMessage::Input {
                frame_id: input.frame_id,
                input_data: encoded.clone(),
            })
            .await
            .map_err(|_| ClientError::NotConnected)?;

        Ok(Some(encoded))
    }

    /// Pop the next frame the buffered consumer may execute.
    ///
    /// The client runs `buffer_size` frames behind the newest server
    /// frame; frames are handed out strictly in order with no gaps.
    pub fn next_executable_frame(&self) -> Option<Frame> {
        let buffer = i64::from(self.config.network.buffer_size);
        let mut shared = self.shared.lock().ok()?;

        let next = shared.executed_frame + 1;
        if next > shared.latest_server_frame - buffer {
            return None;
        }
        let frame = shared.frames.remove(&(next as u32))?;
        shared.executed_frame = next;
        Some(frame)
    }

    /// A received, not yet executed frame.
    pub fn frame(&self, frame_id: u32) -> Option<Frame> {
        self.shared.lock().ok()?.frames.get(&frame_id).cloned()
    }

    /// Ask the server for every committed frame after our newest.
    pub async fn request_sync(&self) -> Result<(), ClientError> {
        let last_frame = self.latest_server_frame().max(0) as u32;
        self.out_tx
            .send(ClientMessage::Reconnect { last_frame })
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Leave the room and tear the session down.
    pub async fn leave(self) {
        let _ = self.out_tx.send(ClientMessage::Leave {}).await;
        // Give the writer a moment to flush the leave
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.teardown();
    }

    /// Drop the connection without notifying the server.
    pub fn disconnect(self) {
        self.teardown();
    }

    fn teardown(&self) {
        self.recv_task.abort();
        self.writer_task.abort();
        if let Ok(mut shared) = self.shared.lock() {
            shared.connected = false;
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.recv_task.abort();
        self.writer_task.abort();
    }
}

/// Writer task: envelope out, bytes on the wire.
async fn run_writer(
    mut ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    mut out_rx: mpsc::Receiver<ClientMessage>,
) {
    while let Some(message) = out_rx.recv().await {
        let bytes = match message.to_msgpack() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize outbound message: {e}");
                continue;
            }
        };
        if ws_tx.send(Message::Binary(bytes)).await.is_err() {
            break;
        }
    }
}

/// Receive task: parks server messages into the shared store.
async fn run_receiver(
    mut ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
    shared: Arc<Mutex<ClientShared>>,
    local_index: u16,
) {
    while let Some(message) = ws_rx.next().await {
        let data = match message {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let parsed = match ServerMessage::from_msgpack(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("undecodable server message: {e}");
                continue;
            }
        };

        let Ok(mut shared) = shared.lock() else { break };
        match parsed {
            ServerMessage::GameFrame(wire) => {
                store_frame(&mut shared, wire.into_frame());
            }
            ServerMessage::SyncFrames {
                frames,
                current_frame,
            } => {
                for wire in frames {
                    store_frame(&mut shared, wire.into_frame());
                }
                shared.latest_server_frame = shared
                    .latest_server_frame
                    .max(i64::from(current_frame) - 1);
            }
            ServerMessage::GameStart { start_frame } => {
                shared.started = true;
                shared.start_frame = start_frame;
            }
            ServerMessage::PlayerJoined { player_id, .. } => {
                let index = player_index(&player_id);
                if index != local_index && !shared.peers.contains(&index) {
                    shared.peers.push(index);
                    shared.peers.sort_unstable();
                }
            }
            ServerMessage::PlayerLeft { player_id } => {
                let index = player_index(&player_id);
                shared.peers.retain(|&p| p != index);
            }
            ServerMessage::JoinSuccess { .. } => {
                debug!("duplicate joinSuccess ignored");
            }
        }
    }

    if let Ok(mut shared) = shared.lock() {
        shared.connected = false;
    }
}

fn store_frame(shared: &mut ClientShared, frame: Frame) {
    let frame_id = i64::from(frame.frame_id);
    if frame.confirmed {
        shared.last_confirmed_frame = shared.last_confirmed_frame.max(frame_id);
    }
    shared.latest_server_frame = shared.latest_server_frame.max(frame_id);
    // Frames already executed are stale rebroadcasts
    if frame_id > shared.executed_frame {
        shared.frames.insert(frame.frame_id, frame);
    }
}

// =============================================================================
// CLIENT GAME LOOP
// =============================================================================

/// Fixed-step logic driver for a connected client.
///
/// Runs the 30 Hz loop: send the local input, drain executable frames
/// into the predictor, capture render interpolation state. The render
/// layer polls [`renderer`](Self::renderer) at its own (higher) rate.
pub struct ClientGameLoop {
    client: Arc<GameClient>,
    predictor: ClientPredictor,
    renderer: InterpolationRenderer,
    running: Arc<AtomicBool>,
}

impl ClientGameLoop {
    /// Create a loop around a connected client.
    pub fn new(client: Arc<GameClient>, predictor: ClientPredictor) -> Self {
        Self {
            client,
            predictor,
            renderer: InterpolationRenderer::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The predictor (and through it the simulated world).
    pub fn predictor(&self) -> &ClientPredictor {
        &self.predictor
    }

    /// Mutable predictor access for session setup.
    pub fn predictor_mut(&mut self) -> &mut ClientPredictor {
        &mut self.predictor
    }

    /// The interpolation state for the render layer.
    pub fn renderer(&self) -> &InterpolationRenderer {
        &self.renderer
    }

    /// A handle the embedder can use to stop the loop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// One synchronous logic step: drain every executable frame into the
    /// predictor. Returns how many frames were executed.
    pub fn logic_step(&mut self) -> usize {
        let others = self.client.other_players();
        let mut executed = 0;

        while let Some(frame) = self.client.next_executable_frame() {
            self.predictor.on_server_frame(&frame, &others);
            self.renderer.on_logic_frame(self.predictor.state());
            executed += 1;
        }
        executed
    }

    /// Run the fixed-rate logic loop until stopped or disconnected.
    pub async fn run(&mut self) {
        let frame_time = Duration::from_millis(u64::from(
            self.client.config.network.frame_time_ms(),
        ));
        let mut ticker = interval(frame_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) && self.client.is_connected() {
            ticker.tick().await;
            self.logic_step();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// TESTS
// =============================================================================
