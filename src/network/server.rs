//! WebSocket Game Server
//!
//! Accepts connections, authenticates them into rooms, validates and
//! routes inputs to the room engines, and keeps connections alive.
//!
//! Task layout: one accept task, one receive task per connection, one
//! writer task per connection (all outbound traffic funnels through an
//! mpsc channel so room broadcasts never touch the socket directly), and
//! one tick task per room (owned by the `RoomManager`).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::network::protocol::{
    ClientMessage, ServerMessage, CLOSE_AUTH_FAILED, CLOSE_AUTH_TIMEOUT, CLOSE_ROOM_FULL,
    MAX_ID_LEN,
};
use crate::network::room::{RoomError, RoomManager};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The authoritative lockstep server.
pub struct GameServer {
    config: Arc<Config>,
    rooms: Arc<RoomManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server.
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            rooms: Arc::new(RoomManager::new(config.clone())),
            config,
            shutdown_tx,
        }
    }

    /// Bind the configured listen port.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        let addr = format!("0.0.0.0:{}", self.config.network.server_port);
        Ok(TcpListener::bind(&addr).await?)
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an existing listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!("game server listening on {addr}");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("new connection from {addr}");
                            let rooms = self.rooms.clone();
                            let config = self.config.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(stream, addr, rooms, config, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Stop room tick tasks, then let connection tasks observe the
        // shutdown broadcast and close their transports
        self.rooms.shutdown().await;
        Ok(())
    }

    /// Begin graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.room_count().await
    }
}

/// Close a still-unsplit socket with a specific code.
async fn close_with_code(ws: &mut WebSocketStream<TcpStream>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::Library(code),
        reason: reason.into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}

/// Validate an auth payload: id strings must be non-empty and bounded.
fn auth_payload_ok(player_id: &str, room_id: &str) -> bool {
    !player_id.is_empty()
        && player_id.len() <= MAX_ID_LEN
        && !room_id.is_empty()
        && room_id.len() <= MAX_ID_LEN
}

/// Drive one connection from handshake to disconnect.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<RoomManager>,
    config: Arc<Config>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake failed for {addr}: {e}");
            return;
        }
    };

    // --- Auth phase: the first message must be an auth envelope ---
    let auth_timeout = Duration::from_secs_f64(config.network.auth_timeout);
    let first = match timeout(auth_timeout, ws.next()).await {
        Err(_) => {
            debug!("auth timeout for {addr}");
            close_with_code(&mut ws, CLOSE_AUTH_TIMEOUT, "auth timeout").await;
            return;
        }
        Ok(first) => first,
    };

    let (player_id, room_id) = match first {
        Some(Ok(Message::Binary(data))) => match ClientMessage::from_msgpack(&data) {
            Ok(ClientMessage::Auth { player_id, room_id })
                if auth_payload_ok(&player_id, &room_id) =>
            {
                (player_id, room_id)
            }
            _ => {
                close_with_code(&mut ws, CLOSE_AUTH_FAILED, "auth failed").await;
                return;
            }
        },
        Some(Ok(Message::Close(_))) | None => return,
        Some(Ok(_)) => {
            close_with_code(&mut ws, CLOSE_AUTH_FAILED, "auth failed").await;
            return;
        }
        Some(Err(e)) => {
            debug!("websocket error from {addr} during auth: {e}");
            return;
        }
    };

    // --- Join phase ---
    let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(64);
    let join = match rooms.join_room(&room_id, player_id.clone(), msg_tx.clone()).await {
        Ok(join) => join,
        Err(RoomError::RoomFull) => {
            info!(room = %room_id, "join rejected, room full");
            close_with_code(&mut ws, CLOSE_ROOM_FULL, "room full").await;
            return;
        }
        Err(RoomError::DuplicatePlayer(_)) => {
            close_with_code(&mut ws, CLOSE_AUTH_FAILED, "auth failed").await;
            return;
        }
    };
    let index = join.index;
    let room = join.room.clone();
    info!(room = %room_id, index, "player joined");

    let _ = msg_tx
        .send(ServerMessage::JoinSuccess {
            room_id: room_id.clone(),
            player_id: player_id.clone(),
            player_count: join.player_count,
            players: join.players.clone(),
        })
        .await;

    let joined = ServerMessage::PlayerJoined {
        player_id: player_id.clone(),
        player_count: join.player_count,
    };
    for other in &join.others {
        let _ = other.send(joined.clone()).await;
    }

    // --- Steady state: split, writer task, receive loop ---
    let (ws_tx, mut ws_rx) = ws.split();
    let ping_interval = Duration::from_secs_f64(config.network.ping_interval);
    let writer = tokio::spawn(run_writer(ws_tx, msg_rx, ping_interval));

    let keepalive = ping_interval + Duration::from_secs_f64(config.network.ping_timeout);
    let mut last_activity = Instant::now();

    // Sliding-window message rate limiter
    let max_per_second = config.network.max_requests_per_second as usize;
    let mut arrivals: VecDeque<Instant> = VecDeque::new();

    loop {
        let deadline = last_activity + keepalive;
        tokio::select! {
            message = ws_rx.next() => {
                let data = match message {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                        continue;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong reply internally
                        last_activity = Instant::now();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("websocket error from {addr}: {e}");
                        break;
                    }
                };
                last_activity = Instant::now();

                // Rate limit: at most N messages in any trailing second;
                // the excess is dropped without disconnecting
                let now = Instant::now();
                while arrivals
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= Duration::from_secs(1))
                {
                    arrivals.pop_front();
                }
                if arrivals.len() >= max_per_second {
                    continue;
                }
                arrivals.push_back(now);

                let envelope = match ClientMessage::from_msgpack(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(index, "dropping undecodable envelope: {e}");
                        continue;
                    }
                };

                match envelope {
                    ClientMessage::Input { input_data, .. } => {
                        let result = room.write().await.handle_input(index, &input_data);
                        if let Err(rejection) = result {
                            // Anonymised: the numeric index only
                            warn!(index, %rejection, "input rejected");
                        }
                    }
                    ClientMessage::Reconnect { last_frame } => {
                        let (frames, current_frame) = {
                            let guard = room.read().await;
                            guard.sync_frames_since(last_frame)
                        };
                        let _ = msg_tx
                            .send(ServerMessage::SyncFrames { frames, current_frame })
                            .await;
                    }
                    ClientMessage::Leave {} => break,
                    // A second auth on a live session is a protocol
                    // violation; drop it
                    ClientMessage::Auth { .. } => {
                        debug!(index, "dropping re-auth on live session");
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!(index, "keepalive lapsed, dropping connection");
                break;
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    // --- Disconnect ---
    writer.abort();
    if let Some(leave) = rooms.leave_room(&room_id, index).await {
        let left = ServerMessage::PlayerLeft {
            player_id: leave.player_id,
        };
        for sender in &leave.remaining {
            let _ = sender.send(left.clone()).await;
        }
    }
    info!(room = %room_id, index, "player disconnected");
}

/// Writer task: serialize outbound messages and keep the link pinged.
async fn run_writer(
    mut ws_tx: futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut msg_rx: mpsc::Receiver<ServerMessage>,
    ping_interval: Duration,
) {
    let mut ping = interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = msg_rx.recv() => {
                let Some(message) = message else { break };
                let bytes = match message.to_msgpack() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("failed to serialize message: {e}");
                        continue;
                    }
                };
                if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
