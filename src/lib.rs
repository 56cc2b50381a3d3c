//! # Framesync
//!
//! Deterministic lockstep (frame-synchronous) multiplayer engine: an
//! authoritative frame server and a predicting client over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FRAMESYNC                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic            │
//! │  ├── rng.rs      - Deterministic Xorshift32 PRNG            │
//! │  └── hash.rs     - Canonical state hashing (MD5)            │
//! │                                                             │
//! │  game/           - Simulation kernel (deterministic)        │
//! │  ├── input.rs    - Input codec, capture, validation         │
//! │  ├── entity.rs   - Fixed-point entities                     │
//! │  ├── physics.rs  - Physics, spatial grid, AABB collision    │
//! │  └── state.rs    - World state, snapshots, desync detection │
//! │                                                             │
//! │  sync/           - Lockstep frame assembly                  │
//! │  ├── frame.rs    - Frame, FrameBuffer                       │
//! │  └── engine.rs   - Commit / force-commit scheduler          │
//! │                                                             │
//! │  client/         - Predicting client                        │
//! │  ├── predictor.rs- Prediction, rollback, interpolation      │
//! │  └── session.rs  - WebSocket session + 30 Hz logic loop     │
//! │                                                             │
//! │  network/        - Server (non-deterministic)               │
//! │  ├── protocol.rs - MsgPack envelopes                        │
//! │  ├── room.rs     - Rooms + per-room tick tasks              │
//! │  └── server.rs   - WebSocket accept/auth/dispatch           │
//! │                                                             │
//! │  replay.rs       - Input-stream replay files (FSRP/FSRJ)    │
//! │  config.rs       - Process-wide immutable configuration     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `game/` and `sync/` modules are **100% deterministic**:
//! - No floating-point arithmetic in game logic
//! - No HashMap (BTreeMap everywhere iteration order matters)
//! - All randomness from the seeded Xorshift32
//! - No suspension inside simulation operations
//!
//! Every peer that consumes the identical ordered frame stream computes a
//! byte-identical world, so only inputs cross the wire. The state hash
//! exists to *detect* divergence, never to repair it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod replay;
pub mod sync;

// Re-export commonly used types. The `crate::` prefix on the core paths
// keeps them from colliding with the `core` crate in the extern prelude.
pub use crate::client::predictor::ClientPredictor;
pub use crate::client::session::GameClient;
pub use crate::config::Config;
pub use crate::core::fixed::{Fixed, FIXED_HALF, FIXED_ONE, FRACTION_BITS};
pub use crate::core::rng::DeterministicRng;
pub use crate::game::entity::Entity;
pub use crate::game::input::{InputManager, InputValidator, PlayerInput};
pub use crate::game::physics::PhysicsEngine;
pub use crate::game::state::{GameState, StateSnapshot};
pub use crate::network::server::GameServer;
pub use crate::sync::engine::FrameEngine;
pub use crate::sync::frame::Frame;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default logical frame rate (Hz)
pub const FRAME_RATE: u32 = 30;
