//! End-to-end determinism scenarios.
//!
//! Every test here drives the deterministic kernel the way a live session
//! would: inputs are encoded to wire bytes, sequenced into frames by the
//! lockstep engine, then executed. Two peers are simulated by running two
//! independent kernels over the identical frame stream and comparing
//! canonical state hashes.

use std::sync::Arc;

use framesync::config::Config;
use framesync::core::hash::StateHash;
use framesync::core::rng::DeterministicRng;
use framesync::game::entity::Entity;
use framesync::game::physics::PhysicsEngine;
use framesync::game::state::GameState;
use framesync::game::input::PlayerInput;
use framesync::network::room::Room;
use framesync::replay::{ReplayPlayer, ReplayRecorder};
use framesync::sync::engine::FrameEngine;
use framesync::sync::frame::Frame;
use framesync::ClientPredictor;
use framesync::Fixed;

const P0: u16 = 0;
const P1: u16 = 1;

/// A peer's deterministic kernel: world + physics, stepped frame by frame.
struct Kernel {
    state: GameState,
    physics: PhysicsEngine,
    speed: Fixed,
    dt: i32,
}

impl Kernel {
    fn new(config: &Config, spawns: &[(u16, i32, i32)]) -> Self {
        let mut state = GameState::new();
        for (i, &(player, x, y)) in spawns.iter().enumerate() {
            let entity = Entity::at_pixels(i as u32, x, y);
            state.add_entity(entity);
            state.bind_player(player, i as u32);
        }
        Self {
            state,
            physics: PhysicsEngine::new(&config.physics),
            speed: config.game.player_speed_fixed(),
            dt: config.network.frame_time_ms() as i32,
        }
    }

    fn step(&mut self, frame: &Frame) -> StateHash {
        for (&player, data) in &frame.inputs {
            if data.is_empty() {
                continue;
            }
            let input = PlayerInput::decode(data).expect("well-formed wire input");
            if let Some(entity_id) = self.state.player_entity_id(player) {
                self.physics
                    .apply_input(&mut self.state.entities, entity_id, input.flags, self.speed);
            }
        }
        self.physics.update(&mut self.state.entities, self.dt);
        self.state.frame_id = frame.frame_id;
        self.state.compute_state_hash()
    }
}

fn encoded(frame_id: u32, player: u16, flags: u8) -> Vec<u8> {
    let mut input = PlayerInput::new(frame_id, player);
    input.flags = flags;
    input.encode()
}

/// Ground-level spawn: gravity clamps entities in place, so an idle
/// session really is motionless.
const GROUND_Y: i32 = 1080 - 32;

// =============================================================================
// TWO-PLAYER IDLE
// =============================================================================

#[test]
fn two_player_idle_confirms_every_frame_and_matches_reference() {
    let config = Arc::new(Config::default());
    let mut room = Room::new("R".into(), config.clone());
    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    room.add_player("player_0".into(), tx.clone()).unwrap();
    room.add_player("player_1".into(), tx).unwrap();
    room.maybe_start();

    let spawns = [(P0, 200, GROUND_Y), (P1, 1000, GROUND_Y)];
    let mut live = Kernel::new(&config, &spawns);
    let mut reference = Kernel::new(&config, &spawns);

    let mut frames = Vec::new();
    for frame_id in 0..300u32 {
        room.handle_input(P0, &encoded(frame_id, P0, 0)).unwrap();
        room.handle_input(P1, &encoded(frame_id, P1, 0)).unwrap();

        let frame = room.tick_once().expect("complete frame must commit");
        assert_eq!(frame.frame_id, frame_id);
        assert!(frame.confirmed, "idle frames must confirm, never force");
        frames.push(frame);
    }

    let mut live_hash = None;
    for frame in &frames {
        live_hash = Some(live.step(frame));
    }

    // Entities never left spawn
    assert_eq!(live.state.entity(0).unwrap().x, 200 << 16);
    assert_eq!(live.state.entity(0).unwrap().y, GROUND_Y << 16);
    assert_eq!(live.state.entity(1).unwrap().x, 1000 << 16);

    // An offline deterministic run over the same stream lands on the
    // same hash at frame 299
    let mut reference_hash = None;
    for frame in &frames {
        reference_hash = Some(reference.step(frame));
    }
    assert_eq!(live_hash.unwrap(), reference_hash.unwrap());
}

// =============================================================================
// LOCKSTEP MOVE (mirrored)
// =============================================================================

#[test]
fn lockstep_move_is_mirrored_on_every_peer() {
    let config = Config::default();
    let spawns = [(P0, 200, 350), (P1, 1000, 350)];
    let mut peer_a = Kernel::new(&config, &spawns);
    let mut peer_b = Kernel::new(&config, &spawns);

    for frame_id in 0..30u32 {
        let mut frame = Frame::new(frame_id);
        frame.confirmed = true;
        frame.set_input(P0, encoded(frame_id, P0, PlayerInput::MOVE_RIGHT));
        frame.set_input(P1, encoded(frame_id, P1, PlayerInput::MOVE_LEFT));

        let hash_a = peer_a.step(&frame);
        let hash_b = peer_b.step(&frame);
        assert_eq!(hash_a, hash_b, "peers diverged at frame {frame_id}");
    }

    let p0 = *peer_a.state.player_entity(P0).unwrap();
    let p1 = *peer_a.state.player_entity(P1).unwrap();

    // Moved, mirrored, and inside the clamp bounds
    assert!(p0.x > 200 << 16);
    assert!(p1.x < 1000 << 16);
    let travelled_right = p0.x - (200 << 16);
    let travelled_left = (1000 << 16) - p1.x;
    assert_eq!(travelled_right, travelled_left);
    assert!(p0.x + p0.width <= 1920 << 16);
    assert!(p1.x >= 0);
    // Gravity treated both identically
    assert_eq!(p0.y, p1.y);
}

// =============================================================================
// FORCE TICK ON DROPOUT
// =============================================================================

#[test]
fn dropout_forces_frames_with_continuous_ids() {
    let mut config = Config::default();
    config.network.frame_timeout = 0.0; // deadline lapses immediately
    let config = Arc::new(config);

    let mut room = Room::new("R".into(), config.clone());
    let (tx, _rx) = tokio::sync::mpsc::channel(8);
    room.add_player("player_0".into(), tx.clone()).unwrap();
    room.add_player("player_1".into(), tx).unwrap();
    room.maybe_start();

    let mut frames = Vec::new();
    for frame_id in 0..30u32 {
        room.handle_input(P0, &encoded(frame_id, P0, 0)).unwrap();
        // Player 1's inputs stop after frame 10
        if frame_id <= 10 {
            room.handle_input(P1, &encoded(frame_id, P1, 0)).unwrap();
        }
        frames.push(room.tick_once().expect("one frame per period"));
    }

    for (expected_id, frame) in frames.iter().enumerate() {
        assert_eq!(frame.frame_id, expected_id as u32, "no gaps allowed");
        if frame.frame_id <= 10 {
            assert!(frame.confirmed);
        } else {
            assert!(!frame.confirmed, "dropout frames are force-committed");
            assert_eq!(frame.input(P1), Some(&[][..]), "missing player is empty");
            assert!(!frame.input(P0).unwrap().is_empty());
        }
    }
}

// =============================================================================
// ROLLBACK EQUALS A NO-PREDICTION CLIENT
// =============================================================================

#[test]
fn rollback_at_frame_52_matches_authoritative_replay() {
    let mut config = Config::default();
    config.physics.gravity = 0.0;
    let config = Arc::new(config);

    let spawn = |predictor: &mut ClientPredictor| {
        let state = predictor.state_mut();
        state.add_entity(Entity::at_pixels(0, 200, 350));
        state.add_entity(Entity::at_pixels(1, 1000, 350));
        state.bind_player(P0, 0);
        state.bind_player(P1, 1);
    };

    let mut predicting = ClientPredictor::new(&config, P0);
    spawn(&mut predicting);
    let mut reference = Kernel::new(&config, &[(P0, 200, 350), (P1, 1000, 350)]);

    // Authoritative stream: P1 actually pressed MoveLeft at frame 52
    let server_frames: Vec<Frame> = (50..=55u32)
        .map(|frame_id| {
            let mut frame = Frame::new(frame_id);
            frame.confirmed = true;
            frame.set_input(P0, encoded(frame_id, P0, PlayerInput::MOVE_RIGHT));
            frame.set_input(
                P1,
                if frame_id == 52 {
                    encoded(frame_id, P1, PlayerInput::MOVE_LEFT)
                } else {
                    Vec::new()
                },
            );
            frame
        })
        .collect();

    // Client predicts P1 = empty for the whole window
    for frame_id in 50..=55u32 {
        predicting
            .predict_frame(frame_id, encoded(frame_id, P0, PlayerInput::MOVE_RIGHT), &[P1])
            .unwrap();
    }

    for frame in &server_frames {
        let result = predicting.on_server_frame(frame, &[P1]);
        assert_eq!(result.rolled_back, frame.frame_id == 52);
        reference.step(frame);
    }

    assert_eq!(
        predicting.state().compute_state_hash(),
        reference.state.compute_state_hash(),
        "post-rollback state must equal the no-prediction client"
    );
    assert_eq!(predicting.stats().rollbacks, 1);
}

// =============================================================================
// REPLAY IDEMPOTENCE
// =============================================================================

#[test]
fn replay_file_reconstructs_identical_hashes() {
    let config = Config::default();
    let spawns = [(P0, 300, 200), (P1, 900, 600)];
    let seed = 777u32;

    // Live session: engine sequences pseudo-random inputs into frames
    let mut engine = FrameEngine::new(2, config.network.buffer_size);
    let mut rng = DeterministicRng::new(seed);
    let mut recorder = ReplayRecorder::new(2, seed);
    recorder.start_recording(vec![P0, P1], serde_json::Map::new());

    let mut live = Kernel::new(&config, &spawns);
    let mut live_hashes = Vec::new();

    for frame_id in 0..120u32 {
        for player in [P0, P1] {
            let flags = rng.range(0, 15) as u8; // movement bits only
            engine.add_input(frame_id, player, encoded(frame_id, player, flags));
        }
        let frame = engine.tick().expect("both inputs present");
        recorder.record_frame(&frame);
        live_hashes.push(live.step(&frame));
    }

    // Through the file and back
    let path = std::env::temp_dir().join(format!("framesync-idem-{}.fsr", std::process::id()));
    recorder.save(&path, true).unwrap();
    let mut player = ReplayPlayer::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(player.header().seed, seed);
    assert_eq!(player.header().frame_count, 120);

    let mut replayed = Kernel::new(&config, &spawns);
    let mut replayed_hashes = Vec::new();
    player.play();
    while let Some(replay_frame) = player.next_frame() {
        let frame = replay_frame.to_frame();
        replayed_hashes.push(replayed.step(&frame));
    }

    assert_eq!(live_hashes, replayed_hashes);
}

// =============================================================================
// DETERMINISM PROPERTY: two fresh kernels, thousands of frames
// =============================================================================

#[test]
fn two_kernels_agree_at_every_frame_over_long_runs() {
    let config = Config::default();
    let spawns = [(P0, 100, 100), (P1, 1700, 100), (2, 800, 500), (3, 900, 500)];

    for seed in [1u32, 0xDEAD_BEEF, 42_4242] {
        let mut kernel_a = Kernel::new(&config, &spawns);
        let mut kernel_b = Kernel::new(&config, &spawns);
        let mut rng = DeterministicRng::new(seed);

        for frame_id in 0..2000u32 {
            let mut frame = Frame::new(frame_id);
            frame.confirmed = true;
            for player in [P0, P1, 2, 3] {
                // Some frames carry no input at all
                if rng.chance(framesync::core::fixed::to_fixed(0.8)) {
                    let flags = rng.range(0, 255) as u8;
                    frame.set_input(player, encoded(frame_id, player, flags));
                } else {
                    frame.set_input(player, Vec::new());
                }
            }

            let hash_a = kernel_a.step(&frame);
            let hash_b = kernel_b.step(&frame);
            assert_eq!(hash_a, hash_b, "seed {seed} diverged at frame {frame_id}");
        }
    }
}

// =============================================================================
// BOUND INVARIANT under adversarial inputs
// =============================================================================

#[test]
fn entities_stay_in_bounds_whatever_the_inputs() {
    let config = Config::default();
    let world_w = config.physics.world_width_fixed();
    let world_h = config.physics.world_height_fixed();
    let spawns = [(P0, 0, 0), (P1, 1888, 1048)];
    let mut kernel = Kernel::new(&config, &spawns);
    let mut rng = DeterministicRng::new(99);

    for frame_id in 0..600u32 {
        let mut frame = Frame::new(frame_id);
        frame.confirmed = true;
        for player in [P0, P1] {
            let flags = rng.range(0, 255) as u8;
            frame.set_input(player, encoded(frame_id, player, flags));
        }
        kernel.step(&frame);

        for entity in kernel.state.entities.values() {
            assert!(entity.x >= 0 && entity.x + entity.width <= world_w);
            assert!(entity.y >= 0 && entity.y + entity.height <= world_h);
        }
    }
}

// =============================================================================
// FRAME COMMIT MONOTONICITY at the engine level
// =============================================================================

#[test]
fn committed_sequence_is_gapless_with_increasing_timestamps() {
    let mut engine = FrameEngine::new(2, 3);
    let mut produced: Vec<Frame> = Vec::new();

    for frame_id in 0..100u32 {
        engine.add_input(frame_id, P0, encoded(frame_id, P0, 0));
        // Every 7th frame times out instead of confirming
        if frame_id % 7 != 0 {
            engine.add_input(frame_id, P1, encoded(frame_id, P1, 0));
            produced.push(engine.tick().unwrap());
        } else {
            assert!(engine.tick().is_none());
            produced.push(engine.force_tick());
        }
    }

    for (expected, frame) in produced.iter().enumerate() {
        assert_eq!(frame.frame_id, expected as u32);
    }
    for pair in produced.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }

    // A late joiner can be caught up from history without gaps
    let sync: Vec<u32> = engine
        .frames_since(49)
        .iter()
        .map(|f| f.frame_id)
        .collect();
    assert_eq!(sync, (50..100).collect::<Vec<_>>());
}

// =============================================================================
// COLLISION determinism across peers
// =============================================================================

#[test]
fn head_on_collision_resolves_identically_for_both_peers() {
    let mut config = Config::default();
    config.physics.gravity = 0.0;
    let spawns = [(P0, 400, 500), (P1, 500, 500)];
    let mut peer_a = Kernel::new(&config, &spawns);
    let mut peer_b = Kernel::new(&config, &spawns);

    // Drive the two entities into each other
    for frame_id in 0..60u32 {
        let mut frame = Frame::new(frame_id);
        frame.confirmed = true;
        frame.set_input(P0, encoded(frame_id, P0, PlayerInput::MOVE_RIGHT));
        frame.set_input(P1, encoded(frame_id, P1, PlayerInput::MOVE_LEFT));
        let hash_a = peer_a.step(&frame);
        let hash_b = peer_b.step(&frame);
        assert_eq!(hash_a, hash_b, "collision resolution diverged at {frame_id}");
    }

    // They met and separated; neither tunnelled through the other
    let p0 = peer_a.state.player_entity(P0).unwrap();
    let p1 = peer_a.state.player_entity(P1).unwrap();
    assert!(p0.x + p0.width <= p1.x + p1.width);
    assert!(p0.x < p1.x);

    // Any recorded pair involves exactly our two entities
    for &(a, b) in peer_a.physics.collision_pairs() {
        assert_eq!((a, b), (0, 1));
    }
}
