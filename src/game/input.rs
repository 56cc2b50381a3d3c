//! Input Codec, Capture and Validation
//!
//! The per-tick player input is the only data that crosses the wire in
//! lockstep, so its byte layout is part of the protocol contract:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  PlayerInput wire layout (big-endian, 16-byte header)      │
//! ├────────────────────────────────────────────────────────────┤
//! │  frame_id   u32   which logical frame this input targets   │
//! │  player_id  u16   sender's numeric player index            │
//! │  flags      u8    button bitset                            │
//! │  target_x   i32   Q16.16 target coordinate                 │
//! │  target_y   i32   Q16.16 target coordinate                 │
//! │  extra_len  u8    length of trailing blob                  │
//! │  extra      [u8]  optional skill payload, <= 255 bytes     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three roles live here: the codec (`PlayerInput`), the client-side
//! collector (`InputManager`), and the server-side anti-cheat gate
//! (`InputValidator`).

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fixed::{fixed_abs, Fixed};

/// Wire header size in bytes.
pub const INPUT_HEADER_SIZE: usize = 16;

/// Maximum encoded input size accepted anywhere (header + extra).
pub const MAX_INPUT_SIZE: usize = 1024;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer than 16 header bytes present.
    #[error("input data too short: {0} bytes")]
    ShortInput(usize),
}

/// A single player's input for one logical frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Logical frame this input targets.
    pub frame_id: u32,
    /// Sender's numeric player index.
    pub player_id: u16,
    /// Button bitset, see the `MOVE_*` / action constants.
    pub flags: u8,
    /// Target X coordinate (Q16.16), for aimed skills.
    pub target_x: Fixed,
    /// Target Y coordinate (Q16.16).
    pub target_y: Fixed,
    /// Optional skill payload; truncated to 255 bytes.
    pub extra: Vec<u8>,
}

impl PlayerInput {
    /// Move up (W / ↑).
    pub const MOVE_UP: u8 = 0x01;
    /// Move down (S / ↓).
    pub const MOVE_DOWN: u8 = 0x02;
    /// Move left (A / ←).
    pub const MOVE_LEFT: u8 = 0x04;
    /// Move right (D / →).
    pub const MOVE_RIGHT: u8 = 0x08;
    /// Basic attack.
    pub const ATTACK: u8 = 0x10;
    /// First skill.
    pub const SKILL_1: u8 = 0x20;
    /// Second skill.
    pub const SKILL_2: u8 = 0x40;
    /// Jump.
    pub const JUMP: u8 = 0x80;

    /// Flags that count as actions for the APM guard: everything except
    /// plain movement. A held movement key is not an "action".
    pub const ACTION_MASK: u8 = Self::ATTACK | Self::SKILL_1 | Self::SKILL_2 | Self::JUMP;

    /// Create an empty input for a frame.
    pub fn new(frame_id: u32, player_id: u16) -> Self {
        Self {
            frame_id,
            player_id,
            ..Self::default()
        }
    }

    /// Set one or more flag bits.
    pub fn set_flag(&mut self, flag: u8) {
        self.flags |= flag;
    }

    /// Check a flag bit.
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Clear one or more flag bits.
    pub fn clear_flag(&mut self, flag: u8) {
        self.flags &= !flag;
    }

    /// True if any action (non-movement) bit is set.
    pub fn has_action(&self) -> bool {
        self.flags & Self::ACTION_MASK != 0
    }

    /// Attach an extra payload, truncating to the 255-byte wire limit.
    pub fn set_extra(&mut self, extra: &[u8]) {
        self.extra = extra[..extra.len().min(255)].to_vec();
    }

    /// Movement direction as (dx, dy), each component -1, 0 or 1.
    /// Up is negative y, matching screen coordinates.
    pub fn direction(&self) -> (i32, i32) {
        let mut dx = 0;
        let mut dy = 0;
        if self.has_flag(Self::MOVE_UP) {
            dy = -1;
        }
        if self.has_flag(Self::MOVE_DOWN) {
            dy = 1;
        }
        if self.has_flag(Self::MOVE_LEFT) {
            dx = -1;
        }
        if self.has_flag(Self::MOVE_RIGHT) {
            dx = 1;
        }
        (dx, dy)
    }

    /// Serialize to the big-endian wire form.
    pub fn encode(&self) -> Vec<u8> {
        let extra_len = self.extra.len().min(255);
        let mut out = Vec::with_capacity(INPUT_HEADER_SIZE + extra_len);
        out.extend_from_slice(&self.frame_id.to_be_bytes());
        out.extend_from_slice(&self.player_id.to_be_bytes());
        out.push(self.flags);
        out.extend_from_slice(&self.target_x.to_be_bytes());
        out.extend_from_slice(&self.target_y.to_be_bytes());
        out.push(extra_len as u8);
        out.extend_from_slice(&self.extra[..extra_len]);
        out
    }

    /// Deserialize from the wire form.
    ///
    /// Fails only when the 16-byte header is incomplete; a short extra
    /// section is truncated to `min(remaining, extra_len)`.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < INPUT_HEADER_SIZE {
            return Err(CodecError::ShortInput(data.len()));
        }

        let frame_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let player_id = u16::from_be_bytes([data[4], data[5]]);
        let flags = data[6];
        let target_x = i32::from_be_bytes([data[7], data[8], data[9], data[10]]);
        let target_y = i32::from_be_bytes([data[11], data[12], data[13], data[14]]);
        let extra_len = data[15] as usize;

        let remaining = &data[INPUT_HEADER_SIZE..];
        let extra = remaining[..remaining.len().min(extra_len)].to_vec();

        Ok(Self {
            frame_id,
            player_id,
            flags,
            target_x,
            target_y,
            extra,
        })
    }
}

// =============================================================================
// INPUT MANAGER (client side)
// =============================================================================

/// Collects and buffers the local player's inputs, one frame at a time.
///
/// Flow per logical frame:
/// 1. `begin_frame(frame_id)`
/// 2. `set_input(flags, target_x, target_y)` as the UI samples keys
/// 3. `end_frame()` - encodes, records history, queues for sending
/// 4. `drain_pending()` - taken by the network layer
pub struct InputManager {
    player_id: u16,
    current_input: Option<PlayerInput>,
    input_history: BTreeMap<u32, Vec<u8>>,
    parsed_history: BTreeMap<u32, PlayerInput>,
    max_history: usize,
    pending: Vec<PlayerInput>,
}

impl InputManager {
    /// History retention, in frames (10 s at 30 Hz).
    pub const MAX_HISTORY: usize = 300;

    /// Create a manager for the local player.
    pub fn new(player_id: u16) -> Self {
        Self {
            player_id,
            current_input: None,
            input_history: BTreeMap::new(),
            parsed_history: BTreeMap::new(),
            max_history: Self::MAX_HISTORY,
            pending: Vec::new(),
        }
    }

    /// Local player index this manager collects for.
    pub fn player_id(&self) -> u16 {
        self.player_id
    }

    /// Start collecting input for a frame.
    pub fn begin_frame(&mut self, frame_id: u32) {
        self.current_input = Some(PlayerInput::new(frame_id, self.player_id));
    }

    /// Overwrite the current frame's input. No-op outside begin/end.
    pub fn set_input(&mut self, flags: u8, target_x: Fixed, target_y: Fixed) {
        if let Some(input) = self.current_input.as_mut() {
            input.flags = flags;
            input.target_x = target_x;
            input.target_y = target_y;
        }
    }

    /// Attach an extra payload to the current frame's input.
    pub fn set_extra(&mut self, extra: &[u8]) {
        if let Some(input) = self.current_input.as_mut() {
            input.set_extra(extra);
        }
    }

    /// Finish the frame: encode, record history, queue for sending.
    ///
    /// Returns the finished input, or None when no frame was begun.
    pub fn end_frame(&mut self) -> Option<PlayerInput> {
        let input = self.current_input.take()?;

        self.input_history.insert(input.frame_id, input.encode());
        self.parsed_history.insert(input.frame_id, input.clone());

        // Evict oldest entries beyond the retention window
        while self.input_history.len() > self.max_history {
            let Some(oldest) = self.input_history.keys().next().copied() else {
                break;
            };
            self.input_history.remove(&oldest);
            self.parsed_history.remove(&oldest);
        }

        self.pending.push(input.clone());
        Some(input)
    }

    /// Take everything queued for sending; the queue is left empty.
    pub fn drain_pending(&mut self) -> Vec<PlayerInput> {
        std::mem::take(&mut self.pending)
    }

    /// Encoded input previously recorded for a frame.
    pub fn input_at(&self, frame_id: u32) -> Option<&[u8]> {
        self.input_history.get(&frame_id).map(Vec::as_slice)
    }

    /// Parsed input previously recorded for a frame.
    pub fn parsed_at(&self, frame_id: u32) -> Option<&PlayerInput> {
        self.parsed_history.get(&frame_id)
    }
}

// =============================================================================
// INPUT VALIDATOR (server side)
// =============================================================================

/// Why an input was rejected. Rejections are silent toward the peer
/// (the session survives) but logged anonymised for analytics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputRejection {
    /// Encoded payload above [`MAX_INPUT_SIZE`].
    #[error("input of {0} bytes exceeds the {MAX_INPUT_SIZE} byte limit")]
    Oversized(usize),

    /// Payload did not decode.
    #[error("malformed input: {0}")]
    Malformed(#[from] CodecError),

    /// Frame id beyond the allowed lookahead.
    #[error("frame {frame_id} too far ahead of server frame {current}")]
    FrameAhead {
        /// Frame the input targeted.
        frame_id: u32,
        /// Server cursor at validation time.
        current: u32,
    },

    /// Frame id at or below the last accepted input from this player.
    #[error("frame {0} already accepted (replay guard)")]
    Replayed(u32),

    /// Target coordinate outside the sane world envelope.
    #[error("target coordinate out of range")]
    TargetOutOfRange,

    /// Action rate above the configured APM ceiling.
    #[error("action rate {apm} exceeds max APM {max}")]
    RateExceeded {
        /// Observed actions per minute.
        apm: u32,
        /// Configured ceiling.
        max: u32,
    },
}

/// Server-side acceptance gate for client inputs.
///
/// Tracks per-player replay and rate state. All per-player state is
/// session-scoped: dropped on disconnect, fresh on reconnect.
pub struct InputValidator {
    max_apm: u32,
    max_frame_ahead: u32,
    max_target: Fixed,
    /// Arrival times of action-carrying inputs, per player, trailing 1 s.
    action_times: BTreeMap<u16, VecDeque<(Instant, u32)>>,
    /// Highest accepted frame id per player (replay guard), -1 initially.
    last_accepted: BTreeMap<u16, i64>,
}

impl InputValidator {
    /// APM sliding window length.
    const WINDOW: Duration = Duration::from_secs(1);

    /// Create a validator.
    ///
    /// `max_target` bounds |target_x| / |target_y| in Q form.
    pub fn new(max_apm: u32, max_frame_ahead: u32, max_target: Fixed) -> Self {
        Self {
            max_apm,
            max_frame_ahead,
            max_target,
            action_times: BTreeMap::new(),
            last_accepted: BTreeMap::new(),
        }
    }

    /// Validate an encoded input from a player against the server cursor.
    ///
    /// On success the replay guard advances and the decoded input is
    /// returned for sequencing.
    pub fn validate(
        &mut self,
        player: u16,
        data: &[u8],
        current_frame: u32,
    ) -> Result<PlayerInput, InputRejection> {
        self.validate_at(Instant::now(), player, data, current_frame)
    }

    /// Clock-injected validation core; tests drive `now` directly.
    pub fn validate_at(
        &mut self,
        now: Instant,
        player: u16,
        data: &[u8],
        current_frame: u32,
    ) -> Result<PlayerInput, InputRejection> {
        if data.len() > MAX_INPUT_SIZE {
            return Err(InputRejection::Oversized(data.len()));
        }

        let input = PlayerInput::decode(data)?;

        if input.frame_id > current_frame + self.max_frame_ahead {
            return Err(InputRejection::FrameAhead {
                frame_id: input.frame_id,
                current: current_frame,
            });
        }

        let last = self.last_accepted.get(&player).copied().unwrap_or(-1);
        if i64::from(input.frame_id) <= last {
            return Err(InputRejection::Replayed(input.frame_id));
        }

        if fixed_abs(input.target_x) > self.max_target
            || fixed_abs(input.target_y) > self.max_target
        {
            return Err(InputRejection::TargetOutOfRange);
        }

        // APM guard: distinct frame ids carrying action flags inside the
        // trailing wall-clock second, scaled to a per-minute rate. Pure
        // movement and heartbeat inputs are not actions.
        if input.has_action() {
            let window = self.action_times.entry(player).or_default();
            while window
                .front()
                .is_some_and(|(t, _)| now.duration_since(*t) >= Self::WINDOW)
            {
                window.pop_front();
            }
            if window.back().map(|(_, f)| *f) != Some(input.frame_id) {
                window.push_back((now, input.frame_id));
            }
            let apm = window.len() as u32 * 60;
            if apm > self.max_apm {
                return Err(InputRejection::RateExceeded {
                    apm,
                    max: self.max_apm,
                });
            }
        }

        self.last_accepted.insert(player, i64::from(input.frame_id));
        Ok(input)
    }

    /// Drop all per-player state (called on disconnect).
    pub fn forget_player(&mut self, player: u16) {
        self.action_times.remove(&player);
        self.last_accepted.remove(&player);
    }

    /// Last accepted frame for a player, -1 if none.
    pub fn last_accepted_frame(&self, player: u16) -> i64 {
        self.last_accepted.get(&player).copied().unwrap_or(-1)
    }
}

// =============================================================================
// TESTS
// =============================================================================
