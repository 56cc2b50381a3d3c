//! Frames and the Frame Buffer
//!
//! A frame is one logical tick's worth of per-player inputs. The buffer
//! accumulates inputs per frame until every player is present, then commits
//! the frame into the ordered ready queue. Pending and committed frames
//! live in disjoint maps; a frame id is only ever in one of them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::OnceLock;
use std::time::Instant;

use crate::game::input::MAX_INPUT_SIZE;

/// Seconds since process start, from a monotonic clock.
///
/// Frame timestamps must be strictly increasing for a room's lifetime;
/// wall-clock time can jump, a monotonic instant cannot.
pub fn monotonic_seconds() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// One logical tick: per-player encoded inputs plus commit metadata.
///
/// A confirmed frame has exactly `player_count` inputs. A force-committed
/// frame fills missing players with empty bytes, carries
/// `confirmed = false`, and is never revised afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Sequence number, starting at 0 with no gaps.
    pub frame_id: u32,
    /// player index -> encoded `PlayerInput` bytes (empty = no input).
    pub inputs: BTreeMap<u16, Vec<u8>>,
    /// True when every player's input arrived before commit.
    pub confirmed: bool,
    /// Monotonic seconds at creation, for latency stats and timeouts.
    pub timestamp: f64,
}

impl Frame {
    /// Create an empty frame.
    pub fn new(frame_id: u32) -> Self {
        Self {
            frame_id,
            inputs: BTreeMap::new(),
            confirmed: false,
            timestamp: monotonic_seconds(),
        }
    }

    /// A player's encoded input, if present.
    pub fn input(&self, player: u16) -> Option<&[u8]> {
        self.inputs.get(&player).map(Vec::as_slice)
    }

    /// Set a player's encoded input.
    pub fn set_input(&mut self, player: u16, data: Vec<u8>) {
        self.inputs.insert(player, data);
    }

    /// Whether every player has contributed.
    pub fn is_complete(&self, player_count: u32) -> bool {
        self.inputs.len() as u32 == player_count
    }
}

/// Buffer status counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    /// Configured latency-hiding window.
    pub buffer_size: u32,
    /// Frames committed and queued for execution.
    pub ready_frames: usize,
    /// Frame slots still waiting for inputs.
    pub pending_frames: usize,
    /// Committed frames currently stored.
    pub total_stored: usize,
}

/// Per-frame input accumulator with an ordered ready queue.
pub struct FrameBuffer {
    /// Latency-hiding window: consumers execute `current - buffer_size`.
    pub buffer_size: u32,
    /// Committed frames, keyed by frame id.
    frames: BTreeMap<u32, Frame>,
    /// Incomplete frames: frame id -> (player -> input bytes).
    pending: BTreeMap<u32, BTreeMap<u16, Vec<u8>>>,
    /// When the first input for a pending frame arrived, for the
    /// force-commit deadline.
    first_arrival: BTreeMap<u32, Instant>,
    /// Committed frame ids in commit order.
    ready_queue: VecDeque<u32>,
}

impl FrameBuffer {
    /// Create a buffer with the given latency window.
    pub fn new(buffer_size: u32) -> Self {
        Self {
            buffer_size,
            frames: BTreeMap::new(),
            pending: BTreeMap::new(),
            first_arrival: BTreeMap::new(),
            ready_queue: VecDeque::new(),
        }
    }

    /// Store a player's input for a frame.
    ///
    /// Oversized inputs are dropped silently; the validator has already
    /// logged the rejection when the server path is in use.
    pub fn add_input(&mut self, frame_id: u32, player: u16, data: Vec<u8>) {
        if data.len() > MAX_INPUT_SIZE {
            return;
        }

        self.first_arrival.entry(frame_id).or_insert_with(Instant::now);
        self.pending.entry(frame_id).or_default().insert(player, data);
    }

    /// Commit a frame once all players' inputs are present.
    ///
    /// Atomically moves the pending slot into a confirmed frame, appends it
    /// to the ready queue, and clears the pending bookkeeping.
    pub fn try_commit(&mut self, frame_id: u32, player_count: u32) -> Option<Frame> {
        let complete = self
            .pending
            .get(&frame_id)
            .is_some_and(|inputs| inputs.len() as u32 == player_count);
        if !complete {
            return None;
        }

        let inputs = self.pending.remove(&frame_id)?;
        self.first_arrival.remove(&frame_id);

        let frame = Frame {
            frame_id,
            inputs,
            confirmed: true,
            timestamp: monotonic_seconds(),
        };
        self.frames.insert(frame_id, frame.clone());
        self.ready_queue.push_back(frame_id);
        Some(frame)
    }

    /// Take the pending inputs for a frame (used by force commit).
    pub fn take_pending(&mut self, frame_id: u32) -> BTreeMap<u16, Vec<u8>> {
        self.first_arrival.remove(&frame_id);
        self.pending.remove(&frame_id).unwrap_or_default()
    }

    /// When the first input for a pending frame arrived.
    pub fn first_input_at(&self, frame_id: u32) -> Option<Instant> {
        self.first_arrival.get(&frame_id).copied()
    }

    /// Number of inputs collected so far for a pending frame.
    pub fn pending_count(&self, frame_id: u32) -> usize {
        self.pending.get(&frame_id).map_or(0, BTreeMap::len)
    }

    /// A committed frame by id.
    pub fn frame(&self, frame_id: u32) -> Option<&Frame> {
        self.frames.get(&frame_id)
    }

    /// Pop the next committed frame in commit order.
    pub fn next_ready_frame(&mut self) -> Option<Frame> {
        let frame_id = self.ready_queue.pop_front()?;
        self.frames.get(&frame_id).cloned()
    }

    /// The frame a buffered consumer should execute now.
    pub fn executable_frame_id(&self, current_frame: u32) -> i64 {
        i64::from(current_frame) - i64::from(self.buffer_size)
    }

    /// Drop committed and pending data older than a frame.
    pub fn cleanup_before(&mut self, oldest_frame: u32) {
        self.frames.retain(|&fid, _| fid >= oldest_frame);
        self.pending.retain(|&fid, _| fid >= oldest_frame);
        self.first_arrival.retain(|&fid, _| fid >= oldest_frame);
        self.ready_queue.retain(|&fid| fid >= oldest_frame);
    }

    /// Current buffer counters.
    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            buffer_size: self.buffer_size,
            ready_frames: self.ready_queue.len(),
            pending_frames: self.pending.len(),
            total_stored: self.frames.len(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
