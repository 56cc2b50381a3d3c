//! Lockstep Frame Engine
//!
//! The authoritative scheduler core: holds the frame cursor, commits frames
//! when every player's input is in, force-commits when the deadline lapses,
//! and keeps the history ring that reconnect sync is served from.
//!
//! The engine itself is synchronous and never suspends; the room task
//! drives it from a 30 Hz timer.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::sync::frame::{monotonic_seconds, BufferStatus, Frame, FrameBuffer};

/// Engine counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Frame the engine is currently collecting.
    pub current_frame: u32,
    /// Players a frame must hear from to confirm.
    pub player_count: u32,
    /// History entries currently held.
    pub history_len: usize,
    /// Underlying buffer counters.
    pub buffer: BufferStatus,
}

/// Per-room lockstep engine.
pub struct FrameEngine {
    /// Players a frame waits for.
    player_count: u32,
    /// Input accumulator.
    buffer: FrameBuffer,
    /// The frame currently being collected. Every produced frame advances
    /// this by exactly one: the output sequence has no gaps.
    current_frame: u32,
    /// Produced frames, kept for reconnect sync and diagnostics.
    history: BTreeMap<u32, Frame>,
    /// History ring capacity (300 = 10 s at 30 Hz).
    max_history: u32,
    /// When the engine started waiting on `current_frame`; the force-commit
    /// deadline for a frame with no inputs at all.
    waiting_since: Instant,
}

impl FrameEngine {
    /// Default history ring capacity.
    pub const MAX_HISTORY: u32 = 300;

    /// Create an engine for a fixed player count.
    pub fn new(player_count: u32, buffer_size: u32) -> Self {
        Self {
            player_count,
            buffer: FrameBuffer::new(buffer_size),
            current_frame: 0,
            history: BTreeMap::new(),
            max_history: Self::MAX_HISTORY,
            waiting_since: Instant::now(),
        }
    }

    /// Create an engine with a custom history capacity.
    pub fn with_history(player_count: u32, buffer_size: u32, max_history: u32) -> Self {
        Self {
            max_history: max_history.max(1),
            ..Self::new(player_count, buffer_size)
        }
    }

    /// The frame currently being collected.
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Players a frame waits for.
    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    /// Adjust the player count (players joined or left mid-room).
    /// Takes effect from the next commit attempt.
    pub fn set_player_count(&mut self, player_count: u32) {
        self.player_count = player_count.max(1);
    }

    /// Route a validated input into the buffer.
    pub fn add_input(&mut self, frame_id: u32, player: u16, data: Vec<u8>) {
        self.buffer.add_input(frame_id, player, data);
    }

    /// Try to advance one frame.
    ///
    /// Commits the current frame if every player's input is present:
    /// the frame moves into history, stale history is evicted, the cursor
    /// advances, and the frame is returned for broadcast. Otherwise nothing
    /// changes and `None` is returned.
    pub fn tick(&mut self) -> Option<Frame> {
        let frame = self.buffer.try_commit(self.current_frame, self.player_count)?;
        self.finish_frame(frame.clone());
        Some(frame)
    }

    /// Force the current frame out past its deadline.
    ///
    /// Whatever inputs arrived are kept; missing players get empty bytes.
    /// The frame is marked unconfirmed and will never be revised.
    pub fn force_tick(&mut self) -> Frame {
        let mut inputs = self.buffer.take_pending(self.current_frame);
        for player in 0..self.player_count as u16 {
            inputs.entry(player).or_default();
        }

        let frame = Frame {
            frame_id: self.current_frame,
            inputs,
            confirmed: false,
            timestamp: monotonic_seconds(),
        };
        self.finish_frame(frame.clone());
        frame
    }

    /// Whether the current frame has waited past the commit deadline.
    ///
    /// Measured from the first pending input for the frame, or from the
    /// moment the engine began waiting when no input has arrived at all,
    /// so an idle room still advances once per timeout.
    pub fn deadline_exceeded(&self, timeout: Duration) -> bool {
        let since = self
            .buffer
            .first_input_at(self.current_frame)
            .unwrap_or(self.waiting_since);
        since.elapsed() >= timeout
    }

    /// Shared path for tick/force_tick: history, eviction, cursor advance.
    fn finish_frame(&mut self, frame: Frame) {
        self.history.insert(frame.frame_id, frame);

        let oldest = self.current_frame.saturating_sub(self.max_history);
        self.history.retain(|&fid, _| fid >= oldest);
        self.buffer.cleanup_before(oldest);

        self.current_frame += 1;
        self.waiting_since = Instant::now();
    }

    /// A produced frame from history.
    pub fn frame(&self, frame_id: u32) -> Option<&Frame> {
        self.history.get(&frame_id)
    }

    /// All produced frames with id greater than `after`, ascending.
    /// This is the reconnect sync payload.
    pub fn frames_since(&self, after: i64) -> Vec<Frame> {
        self.history
            .iter()
            .filter(|(&fid, _)| i64::from(fid) > after)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            current_frame: self.current_frame,
            player_count: self.player_count,
            history_len: self.history.len(),
            buffer: self.buffer.status(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
