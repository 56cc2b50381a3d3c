//! Replay Recording and Playback
//!
//! A replay stores only the input stream, never world state: feeding the
//! recorded frames through the deterministic kernel reconstructs the
//! session bit for bit. Files are tiny as a result.
//!
//! Container format: a 4-byte magic, then a JSON body.
//!
//! ```text
//! ┌──────┬───────────────────────────────────────────┐
//! │ FSRP │ zlib-compressed JSON                      │
//! │ FSRJ │ plain JSON                                │
//! └──────┴───────────────────────────────────────────┘
//!
//! JSON body: { "header": {...}, "frames": [{f, i, t}, ...] }
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::frame::Frame;

/// Magic for zlib-compressed replays.
pub const MAGIC_COMPRESSED: &[u8; 4] = b"FSRP";

/// Magic for plain-JSON replays.
pub const MAGIC_PLAIN: &[u8; 4] = b"FSRJ";

/// Replay file errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Filesystem or compression failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON body failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// File does not start with a known magic.
    #[error("invalid replay magic: {0:?}")]
    BadMagic([u8; 4]),

    /// File shorter than the magic.
    #[error("replay file truncated")]
    Truncated,
}

/// Replay file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayHeader {
    /// Format version.
    pub version: String,
    /// Producing game, free-form.
    pub game_name: String,
    /// Players recorded.
    pub player_count: u32,
    /// Player indices in the recording.
    pub player_ids: Vec<u16>,
    /// Wall-clock recording start (Unix seconds).
    pub start_time: f64,
    /// Recording length in seconds.
    pub duration: f64,
    /// Frames recorded.
    pub frame_count: u32,
    /// RNG seed the session ran with.
    pub seed: u32,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for ReplayHeader {
    fn default() -> Self {
        Self {
            version: "1.0".to_owned(),
            game_name: "framesync".to_owned(),
            player_count: 2,
            player_ids: Vec::new(),
            start_time: 0.0,
            duration: 0.0,
            frame_count: 0,
            seed: 0,
            metadata: serde_json::Map::new(),
        }
    }
}

/// One recorded frame: id, inputs, capture time. Short JSON keys keep
/// long recordings small.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Frame id.
    #[serde(rename = "f")]
    pub frame_id: u32,
    /// player index -> encoded input bytes.
    #[serde(rename = "i")]
    pub inputs: BTreeMap<u16, Vec<u8>>,
    /// Wall-clock capture time (Unix seconds).
    #[serde(rename = "t", default)]
    pub timestamp: f64,
}

impl ReplayFrame {
    /// Rebuild a live frame for feeding back through a client.
    /// Replayed frames are authoritative, so they come back confirmed.
    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame::new(self.frame_id);
        frame.inputs = self.inputs.clone();
        frame.confirmed = true;
        frame
    }
}

/// On-disk body.
#[derive(Serialize, Deserialize)]
struct ReplayBody {
    header: ReplayHeader,
    frames: Vec<ReplayFrame>,
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// =============================================================================
// RECORDER
// =============================================================================

/// Records a session's frame stream.
pub struct ReplayRecorder {
    /// Header being built.
    pub header: ReplayHeader,
    frames: Vec<ReplayFrame>,
    recording: bool,
}

impl ReplayRecorder {
    /// Create a recorder.
    pub fn new(player_count: u32, seed: u32) -> Self {
        Self {
            header: ReplayHeader {
                player_count,
                seed,
                start_time: unix_seconds(),
                ..ReplayHeader::default()
            },
            frames: Vec::new(),
            recording: false,
        }
    }

    /// Begin recording a session.
    pub fn start_recording(
        &mut self,
        player_ids: Vec<u16>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        self.header.player_ids = player_ids;
        self.header.start_time = unix_seconds();
        self.header.metadata = metadata;
        self.frames.clear();
        self.recording = true;
    }

    /// Record one produced frame. No-op unless recording.
    pub fn record_frame(&mut self, frame: &Frame) {
        if !self.recording {
            return;
        }
        self.frames.push(ReplayFrame {
            frame_id: frame.frame_id,
            inputs: frame.inputs.clone(),
            timestamp: unix_seconds(),
        });
    }

    /// Finish recording, fixing duration and frame count.
    pub fn stop_recording(&mut self) {
        if let Some(last) = self.frames.last() {
            self.header.duration = last.timestamp - self.header.start_time;
        }
        self.header.frame_count = self.frames.len() as u32;
        self.recording = false;
    }

    /// Recorded frames.
    pub fn frames(&self) -> &[ReplayFrame] {
        &self.frames
    }

    /// Save to a replay file. `compress` selects `FSRP` over `FSRJ`.
    pub fn save(&mut self, path: impl AsRef<Path>, compress: bool) -> Result<(), ReplayError> {
        self.stop_recording();

        let body = ReplayBody {
            header: self.header.clone(),
            frames: self.frames.clone(),
        };
        let json = serde_json::to_vec(&body)?;

        let mut out = Vec::with_capacity(json.len() / 2 + 4);
        if compress {
            out.extend_from_slice(MAGIC_COMPRESSED);
            let mut encoder = ZlibEncoder::new(out, Compression::best());
            encoder.write_all(&json)?;
            out = encoder.finish()?;
        } else {
            out.extend_from_slice(MAGIC_PLAIN);
            out.extend_from_slice(&json);
        }

        std::fs::write(path, out)?;
        Ok(())
    }

    /// Load a replay file, auto-detecting the container.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let raw = std::fs::read(path)?;
        if raw.len() < 4 {
            return Err(ReplayError::Truncated);
        }

        let magic: [u8; 4] = [raw[0], raw[1], raw[2], raw[3]];
        let body_bytes = &raw[4..];

        let json = if &magic == MAGIC_COMPRESSED {
            let mut decoder = ZlibDecoder::new(body_bytes);
            let mut json = Vec::new();
            decoder.read_to_end(&mut json)?;
            json
        } else if &magic == MAGIC_PLAIN {
            body_bytes.to_vec()
        } else {
            return Err(ReplayError::BadMagic(magic));
        };

        let body: ReplayBody = serde_json::from_slice(&json)?;
        Ok(Self {
            header: body.header,
            frames: body.frames,
            recording: false,
        })
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// Sequential playback over a recording.
pub struct ReplayPlayer {
    recorder: ReplayRecorder,
    cursor: usize,
    playing: bool,
}

impl ReplayPlayer {
    /// Wrap a recording for playback.
    pub fn new(recorder: ReplayRecorder) -> Self {
        Self {
            recorder,
            cursor: 0,
            playing: false,
        }
    }

    /// Load a replay file for playback.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        Ok(Self::new(ReplayRecorder::load(path)?))
    }

    /// The recording's header.
    pub fn header(&self) -> &ReplayHeader {
        &self.recorder.header
    }

    /// Start playback from the beginning.
    pub fn play(&mut self) {
        self.cursor = 0;
        self.playing = true;
    }

    /// Pause playback.
    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Resume a paused playback.
    pub fn resume(&mut self) {
        self.playing = true;
    }

    /// Stop and rewind.
    pub fn stop(&mut self) {
        self.playing = false;
        self.cursor = 0;
    }

    /// The next frame, or None when paused or finished.
    pub fn next_frame(&mut self) -> Option<&ReplayFrame> {
        if !self.playing {
            return None;
        }
        let frame = self.recorder.frames.get(self.cursor)?;
        self.cursor += 1;
        Some(frame)
    }

    /// Position the cursor at the first frame with id >= `frame_id`.
    pub fn seek_to_frame(&mut self, frame_id: u32) -> bool {
        if let Some(position) = self
            .recorder
            .frames
            .iter()
            .position(|f| f.frame_id >= frame_id)
        {
            self.cursor = position;
            return true;
        }
        false
    }

    /// Playback progress in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.recorder.frames.is_empty() {
            return 0.0;
        }
        self.cursor as f64 / self.recorder.frames.len() as f64
    }

    /// Total frames in the recording.
    pub fn total_frames(&self) -> usize {
        self.recorder.frames.len()
    }
}

// =============================================================================
// ANALYZER
// =============================================================================

/// Per-player input activity in a recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputFrequency {
    /// Frames in the recording.
    pub total_frames: usize,
    /// Frames where the player supplied input bytes.
    pub input_frames: usize,
    /// Frames where the player's slot was empty (forced commits).
    pub empty_frames: usize,
    /// input_frames / total_frames.
    pub input_rate: f64,
}

/// Offline analysis over a recording.
pub struct ReplayAnalyzer<'a> {
    recorder: &'a ReplayRecorder,
}

impl<'a> ReplayAnalyzer<'a> {
    /// Analyze a recording.
    pub fn new(recorder: &'a ReplayRecorder) -> Self {
        Self { recorder }
    }

    /// Input activity for one player.
    pub fn input_frequency(&self, player: u16) -> InputFrequency {
        let frames = self.recorder.frames();
        let mut input_frames = 0;
        let mut empty_frames = 0;

        for frame in frames {
            match frame.inputs.get(&player) {
                Some(data) if !data.is_empty() => input_frames += 1,
                Some(_) => empty_frames += 1,
                None => {}
            }
        }

        InputFrequency {
            total_frames: frames.len(),
            input_frames,
            empty_frames,
            input_rate: if frames.is_empty() {
                0.0
            } else {
                input_frames as f64 / frames.len() as f64
            },
        }
    }

    /// Capture-time gaps between consecutive frames, in seconds.
    pub fn frame_times(&self) -> Vec<f64> {
        self.recorder
            .frames()
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect()
    }

    /// Mean capture-time gap.
    pub fn average_frame_time(&self) -> f64 {
        let times = self.frame_times();
        if times.is_empty() {
            return 0.0;
        }
        times.iter().sum::<f64>() / times.len() as f64
    }

    /// Frame ids whose capture gap exceeded `threshold` seconds.
    pub fn lag_frames(&self, threshold: f64) -> Vec<u32> {
        let frames = self.recorder.frames();
        frames
            .windows(2)
            .filter(|pair| pair[1].timestamp - pair[0].timestamp > threshold)
            .map(|pair| pair[1].frame_id)
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(frame_id: u32, with_input: bool) -> Frame {
        let mut frame = Frame::new(frame_id);
        frame.set_input(0, if with_input { vec![1, 2, 3] } else { vec![] });
        frame.set_input(1, vec![]);
        frame.confirmed = with_input;
        frame
    }

    fn recorded() -> ReplayRecorder {
        let mut recorder = ReplayRecorder::new(2, 12345);
        recorder.start_recording(vec![0, 1], serde_json::Map::new());
        for frame_id in 0..10 {
            recorder.record_frame(&sample_frame(frame_id, frame_id % 2 == 0));
        }
        recorder.stop_recording();
        recorder
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("framesync-replay-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_record_requires_start() {
        let mut recorder = ReplayRecorder::new(2, 0);
        recorder.record_frame(&sample_frame(0, true));
        assert!(recorder.frames().is_empty());

        recorder.start_recording(vec![0, 1], serde_json::Map::new());
        recorder.record_frame(&sample_frame(0, true));
        assert_eq!(recorder.frames().len(), 1);
    }

    #[test]
    fn test_stop_fixes_counters() {
        let recorder = recorded();
        assert_eq!(recorder.header.frame_count, 10);
        assert_eq!(recorder.header.player_ids, vec![0, 1]);
        assert_eq!(recorder.header.seed, 12345);
        assert!(recorder.header.duration >= 0.0);
    }

    #[test]
    fn test_save_load_compressed() {
        let path = temp_path("compressed.fsr");
        let mut recorder = recorded();
        recorder.save(&path, true).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..4], MAGIC_COMPRESSED);

        let loaded = ReplayRecorder::load(&path).unwrap();
        assert_eq!(loaded.header.frame_count, 10);
        assert_eq!(loaded.frames(), recorder.frames());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_save_load_plain() {
        let path = temp_path("plain.fsr");
        let mut recorder = recorded();
        recorder.save(&path, false).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..4], MAGIC_PLAIN);
        // The body is readable JSON with the compact frame keys
        let body: serde_json::Value = serde_json::from_slice(&raw[4..]).unwrap();
        assert!(body["frames"][0]["f"].is_number());
        assert!(body["frames"][0]["i"]["0"].is_array());

        let loaded = ReplayRecorder::load(&path).unwrap();
        assert_eq!(loaded.frames(), recorder.frames());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bad_magic_rejected() {
        let path = temp_path("bad.fsr");
        std::fs::write(&path, b"XXXX{}").unwrap();
        assert!(matches!(
            ReplayRecorder::load(&path),
            Err(ReplayError::BadMagic(_))
        ));
        std::fs::write(&path, b"ab").unwrap();
        assert!(matches!(
            ReplayRecorder::load(&path),
            Err(ReplayError::Truncated)
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_player_sequential_playback() {
        let mut player = ReplayPlayer::new(recorded());

        // Not playing yet
        assert!(player.next_frame().is_none());

        player.play();
        let mut seen = Vec::new();
        while let Some(frame) = player.next_frame() {
            seen.push(frame.frame_id);
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(player.progress(), 1.0);

        // Finished; pause/resume around a rewind
        player.stop();
        assert_eq!(player.progress(), 0.0);
        player.play();
        player.pause();
        assert!(player.next_frame().is_none());
        player.resume();
        assert_eq!(player.next_frame().map(|f| f.frame_id), Some(0));
    }

    #[test]
    fn test_player_seek() {
        let mut player = ReplayPlayer::new(recorded());
        player.play();

        assert!(player.seek_to_frame(7));
        assert_eq!(player.next_frame().map(|f| f.frame_id), Some(7));
        assert!(!player.seek_to_frame(100));
    }

    #[test]
    fn test_replay_frame_to_frame() {
        let recorder = recorded();
        let rebuilt = recorder.frames()[0].to_frame();
        assert_eq!(rebuilt.frame_id, 0);
        assert!(rebuilt.confirmed);
        assert_eq!(rebuilt.input(0), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_analyzer_input_frequency() {
        let recorder = recorded();
        let analyzer = ReplayAnalyzer::new(&recorder);

        // Player 0 had bytes on even frames, empty on odd
        let frequency = analyzer.input_frequency(0);
        assert_eq!(frequency.total_frames, 10);
        assert_eq!(frequency.input_frames, 5);
        assert_eq!(frequency.empty_frames, 5);
        assert!((frequency.input_rate - 0.5).abs() < 1e-9);

        // Player 1 never sent bytes
        let frequency = analyzer.input_frequency(1);
        assert_eq!(frequency.input_frames, 0);
        assert_eq!(frequency.empty_frames, 10);

        // Unknown player appears in no frame
        let frequency = analyzer.input_frequency(9);
        assert_eq!(frequency.input_frames + frequency.empty_frames, 0);
    }

    #[test]
    fn test_analyzer_frame_times() {
        let mut recorder = ReplayRecorder::new(1, 0);
        recorder.start_recording(vec![0], serde_json::Map::new());
        recorder.record_frame(&sample_frame(0, true));
        recorder.record_frame(&sample_frame(1, true));
        recorder.stop_recording();

        // Hand-adjust capture times for a deterministic gap profile
        recorder.frames[0].timestamp = 10.0;
        recorder.frames[1].timestamp = 10.2;

        let analyzer = ReplayAnalyzer::new(&recorder);
        let times = analyzer.frame_times();
        assert_eq!(times.len(), 1);
        assert!((times[0] - 0.2).abs() < 1e-9);
        assert!((analyzer.average_frame_time() - 0.2).abs() < 1e-9);
        assert_eq!(analyzer.lag_frames(0.1), vec![1]);
        assert!(analyzer.lag_frames(0.5).is_empty());
    }
}
