//! Global Configuration
//!
//! Process-wide immutable configuration, loaded once at startup and passed
//! by reference to every component. Peer sessions must share the same
//! configuration; `validate` enforces the invariants that would otherwise
//! desync a session (most importantly the fixed-point precision). Hot
//! reload is deliberately unsupported.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fixed::{from_int, to_fixed, Fixed, FRACTION_BITS};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value violates an invariant shared by all peers.
    /// Peers with mismatched configuration must reject each other,
    /// so this is fatal at startup.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Physics engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhysicsConfig {
    /// Gravity acceleration (pixels/second²).
    pub gravity: f64,
    /// Friction coefficient applied to horizontal velocity each update.
    pub friction: f64,
    /// Velocity saturation bound (pixels/second).
    pub max_velocity: f64,
    /// World width (pixels).
    pub world_width: f64,
    /// World height (pixels).
    pub world_height: f64,
    /// Default entity width (pixels).
    pub entity_width: f64,
    /// Default entity height (pixels).
    pub entity_height: f64,
    /// Spatial grid cell size (pixels).
    pub grid_cell_size: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 980.0,
            friction: 0.9,
            max_velocity: 1000.0,
            world_width: 1920.0,
            world_height: 1080.0,
            entity_width: 32.0,
            entity_height: 32.0,
            grid_cell_size: 64.0,
        }
    }
}

impl PhysicsConfig {
    /// Gravity in Q form. Converted once; the tick path never sees a float.
    pub fn gravity_fixed(&self) -> Fixed {
        to_fixed(self.gravity)
    }

    /// Friction coefficient in Q form (0.9 -> 58982 at 16 fraction bits).
    pub fn friction_q(&self) -> Fixed {
        to_fixed(self.friction)
    }

    /// Velocity bound in Q form.
    pub fn max_velocity_fixed(&self) -> Fixed {
        to_fixed(self.max_velocity)
    }

    /// World width in Q form.
    pub fn world_width_fixed(&self) -> Fixed {
        to_fixed(self.world_width)
    }

    /// World height in Q form.
    pub fn world_height_fixed(&self) -> Fixed {
        to_fixed(self.world_height)
    }

    /// Default entity width in Q form.
    pub fn entity_width_fixed(&self) -> Fixed {
        to_fixed(self.entity_width)
    }

    /// Default entity height in Q form.
    pub fn entity_height_fixed(&self) -> Fixed {
        to_fixed(self.entity_height)
    }

    /// Grid cell size in Q form.
    pub fn grid_cell_size_fixed(&self) -> Fixed {
        to_fixed(self.grid_cell_size)
    }
}

/// Network and transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    /// Logical frame rate (Hz).
    pub frame_rate: u32,
    /// Client execution buffer: the client executes
    /// `currentServerFrame - bufferSize`.
    pub buffer_size: u32,
    /// WebSocket listen port.
    pub server_port: u16,
    /// Seconds a connection may sit unauthenticated before close 4002.
    pub auth_timeout: f64,
    /// Keepalive ping interval (seconds).
    pub ping_interval: f64,
    /// Seconds past the ping interval before a silent peer is dropped.
    pub ping_timeout: f64,
    /// Per-player message budget in a 1-second sliding window.
    pub max_requests_per_second: u32,
    /// How many frames ahead of the server cursor an input may target.
    pub max_frame_ahead: u32,
    /// Seconds to wait for a frame's stragglers before force-committing.
    pub frame_timeout: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            buffer_size: 3,
            server_port: 8765,
            auth_timeout: 5.0,
            ping_interval: 20.0,
            ping_timeout: 10.0,
            max_requests_per_second: 100,
            max_frame_ahead: 100,
            frame_timeout: 1.0,
        }
    }
}

impl NetworkConfig {
    /// Duration of one logical frame in milliseconds (integer, 30 Hz -> 33).
    pub fn frame_time_ms(&self) -> u32 {
        1000 / self.frame_rate
    }
}

/// Game logic tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    /// Number of players a room waits for each frame.
    pub player_count: u32,
    /// Hard cap on room membership.
    pub max_players_per_room: u32,
    /// Player movement speed (pixels/second).
    pub player_speed: f64,
    /// Attack reach (pixels).
    pub attack_range: f64,
    /// Damage per attack.
    pub attack_damage: u32,
    /// Starting hit points.
    pub default_hp: u32,
    /// Maximum actions per minute before inputs are rejected.
    pub max_apm: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            player_count: 2,
            max_players_per_room: 4,
            player_speed: 300.0,
            attack_range: 60.0,
            attack_damage: 10,
            default_hp: 100,
            max_apm: 600,
        }
    }
}

impl GameConfig {
    /// Player speed in Q form.
    pub fn player_speed_fixed(&self) -> Fixed {
        to_fixed(self.player_speed)
    }

    /// Attack range in Q form.
    pub fn attack_range_fixed(&self) -> Fixed {
        to_fixed(self.attack_range)
    }
}

/// History retention tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    /// Committed frames kept for reconnect sync (300 = 10 s at 30 Hz).
    pub max_frame_history: u32,
    /// Snapshot ring capacity (60 = 2 s at 30 Hz).
    pub max_snapshots: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_frame_history: 300,
            max_snapshots: 60,
        }
    }
}

/// Fixed-point precision declaration.
///
/// The actual precision is the compile-time `FRACTION_BITS`; this section
/// exists so a deployment's config file states the value explicitly and a
/// mismatched binary refuses to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixedPointConfig {
    /// Number of fractional bits all peers must share.
    pub fraction_bits: u32,
}

impl Default for FixedPointConfig {
    fn default() -> Self {
        Self {
            fraction_bits: FRACTION_BITS,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Physics tuning.
    pub physics: PhysicsConfig,
    /// Network tuning.
    pub network: NetworkConfig,
    /// Game logic tuning.
    pub game: GameConfig,
    /// History retention.
    pub history: HistoryConfig,
    /// Fixed-point precision declaration.
    pub fixed_point: FixedPointConfig,
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants every peer must share.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_point.fraction_bits != FRACTION_BITS {
            return Err(ConfigError::Invalid(format!(
                "fractionBits {} does not match the compiled precision {}",
                self.fixed_point.fraction_bits, FRACTION_BITS
            )));
        }
        if self.network.frame_rate == 0 || self.network.frame_rate > 1000 {
            return Err(ConfigError::Invalid(format!(
                "frameRate {} out of range 1..=1000",
                self.network.frame_rate
            )));
        }
        if self.game.player_count == 0 {
            return Err(ConfigError::Invalid("playerCount must be >= 1".into()));
        }
        if self.game.max_players_per_room < self.game.player_count {
            return Err(ConfigError::Invalid(format!(
                "maxPlayersPerRoom {} below playerCount {}",
                self.game.max_players_per_room, self.game.player_count
            )));
        }
        if self.physics.world_width <= 0.0 || self.physics.world_height <= 0.0 {
            return Err(ConfigError::Invalid("world dimensions must be positive".into()));
        }
        if self.physics.grid_cell_size <= 0.0 {
            return Err(ConfigError::Invalid("gridCellSize must be positive".into()));
        }
        if self.history.max_snapshots == 0 || self.history.max_frame_history == 0 {
            return Err(ConfigError::Invalid("history limits must be >= 1".into()));
        }
        Ok(())
    }

    /// Validator bound on target coordinates: 10000 pixels in Q form.
    pub fn max_target_coord(&self) -> Fixed {
        from_int(10_000)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.network.frame_rate, 30);
        assert_eq!(config.network.buffer_size, 3);
        assert_eq!(config.network.server_port, 8765);
        assert_eq!(config.game.max_players_per_room, 4);
        assert_eq!(config.fixed_point.fraction_bits, 16);
        assert_eq!(config.physics.world_width, 1920.0);
        assert_eq!(config.physics.world_height, 1080.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_q_form_accessors() {
        let config = Config::default();
        assert_eq!(config.physics.friction_q(), 58982);
        assert_eq!(config.physics.gravity_fixed(), 980 << 16);
        assert_eq!(config.physics.max_velocity_fixed(), 1000 << 16);
        assert_eq!(config.game.player_speed_fixed(), 300 << 16);
        assert_eq!(config.network.frame_time_ms(), 33);
    }

    #[test]
    fn test_fraction_bits_mismatch_rejected() {
        let mut config = Config::default();
        config.fixed_point.fraction_bits = 8;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_room_sizing_rejected() {
        let mut config = Config::default();
        config.game.player_count = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_camel_case() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("maxRequestsPerSecond"));
        assert!(json.contains("fractionBits"));
        assert!(json.contains("gridCellSize"));

        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.network.server_port, config.network.server_port);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: Config =
            serde_json::from_str(r#"{"network": {"serverPort": 9000}}"#).unwrap();
        assert_eq!(parsed.network.server_port, 9000);
        assert_eq!(parsed.network.frame_rate, 30);
        assert_eq!(parsed.game.default_hp, 100);
    }
}
