//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a MsgPack-encoded envelope:
//!
//! ```text
//! { "type": <string>, "payload": <map> }
//! ```
//!
//! carried in a binary WebSocket frame. Unknown envelope types fail to
//! decode and are dropped by the receiver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sync::frame::Frame;

/// Close code: malformed or rejected auth payload.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Close code: no auth envelope within the timeout.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4002;

/// Close code: the requested room is full.
pub const CLOSE_ROOM_FULL: u16 = 4003;

/// Longest accepted player or room id string.
pub const MAX_ID_LEN: usize = 64;

/// Envelope encode/decode errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Encoding failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Decoding failed (includes unknown envelope types).
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A frame as it travels on the wire: the sequencing metadata plus the
/// per-player encoded inputs. Local bookkeeping (timestamps) stays home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    /// Frame sequence number.
    pub frame_id: u32,
    /// player index -> encoded input bytes (empty = no input).
    pub inputs: BTreeMap<u16, Vec<u8>>,
    /// False for force-committed frames.
    pub confirmed: bool,
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            frame_id: frame.frame_id,
            inputs: frame.inputs.clone(),
            confirmed: frame.confirmed,
        }
    }
}

impl WireFrame {
    /// Rebuild a local frame from the wire form.
    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::new(self.frame_id);
        frame.inputs = self.inputs;
        frame.confirmed = self.confirmed;
        frame
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on a connection: identify and pick a room.
    #[serde(rename_all = "camelCase")]
    Auth {
        /// Player identity string, at most [`MAX_ID_LEN`] characters.
        player_id: String,
        /// Room to join, at most [`MAX_ID_LEN`] characters.
        room_id: String,
    },

    /// One tick's encoded input.
    #[serde(rename_all = "camelCase")]
    Input {
        /// Frame the input targets.
        frame_id: u32,
        /// Encoded `PlayerInput` bytes.
        input_data: Vec<u8>,
    },

    /// Orderly departure.
    Leave {},

    /// Ask for every committed frame after `last_frame`.
    #[serde(rename_all = "camelCase")]
    Reconnect {
        /// Highest frame id the client already holds.
        last_frame: u32,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Auth accepted; the session is live.
    #[serde(rename_all = "camelCase")]
    JoinSuccess {
        /// Room joined.
        room_id: String,
        /// Echo of the player id.
        player_id: String,
        /// Members now in the room, including the new player.
        player_count: u32,
        /// Player id strings of all members.
        players: Vec<String>,
    },

    /// Another player entered the room.
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        /// Who joined.
        player_id: String,
        /// Members now in the room.
        player_count: u32,
    },

    /// A player left the room.
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        /// Who left.
        player_id: String,
    },

    /// The room reached two players; lockstep begins.
    #[serde(rename_all = "camelCase")]
    GameStart {
        /// Frame id the session starts at.
        start_frame: u32,
    },

    /// One produced frame, broadcast to every member.
    GameFrame(WireFrame),

    /// Reconnect catch-up: committed frames past the client's last.
    #[serde(rename_all = "camelCase")]
    SyncFrames {
        /// Frames in ascending id order.
        frames: Vec<WireFrame>,
        /// Server cursor after the last included frame.
        current_frame: u32,
    },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Encode to a MsgPack envelope (string keys).
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a MsgPack envelope.
    pub fn from_msgpack(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

impl ServerMessage {
    /// Encode to a MsgPack envelope (string keys).
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from a MsgPack envelope.
    pub fn from_msgpack(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_roundtrip() {
        let msg = ClientMessage::Auth {
            player_id: "player_1".into(),
            room_id: "room_001".into(),
        };

        let bytes = msg.to_msgpack().unwrap();
        let parsed = ClientMessage::from_msgpack(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_input_roundtrip() {
        let msg = ClientMessage::Input {
            frame_id: 1234,
            input_data: vec![0, 1, 2, 250, 255],
        };

        let bytes = msg.to_msgpack().unwrap();
        assert_eq!(ClientMessage::from_msgpack(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_leave_and_reconnect_roundtrip() {
        for msg in [
            ClientMessage::Leave {},
            ClientMessage::Reconnect { last_frame: 42 },
        ] {
            let bytes = msg.to_msgpack().unwrap();
            assert_eq!(ClientMessage::from_msgpack(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_game_frame_roundtrip() {
        let mut frame = Frame::new(77);
        frame.confirmed = true;
        frame.set_input(0, vec![1, 2, 3]);
        frame.set_input(1, vec![]);

        let msg = ServerMessage::GameFrame(WireFrame::from(&frame));
        let bytes = msg.to_msgpack().unwrap();
        let parsed = ServerMessage::from_msgpack(&bytes).unwrap();

        let ServerMessage::GameFrame(wire) = parsed else {
            panic!("wrong variant");
        };
        assert_eq!(wire.frame_id, 77);
        assert!(wire.confirmed);
        assert_eq!(wire.inputs.len(), 2);

        let rebuilt = wire.into_frame();
        assert_eq!(rebuilt.frame_id, frame.frame_id);
        assert_eq!(rebuilt.inputs, frame.inputs);
        assert_eq!(rebuilt.confirmed, frame.confirmed);
    }

    #[test]
    fn test_sync_frames_roundtrip() {
        let frames: Vec<WireFrame> = (10..13)
            .map(|frame_id| WireFrame {
                frame_id,
                inputs: BTreeMap::new(),
                confirmed: frame_id != 11,
            })
            .collect();

        let msg = ServerMessage::SyncFrames {
            frames,
            current_frame: 13,
        };
        let bytes = msg.to_msgpack().unwrap();
        let parsed = ServerMessage::from_msgpack(&bytes).unwrap();

        let ServerMessage::SyncFrames {
            frames,
            current_frame,
        } = parsed
        else {
            panic!("wrong variant");
        };
        assert_eq!(current_frame, 13);
        assert_eq!(frames.len(), 3);
        assert!(!frames[1].confirmed);
    }

    #[test]
    fn test_envelope_shape_on_the_wire() {
        // The envelope must be a two-entry map with string keys
        // "type"/"payload", so foreign peers can interoperate
        #[derive(serde::Deserialize)]
        struct Envelope {
            r#type: String,
            payload: BTreeMap<String, u32>,
        }

        let msg = ServerMessage::GameStart { start_frame: 5 };
        let bytes = msg.to_msgpack().unwrap();

        let envelope: Envelope = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(envelope.r#type, "gameStart");
        assert_eq!(envelope.payload.get("startFrame"), Some(&5));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        // Hand-build { "type": "bogus", "payload": {} }
        #[derive(serde::Serialize)]
        struct Fake<'a> {
            r#type: &'a str,
            payload: std::collections::BTreeMap<String, u32>,
        }
        let bytes = rmp_serde::to_vec_named(&Fake {
            r#type: "bogus",
            payload: Default::default(),
        })
        .unwrap();

        assert!(ClientMessage::from_msgpack(&bytes).is_err());
        assert!(ServerMessage::from_msgpack(&bytes).is_err());
    }

    #[test]
    fn test_type_tags_are_camel_case() {
        let bytes = ServerMessage::JoinSuccess {
            room_id: "r".into(),
            player_id: "p".into(),
            player_count: 1,
            players: vec!["p".into()],
        }
        .to_msgpack()
        .unwrap();

        // The tag string appears verbatim in the MsgPack bytes
        let needle = b"joinSuccess";
        assert!(bytes
            .windows(needle.len())
            .any(|window| window == needle));

        let bytes = ClientMessage::Reconnect { last_frame: 0 }.to_msgpack().unwrap();
        let needle = b"lastFrame";
        assert!(bytes.windows(needle.len()).any(|w| w == needle));
    }
}
