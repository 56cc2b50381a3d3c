//! Networking (non-deterministic side).
//!
//! WebSocket transport, the MsgPack envelope protocol, and room/session
//! orchestration. Nothing in here touches simulation math; it only moves
//! validated inputs into the frame engine and frames back out.

pub mod protocol;
pub mod room;
pub mod server;
