//! Lockstep frame assembly.
//!
//! Per-room input accumulation, the commit / force-commit policy, and the
//! frame history that reconnecting peers are caught up from.

pub mod engine;
pub mod frame;
