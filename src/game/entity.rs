//! Game Entities
//!
//! An entity is anything the simulation moves: player avatars, projectiles,
//! pickups. Every field is an integer - positions and velocities are Q16.16 -
//! so two peers stepping the same entity always land on the same bits.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{from_int, Fixed};
use crate::core::hash::StateHasher;

/// A simulated entity with fixed-point position and velocity.
///
/// `Copy` on purpose: entities are plain integer records, and collision
/// resolution reads two of them before writing both back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity id; iteration over entities is always id-ascending.
    pub id: u32,
    /// X position (Q16.16 pixels).
    pub x: Fixed,
    /// Y position (Q16.16 pixels).
    pub y: Fixed,
    /// X velocity (Q16.16 pixels/second).
    pub vx: Fixed,
    /// Y velocity (Q16.16 pixels/second).
    pub vy: Fixed,
    /// Collision box width (Q16.16 pixels).
    pub width: Fixed,
    /// Collision box height (Q16.16 pixels).
    pub height: Fixed,
    /// Current hit points, 0..=max_hp.
    pub hp: u32,
    /// Maximum hit points.
    pub max_hp: u32,
    /// Free-form state flag bits (airborne, invulnerable, ...).
    pub flags: u32,
}

impl Entity {
    /// Default entity edge length: 32 pixels.
    pub const DEFAULT_SIZE: Fixed = 32 << 16;

    /// Default hit points.
    pub const DEFAULT_HP: u32 = 100;

    /// Create an entity at a fixed-point position.
    pub fn new(id: u32, x: Fixed, y: Fixed) -> Self {
        Self {
            id,
            x,
            y,
            vx: 0,
            vy: 0,
            width: Self::DEFAULT_SIZE,
            height: Self::DEFAULT_SIZE,
            hp: Self::DEFAULT_HP,
            max_hp: Self::DEFAULT_HP,
            flags: 0,
        }
    }

    /// Create an entity at integer pixel coordinates.
    pub fn at_pixels(id: u32, x: i32, y: i32) -> Self {
        Self::new(id, from_int(x), from_int(y))
    }

    /// Position as floats, for rendering only.
    pub fn position_f32(&self) -> (f32, f32) {
        (
            crate::core::fixed::to_float(self.x),
            crate::core::fixed::to_float(self.y),
        )
    }

    /// Integrate position from velocity over `dt_ms` milliseconds.
    ///
    /// position += velocity * dt / 1000, widened to i64 so a saturated
    /// velocity cannot overflow mid-expression. `dt <= 0` is a no-op.
    pub fn update_position(&mut self, dt_ms: i32) {
        if dt_ms <= 0 {
            return;
        }
        self.x = (self.x as i64 + (self.vx as i64 * dt_ms as i64) / 1000) as Fixed;
        self.y = (self.y as i64 + (self.vy as i64 * dt_ms as i64) / 1000) as Fixed;
    }

    /// Collision bounds as (x1, y1, x2, y2) in Q form.
    pub fn bounds(&self) -> (Fixed, Fixed, Fixed, Fixed) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }

    /// Apply damage, clamping hp at zero.
    pub fn apply_damage(&mut self, amount: u32) {
        self.hp = self.hp.saturating_sub(amount);
    }

    /// Heal, clamping hp at max_hp.
    pub fn heal(&mut self, amount: u32) {
        self.hp = (self.hp + amount).min(self.max_hp);
    }

    /// True once hp has reached zero.
    pub fn is_dead(&self) -> bool {
        self.hp == 0
    }

    /// Reset mutable state for reuse from the pool. Identity and size stay.
    pub fn reset(&mut self) {
        self.x = 0;
        self.y = 0;
        self.vx = 0;
        self.vy = 0;
        self.hp = self.max_hp;
        self.flags = 0;
    }

    /// Feed every field into a state hasher in fixed order.
    ///
    /// This is the canonical serialisation: change the order or width of
    /// anything here and every stored replay hash breaks.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id);
        hasher.update_fixed(self.x);
        hasher.update_fixed(self.y);
        hasher.update_fixed(self.vx);
        hasher.update_fixed(self.vy);
        hasher.update_fixed(self.width);
        hasher.update_fixed(self.height);
        hasher.update_u32(self.hp);
        hasher.update_u32(self.max_hp);
        hasher.update_u32(self.flags);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, FIXED_ONE};

    #[test]
    fn test_entity_defaults() {
        let e = Entity::at_pixels(1, 100, 200);
        assert_eq!(e.x, 100 * FIXED_ONE);
        assert_eq!(e.y, 200 * FIXED_ONE);
        assert_eq!(e.width, 32 * FIXED_ONE);
        assert_eq!(e.hp, 100);
        assert_eq!(e.max_hp, 100);
        assert_eq!(e.flags, 0);
    }

    #[test]
    fn test_update_position() {
        let mut e = Entity::at_pixels(0, 0, 0);
        e.vx = to_fixed(300.0);
        e.vy = to_fixed(-150.0);

        // One 30 Hz step: 300 px/s * 33 ms ≈ 9.9 px
        e.update_position(33);
        assert_eq!(e.x, (to_fixed(300.0) as i64 * 33 / 1000) as i32);
        assert_eq!(e.y, (to_fixed(-150.0) as i64 * 33 / 1000) as i32);
    }

    #[test]
    fn test_update_position_zero_dt() {
        let mut e = Entity::at_pixels(0, 5, 5);
        e.vx = to_fixed(1000.0);
        e.update_position(0);
        e.update_position(-17);
        assert_eq!(e.x, 5 * FIXED_ONE);
    }

    #[test]
    fn test_bounds() {
        let e = Entity::at_pixels(0, 10, 20);
        let (x1, y1, x2, y2) = e.bounds();
        assert_eq!(x1, 10 * FIXED_ONE);
        assert_eq!(y1, 20 * FIXED_ONE);
        assert_eq!(x2, 42 * FIXED_ONE);
        assert_eq!(y2, 52 * FIXED_ONE);
    }

    #[test]
    fn test_damage_and_heal_clamping() {
        let mut e = Entity::at_pixels(0, 0, 0);
        e.apply_damage(30);
        assert_eq!(e.hp, 70);
        e.heal(100);
        assert_eq!(e.hp, 100);
        e.apply_damage(500);
        assert_eq!(e.hp, 0);
        assert!(e.is_dead());
    }

    #[test]
    fn test_reset_keeps_identity() {
        let mut e = Entity::at_pixels(7, 50, 60);
        e.vx = 123;
        e.apply_damage(40);
        e.flags = 0xFF;

        e.reset();
        assert_eq!(e.id, 7);
        assert_eq!(e.x, 0);
        assert_eq!(e.vx, 0);
        assert_eq!(e.hp, e.max_hp);
        assert_eq!(e.flags, 0);
    }

    #[test]
    fn test_canonical_hash_sensitivity() {
        let hash_of = |e: &Entity| {
            let mut h = StateHasher::for_state();
            e.hash_into(&mut h);
            h.finalize()
        };

        let a = Entity::at_pixels(1, 10, 10);
        let mut b = a;
        assert_eq!(hash_of(&a), hash_of(&b));

        b.vx = 1;
        assert_ne!(hash_of(&a), hash_of(&b));
    }
}
